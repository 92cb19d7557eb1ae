use crate::{Cursor, Error, Fields, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// The first **pgstac** version that answers searches with links instead of
/// a context block.
const LINKS_SINCE: (u64, u64) = (0, 8);

/// The shape of a search response.
///
/// Chosen from the catalog version, never from the content of a response.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    /// Format A: `numberReturned` plus `root`, `self`, `next`, and `prev` links.
    Links,

    /// Format B: a `context` block plus bare `next` and `prev` tokens.
    Context,
}

/// A page of search results.
#[derive(Clone, Debug, PartialEq)]
pub struct Page {
    /// These are the out features, usually STAC items, not yet projected.
    pub features: Vec<Map<String, Value>>,

    /// The page size that was asked for.
    pub limit: u64,

    /// Cursor to the following page.
    pub next: Option<Cursor>,

    /// Cursor to the preceding page.
    pub prev: Option<Cursor>,
}

impl ResponseFormat {
    /// Picks the format a **pgstac** version answers with.
    ///
    /// # Examples
    ///
    /// ```
    /// use pgstac_search::ResponseFormat;
    ///
    /// assert_eq!(ResponseFormat::from_version("0.9.1").unwrap(), ResponseFormat::Links);
    /// assert_eq!(ResponseFormat::from_version("0.7.10").unwrap(), ResponseFormat::Context);
    /// ```
    pub fn from_version(version: &str) -> Result<ResponseFormat> {
        let mut parts = version
            .trim()
            .trim_start_matches('v')
            .split('.')
            .map(|part| part.parse::<u64>());
        match (parts.next(), parts.next()) {
            (Some(Ok(major)), Some(Ok(minor))) => {
                if (major, minor) >= LINKS_SINCE {
                    Ok(ResponseFormat::Links)
                } else {
                    Ok(ResponseFormat::Context)
                }
            }
            _ => Err(Error::Catalog(format!(
                "unrecognized pgstac version: {version:?}"
            ))),
        }
    }

    /// The version marker embedded in cursors issued under this format.
    pub fn marker(self) -> &'static str {
        match self {
            ResponseFormat::Links => "l1",
            ResponseFormat::Context => "c1",
        }
    }

    pub(crate) fn from_marker(marker: &str) -> Option<ResponseFormat> {
        match marker {
            "l1" => Some(ResponseFormat::Links),
            "c1" => Some(ResponseFormat::Context),
            _ => None,
        }
    }
}

impl Page {
    /// Returns this page's next token, if it has one.
    pub fn next_token(&self) -> Result<Option<String>> {
        self.next.as_ref().map(Cursor::encode).transpose()
    }

    /// Returns this page's prev token, if it has one.
    pub fn prev_token(&self) -> Result<Option<String>> {
        self.prev.as_ref().map(Cursor::encode).transpose()
    }

    /// Builds the response document.
    ///
    /// `fields` is applied to every feature; links are rendered against
    /// `base_url`.
    pub fn into_envelope(
        self,
        format: ResponseFormat,
        base_url: &str,
        fields: &Fields,
    ) -> Result<Value> {
        match format {
            ResponseFormat::Links => self.into_links_envelope(base_url, fields),
            ResponseFormat::Context => self.into_context_envelope(fields),
        }
    }

    fn into_links_envelope(self, base_url: &str, fields: &Fields) -> Result<Value> {
        let base_url = base_url.trim_end_matches('/');
        let (root, search) = if base_url.is_empty() {
            (".".to_string(), "./search".to_string())
        } else {
            (format!("{base_url}/"), format!("{base_url}/search"))
        };
        let mut links = vec![
            json!({"href": root, "rel": "root", "type": "application/json"}),
            json!({"href": search, "rel": "self", "type": "application/json"}),
        ];
        for (rel, token) in [("next", self.next_token()?), ("prev", self.prev_token()?)] {
            if let Some(token) = token {
                let token: String = url::form_urlencoded::byte_serialize(token.as_bytes()).collect();
                links.push(json!({
                    "href": format!("{search}?token={token}"),
                    "rel": rel,
                    "type": "application/geo+json",
                    "method": "GET",
                }));
            }
        }
        let features = project(self.features, fields);
        Ok(json!({
            "type": "FeatureCollection",
            "numberReturned": features.len(),
            "features": features,
            "links": links,
        }))
    }

    fn into_context_envelope(self, fields: &Fields) -> Result<Value> {
        let next = self.next_token()?;
        let prev = self.prev_token()?;
        let features = project(self.features, fields);
        let mut envelope = json!({
            "type": "FeatureCollection",
            "context": {"limit": self.limit, "returned": features.len()},
            "features": features,
        });
        if let Value::Object(envelope) = &mut envelope {
            if let Some(next) = next {
                let _ = envelope.insert("next".to_string(), next.into());
            }
            if let Some(prev) = prev {
                let _ = envelope.insert("prev".to_string(), prev.into());
            }
        }
        Ok(envelope)
    }
}

fn project(features: Vec<Map<String, Value>>, fields: &Fields) -> Vec<Value> {
    features
        .into_iter()
        .map(|feature| Value::Object(fields.apply(feature)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{Page, ResponseFormat};
    use crate::{Cursor, Fields, Rel, SortBy};
    use serde_json::{json, Map, Value};

    fn feature(id: &str) -> Map<String, Value> {
        json!({"type": "Feature", "id": id, "collection": "c", "properties": {"foo": 1}})
            .as_object()
            .unwrap()
            .clone()
    }

    fn page(next: bool) -> Page {
        let sortby = [SortBy::asc("id")];
        Page {
            features: vec![feature("a")],
            limit: 1,
            next: next.then(|| Cursor::new(Rel::Next, ResponseFormat::Links, &sortby, &feature("a"))),
            prev: None,
        }
    }

    #[test]
    fn empty_links() {
        let page = Page {
            features: Vec::new(),
            limit: 10,
            next: None,
            prev: None,
        };
        assert_eq!(
            page.into_envelope(ResponseFormat::Links, "", &Fields::default())
                .unwrap(),
            json!({
                "features": [],
                "links": [
                    {"href": ".", "rel": "root", "type": "application/json"},
                    {"href": "./search", "rel": "self", "type": "application/json"},
                ],
                "numberReturned": 0,
                "type": "FeatureCollection",
            })
        );
    }

    #[test]
    fn empty_context() {
        let page = Page {
            features: Vec::new(),
            limit: 10,
            next: None,
            prev: None,
        };
        assert_eq!(
            page.into_envelope(ResponseFormat::Context, "", &Fields::default())
                .unwrap(),
            json!({
                "type": "FeatureCollection",
                "features": [],
                "context": {"limit": 10, "returned": 0},
            })
        );
    }

    #[test]
    fn base_url() {
        for base_url in ["http://example.test", "http://example.test/"] {
            let envelope = page(false)
                .into_envelope(ResponseFormat::Links, base_url, &Fields::default())
                .unwrap();
            assert_eq!(envelope["links"][0]["href"], "http://example.test/");
            assert_eq!(envelope["links"][1]["href"], "http://example.test/search");
        }
    }

    #[test]
    fn next_link_carries_the_token() {
        let page = page(true);
        let token = page.next_token().unwrap().unwrap();
        let envelope = page
            .into_envelope(ResponseFormat::Links, "http://example.test", &Fields::default())
            .unwrap();
        let next = &envelope["links"][2];
        assert_eq!(next["rel"], "next");
        let href = next["href"].as_str().unwrap();
        assert!(href.starts_with("http://example.test/search?token=next%3A"));
        assert_eq!(Cursor::decode(href).unwrap(), Cursor::decode(&token).unwrap());
    }

    #[test]
    fn next_field_is_bare() {
        let page = page(true);
        let token = page.next_token().unwrap().unwrap();
        let envelope = page
            .into_envelope(ResponseFormat::Context, "", &Fields::default())
            .unwrap();
        assert_eq!(envelope["next"], token);
        assert!(envelope.get("prev").is_none());
        assert_eq!(envelope["context"]["returned"], 1);
    }

    #[test]
    fn projection() {
        let fields = Fields::new(vec!["id".to_string()], Vec::new()).unwrap();
        let envelope = page(false)
            .into_envelope(ResponseFormat::Links, "", &fields)
            .unwrap();
        assert_eq!(envelope["features"][0], json!({"id": "a", "collection": "c"}));
    }

    #[test]
    fn versions() {
        assert_eq!(
            ResponseFormat::from_version("v0.8.0").unwrap(),
            ResponseFormat::Links
        );
        assert_eq!(
            ResponseFormat::from_version("1.0.0").unwrap(),
            ResponseFormat::Links
        );
        assert_eq!(
            ResponseFormat::from_version("0.6.13").unwrap(),
            ResponseFormat::Context
        );
        assert!(ResponseFormat::from_version("unreleased").is_err());
    }
}
