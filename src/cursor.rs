//! Pagination tokens.
//!
//! A token is `next:<value>` or `prev:<value>`, where the value is URL-safe
//! unpadded base64 of a JSON payload holding the response-format marker, the
//! sort signature, and the sort-key values of the boundary row. Format A pages
//! carry the token in the `token` query parameter of a link href; format B
//! pages carry it bare.

use crate::{filter, Error, ResponseFormat, Result, SortBy};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Which way a cursor pages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rel {
    /// Rows after the boundary row.
    Next,

    /// Rows before the boundary row.
    Prev,
}

/// A decoded pagination token.
#[derive(Clone, Debug, PartialEq)]
pub struct Cursor {
    /// Which way this cursor pages.
    pub rel: Rel,

    /// The response format that issued this cursor.
    pub format: ResponseFormat,

    /// The effective sort order, tiebreak included.
    pub sortby: Vec<SortBy>,

    /// The boundary row's value for each sort key; nulls included.
    pub values: Vec<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Payload {
    #[serde(rename = "v")]
    marker: String,

    #[serde(rename = "s")]
    sortby: Vec<String>,

    #[serde(rename = "k")]
    values: Vec<Value>,
}

impl Rel {
    fn as_str(self) -> &'static str {
        match self {
            Rel::Next => "next",
            Rel::Prev => "prev",
        }
    }
}

impl fmt::Display for Rel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Cursor {
    /// Creates a cursor positioned at `row`.
    ///
    /// Missing sort fields are recorded as nulls.
    pub fn new(
        rel: Rel,
        format: ResponseFormat,
        sortby: &[SortBy],
        row: &Map<String, Value>,
    ) -> Cursor {
        let values = sortby
            .iter()
            .map(|sortby| filter::lookup(row, &sortby.field).cloned().unwrap_or(Value::Null))
            .collect();
        Cursor {
            rel,
            format,
            sortby: sortby.to_vec(),
            values,
        }
    }

    /// Encodes this cursor as a bare `<rel>:<value>` token.
    ///
    /// # Examples
    ///
    /// ```
    /// use pgstac_search::{Cursor, ResponseFormat, Rel, SortBy};
    /// use serde_json::json;
    ///
    /// let cursor = Cursor {
    ///     rel: Rel::Next,
    ///     format: ResponseFormat::Context,
    ///     sortby: vec![SortBy::desc("datetime"), SortBy::asc("id")],
    ///     values: vec![json!(null), json!("an-id")],
    /// };
    /// let token = cursor.encode().unwrap();
    /// assert!(token.starts_with("next:"));
    /// assert_eq!(Cursor::decode(&token).unwrap(), cursor);
    /// ```
    pub fn encode(&self) -> Result<String> {
        let payload = Payload {
            marker: self.format.marker().to_string(),
            sortby: self.sortby.iter().map(SortBy::to_string).collect(),
            values: self.values.clone(),
        };
        let bytes = serde_json::to_vec(&payload)?;
        let token = format!("{}:{}", self.rel, URL_SAFE_NO_PAD.encode(bytes));
        tracing::trace!(%token, "encoded cursor");
        Ok(token)
    }

    /// Decodes a token, bare or embedded in a link href.
    ///
    /// Malformed tokens are [Error::InvalidCursor]; tokens carrying an unknown
    /// format marker are [Error::IncompatibleCursor].
    pub fn decode(token: &str) -> Result<Cursor> {
        let token = token_from_href(token)?;
        let (rel, value) = match token.split_once(':') {
            Some(("next", value)) => (Rel::Next, value),
            Some(("prev", value)) => (Rel::Prev, value),
            _ => {
                return Err(Error::InvalidCursor(format!(
                    "expected next:<value> or prev:<value>, got {token:?}"
                )))
            }
        };
        let bytes = URL_SAFE_NO_PAD
            .decode(value)
            .map_err(|err| Error::InvalidCursor(err.to_string()))?;
        let payload: Payload =
            serde_json::from_slice(&bytes).map_err(|err| Error::InvalidCursor(err.to_string()))?;
        let format = ResponseFormat::from_marker(&payload.marker).ok_or_else(|| {
            Error::IncompatibleCursor(format!("unknown cursor version {:?}", payload.marker))
        })?;
        let sortby = payload
            .sortby
            .iter()
            .map(|s| s.parse::<SortBy>())
            .collect::<Result<Vec<_>>>()
            .map_err(|err| Error::InvalidCursor(err.to_string()))?;
        if sortby.len() != payload.values.len() {
            return Err(Error::InvalidCursor(format!(
                "{} sort keys but {} values",
                sortby.len(),
                payload.values.len()
            )));
        }
        tracing::trace!(%rel, ?format, "decoded cursor");
        Ok(Cursor {
            rel,
            format,
            sortby,
            values: payload.values,
        })
    }

    /// Checks that this cursor can continue a search in `format` sorted by
    /// `sortby`.
    pub fn check(&self, format: ResponseFormat, sortby: &[SortBy]) -> Result<()> {
        if self.format != format {
            return Err(Error::IncompatibleCursor(format!(
                "cursor was issued for the {:?} response format, the catalog uses {:?}",
                self.format, format
            )));
        }
        if self.sortby != sortby {
            return Err(Error::IncompatibleCursor(format!(
                "cursor was issued for sort order {}, the search uses {}",
                signature(&self.sortby),
                signature(sortby)
            )));
        }
        Ok(())
    }
}

fn signature(sortby: &[SortBy]) -> String {
    sortby
        .iter()
        .map(SortBy::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn token_from_href(token: &str) -> Result<String> {
    let Some((_, query)) = token.split_once('?') else {
        return Ok(token.to_string());
    };
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == "token")
        .map(|(_, value)| value.into_owned())
        .ok_or_else(|| Error::InvalidCursor(format!("no token parameter in {token:?}")))
}
