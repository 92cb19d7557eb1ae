use crate::{config::LimitPolicy, Error, Fields, Predicate, Result, Settings, SortBy};
use chrono::{DateTime, SecondsFormat, Utc};
use geojson::Geometry;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::{collections::BTreeSet, fmt};

/// A string, or a list of strings.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum StringOrList {
    /// A single string.
    String(String),

    /// A list of strings.
    List(Vec<String>),
}

/// A string, or a JSON object.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum StringOrObject {
    /// Text, e.g. CQL2-text or serialized GeoJSON.
    String(String),

    /// A structured object, e.g. CQL2-JSON or a GeoJSON geometry.
    Object(Map<String, Value>),
}

/// Raw search arguments, as a caller hands them over.
///
/// Every field is optional. [SearchQuery::new] validates them.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SearchArgs {
    /// Collection ids.
    pub collections: Option<StringOrList>,

    /// Item ids.
    pub ids: Option<StringOrList>,

    /// A GeoJSON geometry, as an object or as text.
    pub intersects: Option<StringOrObject>,

    /// Four or six bounds.
    pub bbox: Option<Vec<f64>>,

    /// An RFC 3339 instant or a `start/end` interval with `..` for open ends.
    pub datetime: Option<String>,

    /// Fields to include, as a list or a comma-joined string.
    pub include: Option<StringOrList>,

    /// Fields to exclude, as a list or a comma-joined string.
    pub exclude: Option<StringOrList>,

    /// Sort expressions such as `-datetime` or `+id`.
    pub sortby: Option<StringOrList>,

    /// CQL2-text (a string) or CQL2-JSON (an object).
    pub filter: Option<StringOrObject>,

    /// The page size.
    pub limit: Option<u64>,

    /// A pagination token from a previous page.
    pub token: Option<String>,
}

/// A datetime interval; either end may be open.
///
/// # Examples
///
/// ```
/// use pgstac_search::Interval;
///
/// let interval: Interval = "2023-01-07T00:00:00Z/..".parse().unwrap();
/// assert!(interval.start.is_some());
/// assert!(interval.end.is_none());
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Interval {
    /// The start, inclusive.
    pub start: Option<DateTime<Utc>>,

    /// The end, inclusive.
    pub end: Option<DateTime<Utc>>,
}

/// A validated search.
#[derive(Clone, Debug, PartialEq)]
pub struct SearchQuery {
    /// Four or six bounds.
    pub bbox: Option<Vec<f64>>,

    /// Geometry that matching items must intersect.
    pub intersects: Option<Geometry>,

    /// Item ids; empty matches any.
    pub ids: BTreeSet<String>,

    /// Collection ids; empty matches any.
    pub collections: BTreeSet<String>,

    /// Temporal filter.
    pub datetime: Option<Interval>,

    /// Filter predicate.
    pub filter: Option<Predicate>,

    /// Requested sort order, without the tiebreak.
    pub sortby: Vec<SortBy>,

    /// Field projection.
    pub fields: Fields,

    /// Page size, between one and the configured maximum.
    pub limit: u64,

    /// Pagination token, decoded later against the response format.
    pub token: Option<String>,
}

impl StringOrList {
    /// Returns the strings, as given.
    pub fn into_vec(self) -> Vec<String> {
        match self {
            StringOrList::String(s) => vec![s],
            StringOrList::List(list) => list,
        }
    }

    /// Returns the strings, splitting each on commas and dropping empty parts.
    pub fn split_commas(self) -> Vec<String> {
        self.into_vec()
            .iter()
            .flat_map(|s| s.split(','))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    }
}

impl From<&str> for StringOrList {
    fn from(s: &str) -> StringOrList {
        StringOrList::String(s.to_string())
    }
}

impl From<String> for StringOrList {
    fn from(s: String) -> StringOrList {
        StringOrList::String(s)
    }
}

impl From<Vec<&str>> for StringOrList {
    fn from(list: Vec<&str>) -> StringOrList {
        StringOrList::List(list.into_iter().map(String::from).collect())
    }
}

impl From<Vec<String>> for StringOrList {
    fn from(list: Vec<String>) -> StringOrList {
        StringOrList::List(list)
    }
}

impl From<&str> for StringOrObject {
    fn from(s: &str) -> StringOrObject {
        StringOrObject::String(s.to_string())
    }
}

impl From<Map<String, Value>> for StringOrObject {
    fn from(object: Map<String, Value>) -> StringOrObject {
        StringOrObject::Object(object)
    }
}

impl SearchArgs {
    /// Deserializes search arguments from JSON.
    ///
    /// Shape errors (unknown keys, a bbox with strings in it) are
    /// [Error::InvalidParameter].
    pub fn from_value(value: Value) -> Result<SearchArgs> {
        serde_json::from_value(value).map_err(|err| Error::InvalidParameter(err.to_string()))
    }
}

impl Interval {
    fn parse_bound(s: &str) -> Result<Option<DateTime<Utc>>> {
        let s = s.trim();
        if s.is_empty() || s == ".." {
            Ok(None)
        } else {
            DateTime::parse_from_rfc3339(s)
                .map(|datetime| Some(datetime.with_timezone(&Utc)))
                .map_err(|err| Error::InvalidParameter(format!("invalid datetime {s:?}: {err}")))
        }
    }

    /// Returns true if `[start, end]` overlaps this interval.
    pub fn intersects(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start.map_or(true, |s| end >= s) && self.end.map_or(true, |e| start <= e)
    }
}

impl std::str::FromStr for Interval {
    type Err = Error;

    fn from_str(s: &str) -> Result<Interval> {
        match s.split_once('/') {
            Some((start, end)) => {
                let interval = Interval {
                    start: Interval::parse_bound(start)?,
                    end: Interval::parse_bound(end)?,
                };
                if let (Some(start), Some(end)) = (interval.start, interval.end) {
                    if start > end {
                        return Err(Error::InvalidParameter(format!(
                            "datetime interval ends before it starts: {s:?}"
                        )));
                    }
                }
                Ok(interval)
            }
            None => {
                let instant = Interval::parse_bound(s)?.ok_or_else(|| {
                    Error::InvalidParameter(format!("datetime has no instant: {s:?}"))
                })?;
                Ok(Interval {
                    start: Some(instant),
                    end: Some(instant),
                })
            }
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bound = |datetime: Option<DateTime<Utc>>| {
            datetime.map_or_else(
                || "..".to_string(),
                |datetime| datetime.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            )
        };
        if self.start.is_some() && self.start == self.end {
            write!(f, "{}", bound(self.start))
        } else {
            write!(f, "{}/{}", bound(self.start), bound(self.end))
        }
    }
}

impl SearchQuery {
    /// Validates and normalizes search arguments.
    ///
    /// # Examples
    ///
    /// ```
    /// use pgstac_search::{SearchArgs, SearchQuery, Settings};
    ///
    /// let args = SearchArgs {
    ///     ids: Some("an-id".into()),
    ///     sortby: Some(vec!["-bar", "+foo"].into()),
    ///     ..Default::default()
    /// };
    /// let query = SearchQuery::new(args, &Settings::default()).unwrap();
    /// assert!(query.ids.contains("an-id"));
    /// assert_eq!(query.sortby.len(), 2);
    /// assert_eq!(query.limit, 10);
    /// ```
    pub fn new(args: SearchArgs, settings: &Settings) -> Result<SearchQuery> {
        let bbox = args.bbox.map(validate_bbox).transpose()?;
        let intersects = args.intersects.map(parse_geometry).transpose()?;
        let datetime = args
            .datetime
            .as_deref()
            .map(str::parse::<Interval>)
            .transpose()?;
        let filter = match args.filter {
            Some(StringOrObject::String(text)) => Some(Predicate::parse_text(&text)?),
            Some(StringOrObject::Object(object)) => {
                Some(Predicate::parse_json(&Value::Object(object))?)
            }
            None => None,
        };
        let sortby = args
            .sortby
            .map(StringOrList::split_commas)
            .unwrap_or_default()
            .iter()
            .map(|s| s.parse::<SortBy>())
            .collect::<Result<Vec<_>>>()?;
        let fields = Fields::new(
            args.include.map(StringOrList::split_commas).unwrap_or_default(),
            args.exclude.map(StringOrList::split_commas).unwrap_or_default(),
        )?;
        let limit = validate_limit(args.limit, settings)?;
        Ok(SearchQuery {
            bbox,
            intersects,
            ids: set(args.ids),
            collections: set(args.collections),
            datetime,
            filter,
            sortby,
            fields,
            limit,
            token: args.token.filter(|token| !token.is_empty()),
        })
    }
}

fn set(value: Option<StringOrList>) -> BTreeSet<String> {
    value
        .map(StringOrList::into_vec)
        .unwrap_or_default()
        .into_iter()
        .collect()
}

fn validate_bbox(bbox: Vec<f64>) -> Result<Vec<f64>> {
    if bbox.len() != 4 && bbox.len() != 6 {
        return Err(Error::InvalidParameter(format!(
            "bbox must have 4 or 6 values, not {}",
            bbox.len()
        )));
    }
    if bbox.iter().any(|value| !value.is_finite()) {
        return Err(Error::InvalidParameter(format!(
            "bbox values must be finite: {bbox:?}"
        )));
    }
    Ok(bbox)
}

fn parse_geometry(intersects: StringOrObject) -> Result<Geometry> {
    let object = match intersects {
        StringOrObject::String(text) => match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(object)) => object,
            Ok(_) => {
                return Err(Error::InvalidGeometry(format!(
                    "not a GeoJSON object: {text}"
                )))
            }
            Err(err) => return Err(Error::InvalidGeometry(err.to_string())),
        },
        StringOrObject::Object(object) => object,
    };
    Geometry::from_json_object(object).map_err(|err| Error::InvalidGeometry(err.to_string()))
}

fn validate_limit(limit: Option<u64>, settings: &Settings) -> Result<u64> {
    let Some(limit) = limit else {
        return Ok(settings.default_limit.min(settings.max_limit));
    };
    if limit == 0 {
        return Err(Error::InvalidParameter("limit must be at least 1".to_string()));
    }
    if limit > settings.max_limit {
        match settings.limit_policy {
            LimitPolicy::Clamp => {
                tracing::warn!(limit, max_limit = settings.max_limit, "clamping limit");
                return Ok(settings.max_limit);
            }
            LimitPolicy::Reject => {
                return Err(Error::InvalidParameter(format!(
                    "limit {limit} exceeds the maximum of {}",
                    settings.max_limit
                )))
            }
        }
    }
    Ok(limit)
}
