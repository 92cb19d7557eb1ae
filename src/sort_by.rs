use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// The fields every sort order ends with, so that no two rows tie.
///
/// Items are keyed by collection and id, so both are needed.
pub const TIEBREAK_FIELDS: [&str; 2] = ["id", "collection"];

/// Sort direction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Ascending.
    #[default]
    Asc,

    /// Descending.
    Desc,
}

/// Sort by.
///
/// Serializes to the `{"field": ..., "direction": ...}` shape **pgstac**
/// expects in a search body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortBy {
    /// The field to sort by.
    pub field: String,

    /// The direction to sort by.
    pub direction: Direction,
}

impl Direction {
    /// Returns the opposite direction.
    pub fn reverse(self) -> Direction {
        match self {
            Direction::Asc => Direction::Desc,
            Direction::Desc => Direction::Asc,
        }
    }
}

impl SortBy {
    /// Sorts ascending by `field`.
    pub fn asc(field: impl ToString) -> SortBy {
        SortBy {
            field: field.to_string(),
            direction: Direction::Asc,
        }
    }

    /// Sorts descending by `field`.
    pub fn desc(field: impl ToString) -> SortBy {
        SortBy {
            field: field.to_string(),
            direction: Direction::Desc,
        }
    }

    /// Returns this sort with its direction flipped.
    pub fn reverse(&self) -> SortBy {
        SortBy {
            field: self.field.clone(),
            direction: self.direction.reverse(),
        }
    }

    /// Appends each of the [TIEBREAK_FIELDS] that `sortby` does not already
    /// sort by, ascending.
    pub fn with_tiebreak(mut sortby: Vec<SortBy>) -> Vec<SortBy> {
        for field in TIEBREAK_FIELDS {
            if !sortby.iter().any(|s| s.field == field) {
                sortby.push(SortBy::asc(field));
            }
        }
        sortby
    }
}

impl FromStr for SortBy {
    type Err = Error;

    fn from_str(s: &str) -> Result<SortBy> {
        let s = s.trim();
        let sortby = if let Some(field) = s.strip_prefix('-') {
            SortBy::desc(field.trim())
        } else if let Some(field) = s.strip_prefix('+') {
            SortBy::asc(field.trim())
        } else {
            SortBy::asc(s)
        };
        if sortby.field.is_empty() {
            Err(Error::InvalidParameter(format!(
                "sortby expression has no field: {s:?}"
            )))
        } else {
            Ok(sortby)
        }
    }
}

impl fmt::Display for SortBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.direction {
            Direction::Asc => write!(f, "+{}", self.field),
            Direction::Desc => write!(f, "-{}", self.field),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Direction, SortBy};

    #[test]
    fn parse_prefixes() {
        assert_eq!("foo".parse::<SortBy>().unwrap(), SortBy::asc("foo"));
        assert_eq!("+foo".parse::<SortBy>().unwrap(), SortBy::asc("foo"));
        assert_eq!("-foo".parse::<SortBy>().unwrap(), SortBy::desc("foo"));
        assert_eq!(
            " -eo:cloud_cover ".parse::<SortBy>().unwrap().field,
            "eo:cloud_cover"
        );
    }

    #[test]
    fn parse_empty() {
        assert!("".parse::<SortBy>().is_err());
        assert!("-".parse::<SortBy>().is_err());
    }

    #[test]
    fn display_parses_back() {
        for sortby in [SortBy::asc("foo"), SortBy::desc("properties.bar")] {
            assert_eq!(sortby.to_string().parse::<SortBy>().unwrap(), sortby);
        }
    }

    #[test]
    fn tiebreak() {
        let sortby = SortBy::with_tiebreak(vec![SortBy::desc("bar")]);
        assert_eq!(
            sortby,
            vec![SortBy::desc("bar"), SortBy::asc("id"), SortBy::asc("collection")]
        );
        let sortby = SortBy::with_tiebreak(vec![SortBy::desc("collection"), SortBy::desc("id")]);
        assert_eq!(sortby, vec![SortBy::desc("collection"), SortBy::desc("id")]);
    }

    #[test]
    fn serialize() {
        let value = serde_json::to_value(SortBy::desc("datetime")).unwrap();
        assert_eq!(value["direction"], "desc");
        assert_eq!(Direction::Desc.reverse(), Direction::Asc);
    }
}
