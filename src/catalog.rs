use crate::{Interval, Predicate, Result, SortBy};
use async_trait::async_trait;
use geojson::Geometry;
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// A store of STAC items that can answer compiled searches.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Returns the **pgstac** version this catalog speaks.
    ///
    /// The response format is chosen from this value.
    async fn version(&self) -> Result<String>;

    /// Returns at most `plan.limit` rows matching `plan`, in `plan.sortby`
    /// order.
    async fn fetch(&self, plan: &Plan) -> Result<Vec<Map<String, Value>>>;
}

/// A compiled search, ready for a [Catalog].
#[derive(Clone, Debug, PartialEq)]
pub struct Plan {
    /// Item ids; empty matches any.
    pub ids: BTreeSet<String>,

    /// Collection ids; empty matches any.
    pub collections: BTreeSet<String>,

    /// Four or six bounds.
    pub bbox: Option<Vec<f64>>,

    /// Geometry that rows must intersect.
    pub intersects: Option<Geometry>,

    /// Temporal filter.
    pub datetime: Option<Interval>,

    /// The user filter.
    pub filter: Option<Predicate>,

    /// Rows strictly past the cursor, under `sortby` with nulls last.
    ///
    /// Compare its values the way rows are sorted, with
    /// [Predicate::matches_in_sort_order].
    pub keyset: Option<Predicate>,

    /// Fetch order, tiebreak included.
    pub sortby: Vec<SortBy>,

    /// Sort nulls before other values instead of after.
    ///
    /// Set when fetching backwards under a reversed sort.
    pub nulls_first: bool,

    /// Largest number of rows to return.
    pub limit: u64,
}

impl Plan {
    /// The user filter conjoined with the keyset, for stores that evaluate
    /// both in one pass.
    pub fn predicate(&self) -> Option<Predicate> {
        match (&self.filter, &self.keyset) {
            (Some(filter), Some(keyset)) => {
                Some(Predicate::and(vec![filter.clone(), keyset.clone()]))
            }
            (filter, keyset) => filter.clone().or_else(|| keyset.clone()),
        }
    }
}
