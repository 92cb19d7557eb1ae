use crate::{
    catalog::Plan, sort_by::Direction, Catalog, ComparisonOp, Cursor, Page, Predicate, Rel,
    ResponseFormat, Result, SearchArgs, SearchQuery, Settings, SortBy,
};
use serde_json::Value;

/// Runs searches against a [Catalog].
///
/// Holds no state besides its [Settings], so one executor can serve any
/// number of concurrent searches.
#[derive(Clone, Debug, Default)]
pub struct Executor {
    settings: Settings,
}

impl Executor {
    /// Creates an executor with the given settings.
    pub fn new(settings: Settings) -> Executor {
        Executor { settings }
    }

    /// Returns this executor's settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Searches a catalog and returns the response envelope.
    ///
    /// # Examples
    ///
    /// ```
    /// use pgstac_search::{Executor, MemoryCatalog, SearchArgs, Settings};
    ///
    /// # tokio_test::block_on(async {
    /// let settings = Settings {
    ///     base_url: Some(String::new()),
    ///     ..Default::default()
    /// };
    /// let executor = Executor::new(settings);
    /// let envelope = executor
    ///     .search(&MemoryCatalog::new(), SearchArgs::default())
    ///     .await
    ///     .unwrap();
    /// assert_eq!(envelope["numberReturned"], 0);
    /// # })
    /// ```
    pub async fn search<C>(&self, catalog: &C, args: SearchArgs) -> Result<Value>
    where
        C: Catalog + ?Sized,
    {
        let query = SearchQuery::new(args, &self.settings)?;
        let fields = query.fields.clone();
        let (page, format) = self.page(catalog, query).await?;
        page.into_envelope(format, &self.settings.base_url(), &fields)
    }

    /// Fetches one page of a validated search, unprojected.
    pub async fn page<C>(&self, catalog: &C, query: SearchQuery) -> Result<(Page, ResponseFormat)>
    where
        C: Catalog + ?Sized,
    {
        let cursor = query.token.as_deref().map(Cursor::decode).transpose()?;
        let format = match self.settings.format {
            Some(format) => format,
            None => ResponseFormat::from_version(&catalog.version().await?)?,
        };
        let sortby = effective_sortby(&query.sortby);
        if let Some(cursor) = &cursor {
            cursor.check(format, &sortby)?;
        }

        let backwards = cursor.as_ref().map_or(false, |cursor| cursor.rel == Rel::Prev);
        let keyset = match &cursor {
            Some(cursor) => match keyset(cursor) {
                Some(keyset) => Some(keyset),
                None => {
                    tracing::debug!("cursor is at the end of the sort order");
                    return Ok((empty(query.limit), format));
                }
            },
            None => None,
        };
        let plan = Plan {
            ids: query.ids,
            collections: query.collections,
            bbox: query.bbox,
            intersects: query.intersects,
            datetime: query.datetime,
            filter: query.filter,
            keyset,
            sortby: if backwards {
                sortby.iter().map(SortBy::reverse).collect()
            } else {
                sortby.clone()
            },
            nulls_first: backwards,
            limit: query.limit.saturating_add(1),
        };
        tracing::debug!(?plan, "fetching");

        let mut features = catalog.fetch(&plan).await?;
        let has_more = features.len() as u64 > query.limit;
        features.truncate(usize::try_from(query.limit).unwrap_or(usize::MAX));
        if backwards {
            features.reverse();
        }
        let first = features
            .first()
            .map(|row| Cursor::new(Rel::Prev, format, &sortby, row));
        let last = features
            .last()
            .map(|row| Cursor::new(Rel::Next, format, &sortby, row));
        let (next, prev) = if backwards {
            (last, first.filter(|_| has_more))
        } else {
            (last.filter(|_| has_more), first.filter(|_| cursor.is_some()))
        };
        tracing::debug!(
            returned = features.len(),
            next = next.is_some(),
            prev = prev.is_some(),
            "fetched page"
        );
        Ok((
            Page {
                features,
                limit: query.limit,
                next,
                prev,
            },
            format,
        ))
    }
}

/// The requested sort, `-datetime` when none was asked for, with the id and
/// collection tiebreak appended.
pub fn effective_sortby(sortby: &[SortBy]) -> Vec<SortBy> {
    if sortby.is_empty() {
        SortBy::with_tiebreak(vec![SortBy::desc("datetime")])
    } else {
        SortBy::with_tiebreak(sortby.to_vec())
    }
}

fn empty(limit: u64) -> Page {
    Page {
        features: Vec::new(),
        limit,
        next: None,
        prev: None,
    }
}

/// Compiles a cursor into a predicate selecting the rows strictly past it,
/// in the cursor's direction, under its sort order with nulls last.
///
/// Returns `None` when no row can be past the cursor.
fn keyset(cursor: &Cursor) -> Option<Predicate> {
    let mut terms = Vec::new();
    let mut equal = Vec::new();
    for (sortby, value) in cursor.sortby.iter().zip(&cursor.values) {
        let past = match cursor.rel {
            Rel::Next => after(sortby, value),
            Rel::Prev => before(sortby, value),
        };
        if let Some(past) = past {
            let mut term = equal.clone();
            term.push(past);
            terms.push(Predicate::and(term));
        }
        equal.push(if value.is_null() {
            Predicate::IsNull(sortby.field.clone())
        } else {
            Predicate::comparison(ComparisonOp::Eq, &sortby.field, value.clone())
        });
    }
    if terms.is_empty() {
        None
    } else {
        Some(Predicate::or(terms))
    }
}

fn after(sortby: &SortBy, value: &Value) -> Option<Predicate> {
    if value.is_null() {
        return None;
    }
    let op = if sortby.direction == Direction::Asc {
        ComparisonOp::Gt
    } else {
        ComparisonOp::Lt
    };
    Some(Predicate::or(vec![
        Predicate::comparison(op, &sortby.field, value.clone()),
        Predicate::IsNull(sortby.field.clone()),
    ]))
}

fn before(sortby: &SortBy, value: &Value) -> Option<Predicate> {
    if value.is_null() {
        return Some(Predicate::not(Predicate::IsNull(sortby.field.clone())));
    }
    let op = if sortby.direction == Direction::Asc {
        ComparisonOp::Lt
    } else {
        ComparisonOp::Gt
    };
    Some(Predicate::comparison(op, &sortby.field, value.clone()))
}

#[cfg(test)]
mod tests {
    use super::{effective_sortby, keyset};
    use crate::{Cursor, Predicate, Rel, ResponseFormat, SortBy};
    use serde_json::{json, Map, Value};

    fn cursor(rel: Rel, values: Vec<Value>) -> Cursor {
        Cursor {
            rel,
            format: ResponseFormat::Links,
            sortby: vec![SortBy::desc("bar"), SortBy::asc("id")],
            values,
        }
    }

    fn row(id: &str, bar: Value) -> Map<String, Value> {
        json!({"id": id, "properties": {"bar": bar}})
            .as_object()
            .unwrap()
            .clone()
    }

    #[test]
    fn default_sort() {
        assert_eq!(
            effective_sortby(&[]),
            vec![
                SortBy::desc("datetime"),
                SortBy::asc("id"),
                SortBy::asc("collection")
            ]
        );
        assert_eq!(
            effective_sortby(&[SortBy::asc("id")]),
            vec![SortBy::asc("id"), SortBy::asc("collection")]
        );
    }

    #[test]
    fn after_a_value() {
        let predicate = keyset(&cursor(Rel::Next, vec![json!(2), json!("b")])).unwrap();
        assert!(predicate.matches(&row("a", json!(1))));
        assert!(predicate.matches(&row("c", json!(2))));
        assert!(predicate.matches(&row("a", Value::Null)));
        assert!(!predicate.matches(&row("b", json!(2))));
        assert!(!predicate.matches(&row("a", json!(2))));
        assert!(!predicate.matches(&row("z", json!(3))));
    }

    #[test]
    fn after_a_null() {
        let predicate = keyset(&cursor(Rel::Next, vec![Value::Null, json!("b")])).unwrap();
        assert!(predicate.matches(&row("c", Value::Null)));
        assert!(!predicate.matches(&row("a", Value::Null)));
        assert!(!predicate.matches(&row("c", json!(1))));
    }

    #[test]
    fn before_a_value() {
        let predicate = keyset(&cursor(Rel::Prev, vec![json!(2), json!("b")])).unwrap();
        assert!(predicate.matches(&row("z", json!(3))));
        assert!(predicate.matches(&row("a", json!(2))));
        assert!(!predicate.matches(&row("c", json!(2))));
        assert!(!predicate.matches(&row("a", json!(1))));
        assert!(!predicate.matches(&row("a", Value::Null)));
    }

    #[test]
    fn before_a_null() {
        let predicate = keyset(&cursor(Rel::Prev, vec![Value::Null, json!("b")])).unwrap();
        assert!(predicate.matches(&row("z", json!(1))));
        assert!(predicate.matches(&row("a", Value::Null)));
        assert!(!predicate.matches(&row("c", Value::Null)));
    }

    #[test]
    fn mixed_kinds_follow_the_sort_order() {
        let predicate = keyset(&cursor(Rel::Next, vec![json!(2), json!("b")])).unwrap();
        assert!(predicate.matches_in_sort_order(&row("a", json!(true))));
        assert!(!predicate.matches_in_sort_order(&row("a", json!("z"))));
        assert!(!predicate.matches(&row("a", json!(true))));
    }

    #[test]
    fn nothing_past_the_end() {
        let cursor = Cursor {
            rel: Rel::Next,
            format: ResponseFormat::Links,
            sortby: vec![SortBy::asc("id")],
            values: vec![Value::Null],
        };
        assert_eq!(keyset(&cursor), None::<Predicate>);
    }
}
