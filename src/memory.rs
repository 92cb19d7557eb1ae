//! A catalog that keeps everything in memory.
//!
//! Useful for tests and for serving small, static catalogs. It speaks the
//! same CRUD vocabulary as [crate::Client] and fails with the same messages
//! **pgstac** does.

use crate::{catalog::Plan, filter, sort_by::Direction, Catalog, Error, Interval, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use geo::{BoundingRect, Coord, Intersects, Rect};
use serde_json::{json, Map, Value};
use stac::{Collection, Item};
use std::{cmp::Ordering, collections::BTreeMap, sync::Arc};
use tokio::sync::RwLock;

/// The **pgstac** version an in-memory catalog reports by default.
pub const DEFAULT_VERSION: &str = "0.9.0";

/// An in-memory catalog.
///
/// Clones share the same store.
#[derive(Clone, Debug)]
pub struct MemoryCatalog {
    version: String,
    store: Arc<RwLock<Store>>,
}

#[derive(Debug, Default)]
struct Store {
    collections: BTreeMap<String, Map<String, Value>>,
    items: BTreeMap<(String, String), Map<String, Value>>,
}

impl MemoryCatalog {
    /// Creates an empty catalog.
    pub fn new() -> MemoryCatalog {
        MemoryCatalog {
            version: DEFAULT_VERSION.to_string(),
            store: Arc::new(RwLock::new(Store::default())),
        }
    }

    /// Reports `version` instead of [DEFAULT_VERSION].
    ///
    /// # Examples
    ///
    /// ```
    /// use pgstac_search::MemoryCatalog;
    ///
    /// let catalog = MemoryCatalog::new().with_version("0.7.10");
    /// ```
    pub fn with_version(mut self, version: impl ToString) -> MemoryCatalog {
        self.version = version.to_string();
        self
    }

    /// Fetches all collections.
    pub async fn collections(&self) -> Result<Vec<Collection>> {
        let store = self.store.read().await;
        store
            .collections
            .values()
            .map(|collection| from_map(collection.clone()))
            .collect()
    }

    /// Fetches a collection by id.
    pub async fn collection(&self, id: &str) -> Result<Option<Collection>> {
        let store = self.store.read().await;
        store.collections.get(id).cloned().map(from_map).transpose()
    }

    /// Adds a collection.
    pub async fn add_collection(&self, collection: Collection) -> Result<()> {
        let collection = to_map(collection)?;
        let id = id(&collection)?;
        let mut store = self.store.write().await;
        if store.collections.contains_key(&id) {
            return Err(Error::Catalog(format!("collection {id} already exists")));
        }
        tracing::debug!(%id, "adding collection");
        let _ = store.collections.insert(id, collection);
        Ok(())
    }

    /// Adds or updates a collection.
    pub async fn upsert_collection(&self, collection: Collection) -> Result<()> {
        let collection = to_map(collection)?;
        let id = id(&collection)?;
        let _ = self.store.write().await.collections.insert(id, collection);
        Ok(())
    }

    /// Updates a collection.
    pub async fn update_collection(&self, collection: Collection) -> Result<()> {
        let collection = to_map(collection)?;
        let id = id(&collection)?;
        let mut store = self.store.write().await;
        match store.collections.get_mut(&id) {
            Some(existing) => {
                *existing = collection;
                Ok(())
            }
            None => Err(no_rows()),
        }
    }

    /// Deletes a collection.
    ///
    /// Items in the collection are left in place.
    pub async fn delete_collection(&self, id: &str) -> Result<()> {
        match self.store.write().await.collections.remove(id) {
            Some(_) => Ok(()),
            None => Err(no_rows()),
        }
    }

    /// Replaces each collection's extent with the bounds of its items.
    ///
    /// Collections without items keep their extent, and so does each part of
    /// an extent the items say nothing about.
    pub async fn update_collection_extents(&self) -> Result<()> {
        let mut store = self.store.write().await;
        let mut extents: BTreeMap<String, Extent> = BTreeMap::new();
        for ((collection, _), item) in &store.items {
            extents.entry(collection.clone()).or_default().add(item);
        }
        for (id, extent) in extents {
            if let Some(collection) = store.collections.get_mut(&id) {
                tracing::debug!(%id, ?extent, "updating collection extent");
                extent.apply(collection);
            }
        }
        Ok(())
    }

    /// Fetches an item, optionally from a specific collection.
    pub async fn item(&self, id: &str, collection: Option<&str>) -> Result<Option<Item>> {
        let store = self.store.read().await;
        store
            .items
            .iter()
            .find(|((c, i), _)| i == id && collection.map_or(true, |collection| c == collection))
            .map(|(_, item)| from_map(item.clone()))
            .transpose()
    }

    /// Adds an item.
    pub async fn add_item(&self, item: Item) -> Result<()> {
        self.add_items(&[item]).await
    }

    /// Adds items, all or nothing.
    pub async fn add_items(&self, items: &[Item]) -> Result<()> {
        let mut store = self.store.write().await;
        let mut staged = Vec::with_capacity(items.len());
        for item in items {
            let (key, item) = store.stage(item)?;
            if store.items.contains_key(&key) || staged.iter().any(|(k, _)| k == &key) {
                return Err(Error::Catalog(format!(
                    "item {} already exists in collection {}",
                    key.1, key.0
                )));
            }
            staged.push((key, item));
        }
        store.items.extend(staged);
        Ok(())
    }

    /// Updates an item.
    pub async fn update_item(&self, item: Item) -> Result<()> {
        let mut store = self.store.write().await;
        let (key, item) = store.stage(&item)?;
        match store.items.get_mut(&key) {
            Some(existing) => {
                *existing = item;
                Ok(())
            }
            None => Err(no_rows()),
        }
    }

    /// Adds or updates an item.
    pub async fn upsert_item(&self, item: Item) -> Result<()> {
        self.upsert_items(&[item]).await
    }

    /// Adds or updates items, all or nothing.
    pub async fn upsert_items(&self, items: &[Item]) -> Result<()> {
        let mut store = self.store.write().await;
        let staged = items
            .iter()
            .map(|item| store.stage(item))
            .collect::<Result<Vec<_>>>()?;
        store.items.extend(staged);
        Ok(())
    }

    /// Deletes an item, optionally from a specific collection.
    pub async fn delete_item(&self, id: &str, collection: Option<&str>) -> Result<()> {
        let mut store = self.store.write().await;
        let before = store.items.len();
        store
            .items
            .retain(|(c, i), _| !(i == id && collection.map_or(true, |collection| c == collection)));
        if store.items.len() == before {
            Err(no_rows())
        } else {
            Ok(())
        }
    }
}

impl Default for MemoryCatalog {
    fn default() -> MemoryCatalog {
        MemoryCatalog::new()
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn version(&self) -> Result<String> {
        Ok(self.version.clone())
    }

    async fn fetch(&self, plan: &Plan) -> Result<Vec<Map<String, Value>>> {
        let bbox = plan.bbox.as_deref().map(bbox_geometry);
        let intersects = plan
            .intersects
            .clone()
            .map(geo::Geometry::<f64>::try_from)
            .transpose()?;
        let store = self.store.read().await;
        let mut rows: Vec<Map<String, Value>> = store
            .items
            .iter()
            .filter(|((collection, id), _)| {
                (plan.ids.is_empty() || plan.ids.contains(id))
                    && (plan.collections.is_empty() || plan.collections.contains(collection))
            })
            .map(|(_, item)| item)
            .filter(|item| {
                let spatial = || geometry(item);
                bbox.as_ref()
                    .map_or(true, |bbox| spatial().map_or(false, |g| g.intersects(bbox)))
                    && intersects
                        .as_ref()
                        .map_or(true, |other| spatial().map_or(false, |g| g.intersects(other)))
                    && plan
                        .datetime
                        .map_or(true, |interval| temporal_match(item, interval))
                    && plan
                        .filter
                        .as_ref()
                        .map_or(true, |filter| filter.matches(item))
                    && plan
                        .keyset
                        .as_ref()
                        .map_or(true, |keyset| keyset.matches_in_sort_order(item))
            })
            .cloned()
            .collect();
        drop(store);
        rows.sort_by(|a, b| {
            plan.sortby
                .iter()
                .map(|sortby| {
                    let ordering = match (
                        filter::lookup(a, &sortby.field),
                        filter::lookup(b, &sortby.field),
                    ) {
                        (Some(a), Some(b)) => filter::total_order(a, b),
                        (Some(_), None) if plan.nulls_first => return Ordering::Greater,
                        (Some(_), None) => return Ordering::Less,
                        (None, Some(_)) if plan.nulls_first => return Ordering::Less,
                        (None, Some(_)) => return Ordering::Greater,
                        (None, None) => Ordering::Equal,
                    };
                    match sortby.direction {
                        Direction::Asc => ordering,
                        Direction::Desc => ordering.reverse(),
                    }
                })
                .find(|ordering| ordering.is_ne())
                .unwrap_or(Ordering::Equal)
        });
        rows.truncate(usize::try_from(plan.limit).unwrap_or(usize::MAX));
        tracing::debug!(returned = rows.len(), "fetched from memory");
        Ok(rows)
    }
}

impl Store {
    fn stage(&self, item: &Item) -> Result<((String, String), Map<String, Value>)> {
        let item = to_map(item)?;
        let id = id(&item)?;
        let collection = item
            .get("collection")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Catalog(format!("item {id} has no collection")))?
            .to_string();
        if !self.collections.contains_key(&collection) {
            return Err(Error::Catalog(format!(
                "collection {collection} does not exist"
            )));
        }
        Ok(((collection, id), item))
    }
}

#[derive(Debug, Default)]
struct Extent {
    bounds: Option<Rect<f64>>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
}

impl Extent {
    fn add(&mut self, item: &Map<String, Value>) {
        if let Some(rect) = geometry(item).and_then(|geometry| geometry.bounding_rect()) {
            self.bounds = Some(match self.bounds {
                Some(bounds) => Rect::new(
                    Coord {
                        x: bounds.min().x.min(rect.min().x),
                        y: bounds.min().y.min(rect.min().y),
                    },
                    Coord {
                        x: bounds.max().x.max(rect.max().x),
                        y: bounds.max().y.max(rect.max().y),
                    },
                ),
                None => rect,
            });
        }
        if let Some((start, end)) = datetimes(item) {
            self.start = Some(self.start.map_or(start, |s| s.min(start)));
            self.end = Some(self.end.map_or(end, |e| e.max(end)));
        }
    }

    fn apply(&self, collection: &mut Map<String, Value>) {
        let extent = collection.entry("extent").or_insert_with(|| json!({}));
        let Some(extent) = extent.as_object_mut() else {
            return;
        };
        if let Some(bounds) = self.bounds {
            let bbox = [bounds.min().x, bounds.min().y, bounds.max().x, bounds.max().y];
            let _ = extent.insert("spatial".to_string(), json!({"bbox": [bbox]}));
        }
        if let (Some(start), Some(end)) = (self.start, self.end) {
            let format =
                |datetime: DateTime<Utc>| datetime.to_rfc3339_opts(SecondsFormat::AutoSi, true);
            let _ = extent.insert(
                "temporal".to_string(),
                json!({"interval": [[format(start), format(end)]]}),
            );
        }
    }
}

fn to_map(value: impl serde::Serialize) -> Result<Map<String, Value>> {
    match serde_json::to_value(value)? {
        Value::Object(object) => Ok(object),
        value => Err(Error::Catalog(format!("expected an object, got {value}"))),
    }
}

fn from_map<T: serde::de::DeserializeOwned>(object: Map<String, Value>) -> Result<T> {
    serde_json::from_value(Value::Object(object)).map_err(Error::from)
}

fn id(object: &Map<String, Value>) -> Result<String> {
    object
        .get("id")
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| Error::Catalog("object has no id".to_string()))
}

fn no_rows() -> Error {
    Error::Catalog("query returned no rows".to_string())
}

fn bbox_geometry(bbox: &[f64]) -> geo::Geometry<f64> {
    let (min, max) = if bbox.len() == 6 {
        ((bbox[0], bbox[1]), (bbox[3], bbox[4]))
    } else {
        ((bbox[0], bbox[1]), (bbox[2], bbox[3]))
    };
    geo::Geometry::Polygon(Rect::new(min, max).to_polygon())
}

fn geometry(item: &Map<String, Value>) -> Option<geo::Geometry<f64>> {
    let value = item.get("geometry").filter(|value| !value.is_null())?;
    let geometry = geojson::Geometry::from_json_value(value.clone()).ok()?;
    geo::Geometry::<f64>::try_from(geometry).ok()
}

fn datetimes(item: &Map<String, Value>) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let properties = item.get("properties")?.as_object()?;
    let parse = |key: &str| {
        properties
            .get(key)
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|datetime| datetime.with_timezone(&Utc))
    };
    match parse("datetime") {
        Some(datetime) => Some((datetime, datetime)),
        None => Some((parse("start_datetime")?, parse("end_datetime")?)),
    }
}

fn temporal_match(item: &Map<String, Value>, interval: Interval) -> bool {
    datetimes(item).map_or(false, |(start, end)| interval.intersects(start, end))
}

#[cfg(test)]
mod tests {
    use super::MemoryCatalog;
    use crate::{catalog::Plan, Catalog, Error, SortBy};
    use serde_json::json;
    use stac::{Collection, Item};

    fn item(id: &str, collection: &str) -> Item {
        let mut item = Item::new(id);
        item.collection = Some(collection.to_string());
        item
    }

    fn plan() -> Plan {
        Plan {
            ids: Default::default(),
            collections: Default::default(),
            bbox: None,
            intersects: None,
            datetime: None,
            filter: None,
            keyset: None,
            sortby: vec![SortBy::asc("id")],
            nulls_first: false,
            limit: 100,
        }
    }

    #[tokio::test]
    async fn collections() {
        let catalog = MemoryCatalog::new();
        assert!(catalog.collections().await.unwrap().is_empty());
        let collection = Collection::new("an-id", "a description");
        catalog.add_collection(collection.clone()).await.unwrap();
        let err = catalog.add_collection(collection).await.unwrap_err();
        assert!(err.to_string().contains("already exists"));
        assert_eq!(catalog.collections().await.unwrap().len(), 1);
        assert!(catalog.collection("not-an-id").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_rows() {
        let catalog = MemoryCatalog::new();
        let collection = Collection::new("an-id", "a description");
        assert_eq!(
            catalog
                .update_collection(collection)
                .await
                .unwrap_err()
                .to_string(),
            "query returned no rows"
        );
        assert!(catalog.delete_collection("an-id").await.is_err());
        assert!(catalog.delete_item("an-id", None).await.is_err());
    }

    #[tokio::test]
    async fn items_need_a_collection() {
        let catalog = MemoryCatalog::new();
        let err = catalog.add_item(item("an-id", "missing")).await.unwrap_err();
        assert!(matches!(err, Error::Catalog(_)));
        assert!(err.to_string().contains("missing"));
        assert!(catalog.add_item(Item::new("an-id")).await.is_err());
    }

    #[tokio::test]
    async fn add_items_is_all_or_nothing() {
        let catalog = MemoryCatalog::new();
        catalog
            .add_collection(Collection::new("c", "a description"))
            .await
            .unwrap();
        assert!(catalog
            .add_items(&[item("a", "c"), item("a", "c")])
            .await
            .is_err());
        assert!(catalog.item("a", None).await.unwrap().is_none());
        catalog
            .upsert_items(&[item("a", "c"), item("b", "c")])
            .await
            .unwrap();
        catalog.upsert_item(item("a", "c")).await.unwrap();
        assert_eq!(catalog.fetch(&plan()).await.unwrap().len(), 2);
        catalog.delete_item("a", Some("c")).await.unwrap();
        assert!(catalog.item("a", Some("c")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fetch_sorts_nulls_last() {
        let catalog = MemoryCatalog::new();
        catalog
            .add_collection(Collection::new("c", "a description"))
            .await
            .unwrap();
        for (id, foo) in [("a", json!(2)), ("b", json!(null)), ("c", json!(1))] {
            let mut item = item(id, "c");
            let _ = item.properties.additional_fields.insert("foo".into(), foo);
            catalog.add_item(item).await.unwrap();
        }
        let ids = |rows: Vec<serde_json::Map<String, serde_json::Value>>| {
            rows.iter()
                .map(|row| row["id"].as_str().unwrap().to_string())
                .collect::<Vec<_>>()
        };
        let mut plan = plan();
        plan.sortby = vec![SortBy::asc("foo"), SortBy::asc("id")];
        assert_eq!(ids(catalog.fetch(&plan).await.unwrap()), ["c", "a", "b"]);
        plan.sortby = vec![SortBy::desc("foo"), SortBy::asc("id")];
        assert_eq!(ids(catalog.fetch(&plan).await.unwrap()), ["a", "c", "b"]);
        plan.nulls_first = true;
        plan.limit = 2;
        assert_eq!(ids(catalog.fetch(&plan).await.unwrap()), ["b", "a"]);
    }
}
