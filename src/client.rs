use crate::{catalog::Plan, Catalog, Error, Executor, Predicate, Result, SearchArgs};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use stac::{Collection, Item};
use tokio_postgres::{
    types::{ToSql, WasNull},
    GenericClient, Row,
};

/// Sort fields **pgstac** stores in non-null columns.
const NOT_NULL: [&str; 3] = ["id", "collection", "datetime"];

/// A **pgstac** client.
///
/// Not every **pgstac** function is provided, and some names are changed to
/// match Rust conventions.
#[derive(Debug)]
pub struct Client<C>(C)
where
    C: GenericClient;

impl<C: GenericClient> Client<C> {
    /// Creates a new client.
    pub fn new(client: C) -> Client<C> {
        Client(client)
    }

    /// Returns this client's inner client.
    pub fn into_inner(self) -> C {
        self.0
    }

    /// Returns the **pgstac** version.
    pub async fn version(&self) -> Result<String> {
        self.string("get_version", &[]).await
    }

    /// Returns the value of a **pgstac** setting.
    pub async fn setting(&self, setting: &str) -> Result<String> {
        self.string("get_setting", &[&setting]).await
    }

    /// Sets a **pgstac** setting for the rest of this session.
    pub async fn set_setting(&self, setting: &str, value: &str) -> Result<()> {
        tracing::debug!(setting, value, "setting pgstac setting");
        let _ = self
            .0
            .query_one(
                "SELECT set_config('pgstac.' || $1, $2, false)",
                &[&setting, &value],
            )
            .await?;
        Ok(())
    }

    /// Fetches all collections.
    pub async fn collections(&self) -> Result<Vec<Collection>> {
        self.vec("all_collections", &[]).await
    }

    /// Fetches a collection by id.
    pub async fn collection(&self, id: &str) -> Result<Option<Collection>> {
        self.opt("get_collection", &[&id]).await
    }

    /// Adds a collection.
    pub async fn add_collection(&self, collection: Collection) -> Result<()> {
        let collection = serde_json::to_value(collection)?;
        self.void("create_collection", &[&collection]).await
    }

    /// Adds or updates a collection.
    pub async fn upsert_collection(&self, collection: Collection) -> Result<()> {
        let collection = serde_json::to_value(collection)?;
        self.void("upsert_collection", &[&collection]).await
    }

    /// Updates a collection.
    pub async fn update_collection(&self, collection: Collection) -> Result<()> {
        let collection = serde_json::to_value(collection)?;
        self.void("update_collection", &[&collection]).await
    }

    /// Recomputes every collection's extent from its items.
    pub async fn update_collection_extents(&self) -> Result<()> {
        self.void("update_collection_extents", &[]).await
    }

    /// Deletes a collection.
    pub async fn delete_collection(&self, id: &str) -> Result<()> {
        self.void("delete_collection", &[&id]).await
    }

    /// Fetches an item, optionally from a specific collection.
    pub async fn item(&self, id: &str, collection: Option<&str>) -> Result<Option<Item>> {
        self.opt("get_item", &[&id, &collection]).await
    }

    /// Adds an item.
    pub async fn add_item(&self, item: Item) -> Result<()> {
        let item = serde_json::to_value(item)?;
        self.void("create_item", &[&item]).await
    }

    /// Adds items.
    pub async fn add_items(&self, items: &[Item]) -> Result<()> {
        let items = serde_json::to_value(items)?;
        self.void("create_items", &[&items]).await
    }

    /// Updates an item.
    pub async fn update_item(&self, item: Item) -> Result<()> {
        let item = serde_json::to_value(item)?;
        self.void("update_item", &[&item]).await
    }

    /// Upserts an item.
    pub async fn upsert_item(&self, item: Item) -> Result<()> {
        let item = serde_json::to_value(item)?;
        self.void("upsert_item", &[&item]).await
    }

    /// Upserts items.
    pub async fn upsert_items(&self, items: &[Item]) -> Result<()> {
        let items = serde_json::to_value(items)?;
        self.void("upsert_items", &[&items]).await
    }

    /// Deletes an item, optionally from a specific collection.
    pub async fn delete_item(&self, id: &str, collection: Option<&str>) -> Result<()> {
        self.void("delete_item", &[&id, &collection]).await
    }

    /// Runs **pgstac**'s own `search` function on a raw request body.
    pub async fn search_rows(&self, body: Value) -> Result<Value> {
        tracing::debug!(%body, "pgstac search");
        self.value("search", &[&body]).await
    }

    async fn query_one<'a>(
        &'a self,
        function: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> std::result::Result<Row, tokio_postgres::Error> {
        let param_string = (0..params.len())
            .map(|i| format!("${}", i + 1))
            .collect::<Vec<_>>()
            .join(", ");
        let query = format!("SELECT * from pgstac.{}({})", function, param_string);
        self.0.query_one(&query, params).await
    }

    async fn string(&self, function: &str, params: &[&(dyn ToSql + Sync)]) -> Result<String> {
        let row = self.query_one(function, params).await?;
        row.try_get(function).map_err(Error::from)
    }

    async fn vec<T>(&self, function: &str, params: &[&(dyn ToSql + Sync)]) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
    {
        Ok(self.opt(function, params).await?.unwrap_or_default())
    }

    async fn opt<T>(&self, function: &str, params: &[&(dyn ToSql + Sync)]) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        match self.value(function, params).await {
            Ok(value) => Ok(value),
            Err(Error::TokioPostgres(err)) => match err.into_source() {
                Some(err) if err.downcast_ref::<WasNull>().is_some() => Ok(None),
                Some(err) => Err(Error::from(err)),
                None => Err(Error::Unknown),
            },
            Err(err) => Err(err),
        }
    }

    async fn value<T>(&self, function: &str, params: &[&(dyn ToSql + Sync)]) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let row = self.query_one(function, params).await?;
        let value = row.try_get(function)?;
        serde_json::from_value(value).map_err(Error::from)
    }

    async fn void(&self, function: &str, params: &[&(dyn ToSql + Sync)]) -> Result<()> {
        let _ = self.query_one(function, params).await?;
        Ok(())
    }
}

impl<C: GenericClient + Send + Sync> Client<C> {
    /// Searches for items and returns the response envelope.
    ///
    /// Uses default [crate::Settings]; build an [Executor] for anything else.
    pub async fn search(&self, args: SearchArgs) -> Result<Value> {
        Executor::default().search(self, args).await
    }
}

#[async_trait]
impl<C: GenericClient + Send + Sync> Catalog for Client<C> {
    async fn version(&self) -> Result<String> {
        Client::version(self).await
    }

    async fn fetch(&self, plan: &Plan) -> Result<Vec<Map<String, Value>>> {
        match plan.sortby.first() {
            Some(sortby) if plan.nulls_first && !NOT_NULL.contains(&sortby.field.as_str()) => {
                self.fetch_nulls_first(plan, &sortby.field).await
            }
            _ => self.fetch_sorted(plan).await,
        }
    }
}

impl<C: GenericClient + Send + Sync> Client<C> {
    /// **pgstac** picks its own null placement, so rows that are null in the
    /// leading sort field are fetched on their own, first, and the rest after
    /// them.
    ///
    /// Within the non-null rows, later sort fields keep **pgstac**'s order.
    async fn fetch_nulls_first(
        &self,
        plan: &Plan,
        field: &str,
    ) -> Result<Vec<Map<String, Value>>> {
        let null = Predicate::IsNull(field.to_string());
        let nulls = Plan {
            filter: Some(narrow(plan, null.clone())),
            sortby: plan.sortby[1..].to_vec(),
            ..plan.clone()
        };
        let mut rows = Catalog::fetch(self, &nulls).await?;
        tracing::debug!(field, nulls = rows.len(), "fetched null rows first");
        let remaining = plan.limit.saturating_sub(rows.len() as u64);
        if remaining == 0 {
            return Ok(rows);
        }
        let values = Plan {
            filter: Some(narrow(plan, Predicate::not(null))),
            nulls_first: false,
            limit: remaining,
            ..plan.clone()
        };
        rows.extend(self.fetch_sorted(&values).await?);
        Ok(rows)
    }

    async fn fetch_sorted(&self, plan: &Plan) -> Result<Vec<Map<String, Value>>> {
        let body = search_body(plan)?;
        let mut response: Value = self.search_rows(body).await?;
        match response.get_mut("features").map(Value::take) {
            Some(Value::Array(features)) => features
                .into_iter()
                .map(|feature| match feature {
                    Value::Object(feature) => Ok(feature),
                    other => Err(Error::Catalog(format!("feature is not an object: {other}"))),
                })
                .collect(),
            Some(Value::Null) | None => Ok(Vec::new()),
            Some(other) => Err(Error::Catalog(format!(
                "search features are not an array: {other}"
            ))),
        }
    }
}

fn narrow(plan: &Plan, predicate: Predicate) -> Predicate {
    match &plan.filter {
        Some(filter) => Predicate::and(vec![filter.clone(), predicate]),
        None => predicate,
    }
}

/// Compiles a plan into the body of a **pgstac** `search` call.
fn search_body(plan: &Plan) -> Result<Value> {
    let mut body = Map::new();
    if !plan.ids.is_empty() {
        let _ = body.insert("ids".into(), json!(plan.ids));
    }
    if !plan.collections.is_empty() {
        let _ = body.insert("collections".into(), json!(plan.collections));
    }
    if let Some(bbox) = &plan.bbox {
        let _ = body.insert("bbox".into(), json!(bbox));
    }
    if let Some(intersects) = &plan.intersects {
        let _ = body.insert("intersects".into(), serde_json::to_value(intersects)?);
    }
    if let Some(datetime) = &plan.datetime {
        let _ = body.insert("datetime".into(), datetime.to_string().into());
    }
    if let Some(filter) = plan.predicate() {
        let _ = body.insert("filter".into(), filter.to_cql2_json());
        let _ = body.insert("filter-lang".into(), "cql2-json".into());
    }
    let _ = body.insert("sortby".into(), serde_json::to_value(&plan.sortby)?);
    let _ = body.insert("limit".into(), plan.limit.into());
    Ok(Value::Object(body))
}
