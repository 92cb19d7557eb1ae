//! Search compiler and cursor pagination for **pgstac**.
//!
//! Search arguments are validated into a [SearchQuery], compiled into a
//! [catalog::Plan], run against a [Catalog], and rendered into one of the two
//! response envelopes **pgstac** has used over its history ([ResponseFormat]).
//! Pages are linked with opaque keyset cursors ([Cursor]).
//!
//! Catalogs:
//!
//! - [Client] wraps anything implementing [tokio_postgres::GenericClient],
//! - [PgstacPool] checks connections out of a bb8 pool,
//! - [MemoryCatalog] keeps everything in memory.
//!
//! # Examples
//!
//! ```
//! use pgstac_search::{Executor, MemoryCatalog, SearchArgs, Settings};
//! use stac::{Collection, Item};
//!
//! # tokio_test::block_on(async {
//! let catalog = MemoryCatalog::new();
//! catalog
//!     .add_collection(Collection::new("simple-collection", "a description"))
//!     .await
//!     .unwrap();
//! let mut item = Item::new("20201211_223832_CS2");
//! item.collection = Some("simple-collection".to_string());
//! catalog.add_item(item).await.unwrap();
//!
//! let executor = Executor::new(Settings {
//!     base_url: Some("http://example.test".to_string()),
//!     ..Default::default()
//! });
//! let args = SearchArgs {
//!     ids: Some("20201211_223832_CS2".into()),
//!     ..Default::default()
//! };
//! let envelope = executor.search(&catalog, args).await.unwrap();
//! assert_eq!(envelope["numberReturned"], 1);
//! assert_eq!(envelope["links"][1]["href"], "http://example.test/search");
//! # })
//! ```

pub mod catalog;
mod client;
pub mod config;
mod cursor;
mod error;
mod executor;
mod fields;
pub mod filter;
mod memory;
mod page;
mod pool;
mod search;
pub mod sort_by;

pub use crate::{
    catalog::{Catalog, Plan},
    client::Client,
    config::{LimitPolicy, Settings},
    cursor::{Cursor, Rel},
    error::{Error, Result},
    executor::{effective_sortby, Executor},
    fields::Fields,
    filter::{ComparisonOp, LogicalOp, Predicate},
    memory::MemoryCatalog,
    page::{Page, ResponseFormat},
    pool::PgstacPool,
    search::{Interval, SearchArgs, SearchQuery, StringOrList, StringOrObject},
    sort_by::{Direction, SortBy},
};
