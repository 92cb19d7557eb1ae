//! Search settings and the process-wide base url.

use crate::ResponseFormat;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::Deserialize;

static BASE_URL: Lazy<RwLock<String>> = Lazy::new(|| RwLock::new(String::new()));

/// Sets the process-wide base url used to render links.
///
/// Concurrent writers race; the last write wins. Searches read the value once,
/// when they build their envelope.
pub fn set_base_url(base_url: impl Into<String>) {
    let base_url = base_url.into();
    tracing::debug!(%base_url, "setting base url");
    *BASE_URL.write() = base_url;
}

/// Returns the process-wide base url, empty unless [set_base_url] was called.
pub fn base_url() -> String {
    BASE_URL.read().clone()
}

/// What to do with a `limit` above [Settings::max_limit].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitPolicy {
    /// Use `max_limit` instead.
    #[default]
    Clamp,

    /// Fail with [crate::Error::InvalidParameter].
    Reject,
}

/// Search settings.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Base url for links.
    ///
    /// `None` reads the process-wide value ([base_url]) at search time.
    pub base_url: Option<String>,

    /// Page size when a search doesn't set a limit.
    pub default_limit: u64,

    /// Largest page size.
    pub max_limit: u64,

    /// What to do with limits above `max_limit`.
    pub limit_policy: LimitPolicy,

    /// Pins the response format instead of probing the catalog version.
    pub format: Option<ResponseFormat>,
}

fn default_limit() -> u64 {
    10
}

fn default_max_limit() -> u64 {
    10_000
}

impl Default for Settings {
    fn default() -> Settings {
        Settings {
            base_url: None,
            default_limit: default_limit(),
            max_limit: default_max_limit(),
            limit_policy: LimitPolicy::default(),
            format: None,
        }
    }
}

impl Settings {
    /// Loads settings from an optional `pgstac-search` config file and from
    /// `PGSTAC_SEARCH__*` environment variables.
    pub fn load() -> crate::Result<Settings> {
        let config = ::config::Config::builder()
            .add_source(::config::File::with_name("pgstac-search").required(false))
            .add_source(
                ::config::Environment::with_prefix("PGSTAC_SEARCH")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        config.try_deserialize().map_err(crate::Error::from)
    }

    /// Returns the base url searches should render links against right now.
    pub fn base_url(&self) -> String {
        match &self.base_url {
            Some(base_url) => base_url.clone(),
            None => base_url(),
        }
    }
}
