use thiserror::Error;

/// Crate-specific error enum.
#[derive(Debug, Error)]
pub enum Error {
    /// A boxed error.
    ///
    /// Used to capture generic errors from [tokio_postgres::types::FromSql].
    #[error(transparent)]
    Boxed(#[from] Box<dyn std::error::Error + Sync + Send>),

    /// A failure reported by the catalog store, with its message preserved.
    #[error("{0}")]
    Catalog(String),

    /// [::config::ConfigError]
    #[error(transparent)]
    Config(#[from] ::config::ConfigError),

    /// The same field was both included and excluded.
    #[error("field is both included and excluded: {0}")]
    ConflictingFieldSelection(String),

    /// A filter expression could not be parsed.
    ///
    /// `fragment` is the input text for a CQL2-text syntax error, otherwise the
    /// path of the offending node, such as `$.args[1]`.
    #[error("could not parse filter at {fragment:?}: {message}")]
    FilterParse {
        /// The offending text or node path.
        fragment: String,

        /// What went wrong.
        message: String,
    },

    /// [geojson::Error]
    #[error(transparent)]
    Geojson(#[from] geojson::Error),

    /// A well-formed cursor that belongs to another response format or sort order.
    #[error("incompatible cursor: {0}")]
    IncompatibleCursor(String),

    /// A malformed cursor.
    #[error("invalid cursor: {0}")]
    InvalidCursor(String),

    /// The `intersects` geometry is not valid GeoJSON.
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    /// A search argument has the wrong shape or value.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// [bb8::RunError]
    #[error(transparent)]
    Run(#[from] bb8::RunError<tokio_postgres::Error>),

    /// [serde_json::Error]
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),

    /// [tokio_postgres::Error]
    #[error(transparent)]
    TokioPostgres(#[from] tokio_postgres::Error),

    /// An unknown error.
    ///
    /// Used when [tokio_postgres::types::FromSql] doesn't have a source.
    #[error("unknown error")]
    Unknown,
}

impl Error {
    /// Returns true if this error was surfaced by the catalog store rather
    /// than raised while validating a search.
    pub fn is_catalog(&self) -> bool {
        matches!(
            self,
            Error::Boxed(_)
                | Error::Catalog(_)
                | Error::Run(_)
                | Error::TokioPostgres(_)
                | Error::Unknown
        )
    }

    pub(crate) fn filter_parse(fragment: impl ToString, message: impl ToString) -> Error {
        Error::FilterParse {
            fragment: fragment.to_string(),
            message: message.to_string(),
        }
    }
}

/// Crate-specific result type.
pub type Result<T> = std::result::Result<T, Error>;
