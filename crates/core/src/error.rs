//! Error types for the chat export serializer.

use thiserror::Error;

/// Boxed error returned by injected capabilities (template renderers, providers, stores).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Required top-level export structure is missing. Fatal for the whole export.
    #[error("malformed export: {0}")]
    MalformedExport(String),

    /// Caller supplied an out-of-range argument (windowing sizes, role names).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The system message template failed to render for one chat.
    #[error("failed to render system message template for chat {chat_id}: {source}")]
    TemplateRender {
        chat_id: i64,
        #[source]
        source: BoxError,
    },

    #[error("invalid replace rule pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// An external collaborator (response provider, store, text extractor) failed.
    #[error("collaborator failed: {0}")]
    Collaborator(#[source] BoxError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
