/// Core error type for the conversation pipeline.
///
/// Adapter crates map their specific failures into one of these kinds so the
/// pipeline can decide between degraded continuation and propagation.
/// A missing record is never an error; lookups return `Option`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("store read failed: {0}")]
    StoreRead(String),

    #[error("store write failed: {0}")]
    StoreWrite(String),

    #[error("completion failed: {0}")]
    Completion(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("invalid {field}: {value:?}")]
    InvalidValue { field: &'static str, value: String },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Discriminant of [`Error`], for callers that branch on the failure kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    StoreRead,
    StoreWrite,
    Completion,
    Config,
    InvalidValue,
    Io,
    Json,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::StoreRead(_) => ErrorKind::StoreRead,
            Error::StoreWrite(_) => ErrorKind::StoreWrite,
            Error::Completion(_) => ErrorKind::Completion,
            Error::Config(_) => ErrorKind::Config,
            Error::InvalidValue { .. } => ErrorKind::InvalidValue,
            Error::Io(_) => ErrorKind::Io,
            Error::Json(_) => ErrorKind::Json,
        }
    }

    pub(crate) fn invalid(field: &'static str, value: impl Into<String>) -> Self {
        Error::InvalidValue {
            field,
            value: value.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
