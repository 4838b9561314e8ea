use thiserror::Error;

pub type Result<T> = std::result::Result<T, LibraryError>;

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("catalog store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("catalog store is locked")]
    StoreLocked,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf error: {0}")]
    Pdf(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("unauthorized")]
    Unauthorized,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid file path: {0}")]
    InvalidPath(String),

    #[error("scan root does not exist or is not a directory: {0}")]
    RootMissing(String),
}

impl LibraryError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// SQLite reports writer contention as BUSY or LOCKED depending on
    /// whether the conflict is with another connection or the same one.
    pub fn is_lock_error(&self) -> bool {
        match self {
            Self::StoreLocked => true,
            Self::Store(err) => is_lock_error(err),
            _ => false,
        }
    }
}

pub(crate) fn is_lock_error(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked)
    )
}

/// Outcomes of the external metadata lookup. Each variant is reported to
/// callers separately.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("book not found")]
    NotFound,

    #[error("metadata lookup timed out")]
    Timeout,

    #[error("metadata lookup failed: {0}")]
    Network(String),

    #[error("invalid lookup request: {0}")]
    InvalidRequest(String),
}

impl From<reqwest::Error> for LookupError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Network(err.to_string())
        }
    }
}
