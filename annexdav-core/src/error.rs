use thiserror::Error;

/// Errors surfaced by the remote capability interface.
///
/// `NotFound` and `AlreadyExists` are distinguishable outcomes that call
/// sites inspect and sometimes swallow (idempotent delete, presence checks,
/// collection-creation races). Everything else is a communication or
/// backend failure and propagates unchanged.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("{method} {location} failed: HTTP {status}")]
    Status {
        method: &'static str,
        location: String,
        status: u16,
    },
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

impl RemoteError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, RemoteError::AlreadyExists(_))
    }
}
