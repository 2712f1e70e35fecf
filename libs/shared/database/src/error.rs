use thiserror::Error;

/// Store failures, classified by what the caller can do about them.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DbError {
    /// A uniqueness constraint or compare-and-set filter rejected the write.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Infrastructure hiccup; safe to retry because nothing was applied.
    #[error("Transient store error: {0}")]
    Transient(String),

    #[error("Store rejected credentials: {0}")]
    Unauthorized(String),

    #[error("Failed to decode store response: {0}")]
    Decode(String),

    #[error("Store error: {0}")]
    Other(String),
}

impl DbError {
    pub fn is_transient(&self) -> bool {
        matches!(self, DbError::Transient(_))
    }

    /// Postgres unique violations surface as SQLSTATE 23505 inside the PostgREST error body.
    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            409 => DbError::Conflict(body.to_string()),
            404 | 406 => DbError::NotFound(body.to_string()),
            401 | 403 => DbError::Unauthorized(body.to_string()),
            408 | 429 | 500..=599 => DbError::Transient(body.to_string()),
            _ if body.contains("23505") => DbError::Conflict(body.to_string()),
            _ => DbError::Other(format!("status {}: {}", status, body)),
        }
    }
}

impl From<reqwest::Error> for DbError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() || error.is_connect() || error.is_request() {
            DbError::Transient(error.to_string())
        } else if error.is_decode() {
            DbError::Decode(error.to_string())
        } else {
            DbError::Other(error.to_string())
        }
    }
}

impl From<serde_json::Error> for DbError {
    fn from(error: serde_json::Error) -> Self {
        DbError::Decode(error.to_string())
    }
}
