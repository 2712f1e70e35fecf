use thiserror::Error;

#[derive(Error, Debug)]
pub enum FanoutError {
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Malformed client message: {0}")]
    MalformedMessage(String),
}
