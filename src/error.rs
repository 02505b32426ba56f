use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("could not deserialize pod object: {0}")]
    Deserialization(#[source] serde_json::Error),

    #[error("malformed workflow template: {0}")]
    MalformedTemplate(#[source] serde_json::Error),

    #[error("cache lookup failed: {0}")]
    CacheLookup(String),

    #[error("cache lookup timed out after {0:?}")]
    LookupTimeout(Duration),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
