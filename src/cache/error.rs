use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache storage error: {0}")]
    Storage(String),
    #[error("storage quota exceeded while writing to `{tier}`")]
    QuotaExceeded { tier: String },
    #[error("network fetch of `{url}` failed: {message}")]
    Network { url: String, message: String },
    #[error("precache failed: {0}")]
    Install(String),
}

impl CacheError {
    pub fn storage(err: impl std::fmt::Display) -> Self {
        Self::Storage(err.to_string())
    }

    pub fn network(url: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Network {
            url: url.into(),
            message: err.to_string(),
        }
    }
}
