use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Missing API key or an invalid setting.
    #[error("configuration error: {0}")]
    Config(String),

    /// The document folder could not be turned into an index.
    #[error("failed to build index: {0}")]
    IndexBuild(String),

    /// A remote embedding or chat-completion call failed.
    #[error("generation failed: {0}")]
    Generation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn index_build(message: impl Into<String>) -> Self {
        Self::IndexBuild(message.into())
    }

    pub fn generation(message: impl Into<String>) -> Self {
        Self::Generation(message.into())
    }
}
