use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] palaver_store::Error),

    #[error(transparent)]
    Adapter(#[from] palaver_adapters::Error),

    #[error(transparent)]
    Queue(#[from] palaver_queue::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Expected steady-state condition (stale webhook subscription), not a
    /// system fault: callers acknowledge and drop.
    #[error("no channel for {provider} lookup key: {lookup_key}")]
    ChannelNotFound {
        provider: &'static str,
        lookup_key: String,
    },

    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
