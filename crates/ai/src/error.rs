use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] palaver_store::Error),

    #[error(transparent)]
    Queue(#[from] palaver_queue::Error),

    #[error(transparent)]
    Pipeline(#[from] palaver_pipeline::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("model provider returned {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("model response was unusable: {reason}")]
    UnusableOutput { reason: String },
}

impl Error {
    #[must_use]
    pub fn unusable(reason: impl Into<String>) -> Self {
        Self::UnusableOutput {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
