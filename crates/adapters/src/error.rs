use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed {provider} payload: {source}")]
    Parse {
        provider: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("channel config missing {field}")]
    MissingConfig { field: &'static str },

    #[error("unsupported outbound message for {provider}: {reason}")]
    Unsupported {
        provider: &'static str,
        reason: String,
    },

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("provider rejected send ({status}): {body}")]
    SendRejected { status: u16, body: String },
}

impl Error {
    #[must_use]
    pub fn parse(provider: &'static str, source: serde_json::Error) -> Self {
        Self::Parse { provider, source }
    }

    #[must_use]
    pub fn missing_config(field: &'static str) -> Self {
        Self::MissingConfig { field }
    }

    #[must_use]
    pub fn unsupported(provider: &'static str, reason: impl Into<String>) -> Self {
        Self::Unsupported {
            provider,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
