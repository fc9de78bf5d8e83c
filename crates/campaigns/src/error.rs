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
    Json(#[from] serde_json::Error),

    #[error("campaign {campaign_id} is {status}, expected {expected}")]
    WrongStatus {
        campaign_id: String,
        status: &'static str,
        expected: &'static str,
    },
}

impl Error {
    #[must_use]
    pub fn wrong_status(
        campaign_id: impl Into<String>,
        status: &'static str,
        expected: &'static str,
    ) -> Self {
        Self::WrongStatus {
            campaign_id: campaign_id.into(),
            status,
            expected,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
