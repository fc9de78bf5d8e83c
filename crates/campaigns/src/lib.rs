//! Bulk-send campaign orchestration.

pub mod error;
pub mod handlers;
pub mod orchestrator;

pub use {
    error::{Error, Result},
    handlers::{CampaignSendHandler, CampaignStartHandler},
    orchestrator::{CampaignOrchestrator, campaign_retry_policy},
};
