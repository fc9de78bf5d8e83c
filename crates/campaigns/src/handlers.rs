//! Queue handlers for campaign jobs.

use std::sync::Arc;

use async_trait::async_trait;

use {
    palaver_core::jobs::{CampaignSendJob, CampaignStartJob},
    palaver_queue::{Job, JobHandler},
};

use crate::orchestrator::CampaignOrchestrator;

pub struct CampaignStartHandler {
    orchestrator: Arc<CampaignOrchestrator>,
}

impl CampaignStartHandler {
    #[must_use]
    pub fn new(orchestrator: Arc<CampaignOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl JobHandler for CampaignStartHandler {
    async fn handle(&self, job: &Job) -> anyhow::Result<()> {
        let payload: CampaignStartJob = job.payload_as()?;
        self.orchestrator.start(&payload.campaign_id).await?;
        Ok(())
    }
}

pub struct CampaignSendHandler {
    orchestrator: Arc<CampaignOrchestrator>,
}

impl CampaignSendHandler {
    #[must_use]
    pub fn new(orchestrator: Arc<CampaignOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl JobHandler for CampaignSendHandler {
    async fn handle(&self, job: &Job) -> anyhow::Result<()> {
        let payload: CampaignSendJob = job.payload_as()?;
        self.orchestrator.handle_send(&payload).await?;
        Ok(())
    }
}
