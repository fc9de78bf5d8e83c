//! Campaign and recipient records.
//!
//! Stat counters are incremented atomically in SQL because two recipients'
//! send jobs may complete concurrently; recipient status updates carry the
//! same forward-only discipline as message receipts.

use sqlx::{Row, sqlite::SqliteRow};

use palaver_core::{Campaign, CampaignRecipient, CampaignStats, CampaignStatus, MessageStatus, now_ts};

use crate::{
    Store,
    error::{Error, Result, is_unique_violation},
};

/// Which aggregate counter to bump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatField {
    Sent,
    Delivered,
    Read,
    Failed,
}

impl StatField {
    fn column(&self) -> &'static str {
        match self {
            Self::Sent => "stat_sent",
            Self::Delivered => "stat_delivered",
            Self::Read => "stat_read",
            Self::Failed => "stat_failed",
        }
    }
}

fn row_to_campaign(row: &SqliteRow) -> Result<Campaign> {
    let status: String = row.try_get("status")?;
    let template_params: Option<String> = row.try_get("template_params")?;
    Ok(Campaign {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        channel_id: row.try_get("channel_id")?,
        title: row.try_get("title")?,
        status: CampaignStatus::parse(&status).ok_or_else(|| Error::corrupt("status", &status))?,
        content: row.try_get("content")?,
        template_id: row.try_get("template_id")?,
        template_params: template_params
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?,
        stats: CampaignStats {
            total: row.try_get("stat_total")?,
            sent: row.try_get("stat_sent")?,
            delivered: row.try_get("stat_delivered")?,
            read: row.try_get("stat_read")?,
            failed: row.try_get("stat_failed")?,
        },
        scheduled_at: row.try_get("scheduled_at")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_recipient(row: &SqliteRow) -> Result<CampaignRecipient> {
    let status: String = row.try_get("status")?;
    Ok(CampaignRecipient {
        campaign_id: row.try_get("campaign_id")?,
        contact_id: row.try_get("contact_id")?,
        status: MessageStatus::parse(&status).ok_or_else(|| Error::corrupt("status", &status))?,
        error: row.try_get("error")?,
        sent_at: row.try_get("sent_at")?,
    })
}

impl Store {
    pub async fn insert_campaign(&self, campaign: &Campaign) -> Result<()> {
        sqlx::query(
            "INSERT INTO campaigns
                 (id, tenant_id, channel_id, title, status, content, template_id,
                  template_params, stat_total, stat_sent, stat_delivered, stat_read,
                  stat_failed, scheduled_at, started_at, completed_at, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&campaign.id)
        .bind(&campaign.tenant_id)
        .bind(&campaign.channel_id)
        .bind(&campaign.title)
        .bind(campaign.status.as_str())
        .bind(&campaign.content)
        .bind(&campaign.template_id)
        .bind(
            campaign
                .template_params
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .bind(campaign.stats.total)
        .bind(campaign.stats.sent)
        .bind(campaign.stats.delivered)
        .bind(campaign.stats.read)
        .bind(campaign.stats.failed)
        .bind(campaign.scheduled_at)
        .bind(campaign.started_at)
        .bind(campaign.completed_at)
        .bind(campaign.created_at)
        .bind(campaign.updated_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn campaign(&self, id: &str) -> Result<Campaign> {
        let row = sqlx::query("SELECT * FROM campaigns WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| Error::not_found("campaign", id))?;
        row_to_campaign(&row)
    }

    /// Guarded state-machine transition. Stamps `started_at`/`completed_at`
    /// as the campaign enters/leaves flight. The guard is enforced in the
    /// UPDATE's WHERE clause so two concurrent workers cannot both apply the
    /// same transition.
    pub async fn transition_campaign(
        &self,
        id: &str,
        from: CampaignStatus,
        to: CampaignStatus,
    ) -> Result<Campaign> {
        if !from.can_transition_to(to) {
            return Err(Error::InvalidTransition {
                from: from.as_str(),
                to: to.as_str(),
            });
        }
        let now = now_ts();
        let result = sqlx::query(
            "UPDATE campaigns SET status = ?, updated_at = ?,
                 started_at = CASE WHEN ? = 'running' AND started_at IS NULL THEN ? ELSE started_at END,
                 completed_at = CASE WHEN ? IN ('completed', 'cancelled') THEN ? ELSE completed_at END
             WHERE id = ? AND status = ?",
        )
        .bind(to.as_str())
        .bind(now)
        .bind(to.as_str())
        .bind(now)
        .bind(to.as_str())
        .bind(now)
        .bind(id)
        .bind(from.as_str())
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            // The row moved under us; report what it actually is now.
            let current = self.campaign(id).await?;
            return Err(Error::InvalidTransition {
                from: current.status.as_str(),
                to: to.as_str(),
            });
        }
        self.campaign(id).await
    }

    pub async fn set_campaign_total(&self, id: &str, total: i64) -> Result<()> {
        sqlx::query("UPDATE campaigns SET stat_total = ?, updated_at = ? WHERE id = ?")
            .bind(total)
            .bind(now_ts())
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Atomic counter bump; safe under concurrent recipient jobs.
    pub async fn increment_campaign_stat(&self, id: &str, field: StatField) -> Result<()> {
        let sql = format!(
            "UPDATE campaigns SET {col} = {col} + 1, updated_at = ? WHERE id = ?",
            col = field.column()
        );
        sqlx::query(&sql)
            .bind(now_ts())
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn add_campaign_recipients(
        &self,
        campaign_id: &str,
        contact_ids: &[String],
    ) -> Result<()> {
        for contact_id in contact_ids {
            let inserted = sqlx::query(
                "INSERT INTO campaign_recipients (campaign_id, contact_id, status)
                 VALUES (?, ?, 'pending')",
            )
            .bind(campaign_id)
            .bind(contact_id)
            .execute(self.pool())
            .await;
            match inserted {
                Ok(_) => {},
                // Same contact added twice is a no-op, not an error.
                Err(err) if is_unique_violation(&err) => {},
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    pub async fn campaign_recipient(
        &self,
        campaign_id: &str,
        contact_id: &str,
    ) -> Result<Option<CampaignRecipient>> {
        let row = sqlx::query(
            "SELECT * FROM campaign_recipients WHERE campaign_id = ? AND contact_id = ?",
        )
        .bind(campaign_id)
        .bind(contact_id)
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(row_to_recipient).transpose()
    }

    pub async fn campaign_recipients(&self, campaign_id: &str) -> Result<Vec<CampaignRecipient>> {
        let rows = sqlx::query("SELECT * FROM campaign_recipients WHERE campaign_id = ?")
            .bind(campaign_id)
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(row_to_recipient).collect()
    }

    pub async fn pending_recipients(&self, campaign_id: &str) -> Result<Vec<CampaignRecipient>> {
        let rows = sqlx::query(
            "SELECT * FROM campaign_recipients WHERE campaign_id = ? AND status = 'pending'",
        )
        .bind(campaign_id)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(row_to_recipient).collect()
    }

    /// The completion invariant hinges on this count reaching zero.
    pub async fn pending_recipient_count(&self, campaign_id: &str) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM campaign_recipients
             WHERE campaign_id = ? AND status = 'pending'",
        )
        .bind(campaign_id)
        .fetch_one(self.pool())
        .await?;
        Ok(row.try_get("n")?)
    }

    /// Forward-only recipient status update, mirroring message receipts.
    /// Returns whether the row changed.
    pub async fn update_recipient_status(
        &self,
        campaign_id: &str,
        contact_id: &str,
        status: MessageStatus,
        error: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE campaign_recipients SET status = ?, error = ?,
                 sent_at = CASE WHEN ? = 'sent' THEN ? ELSE sent_at END
             WHERE campaign_id = ? AND contact_id = ?
               AND CASE status
                     WHEN 'pending' THEN 0
                     WHEN 'sent' THEN 1
                     WHEN 'delivered' THEN 2
                     WHEN 'read' THEN 3
                     ELSE 4
                   END < ?",
        )
        .bind(status.as_str())
        .bind(error)
        .bind(status.as_str())
        .bind(now_ts())
        .bind(campaign_id)
        .bind(contact_id)
        .bind(status.rank())
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
