//! Channel records: tenant-scoped external messaging endpoints.

use {
    sqlx::{Row, sqlite::SqliteRow},
    tracing::info,
};

use palaver_core::{Channel, ChannelType, Provider, now_ts};

use crate::{
    Store,
    error::{Error, Result},
};

fn row_to_channel(row: &SqliteRow) -> Result<Channel> {
    let channel_type: String = row.try_get("channel_type")?;
    let provider: String = row.try_get("provider")?;
    let config: String = row.try_get("config")?;
    Ok(Channel {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        channel_type: ChannelType::parse(&channel_type)
            .ok_or_else(|| Error::corrupt("channel_type", &channel_type))?,
        provider: Provider::parse(&provider).ok_or_else(|| Error::corrupt("provider", &provider))?,
        lookup_key: row.try_get("lookup_key")?,
        config: serde_json::from_str(&config)?,
        is_active: row.try_get::<i64, _>("is_active")? != 0,
        connected_at: row.try_get("connected_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

impl Store {
    pub async fn insert_channel(&self, channel: &Channel) -> Result<()> {
        sqlx::query(
            "INSERT INTO channels
                 (id, tenant_id, channel_type, provider, lookup_key, config,
                  is_active, connected_at, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&channel.id)
        .bind(&channel.tenant_id)
        .bind(channel.channel_type.as_str())
        .bind(channel.provider.as_str())
        .bind(&channel.lookup_key)
        .bind(serde_json::to_string(&channel.config)?)
        .bind(channel.is_active as i64)
        .bind(channel.connected_at)
        .bind(channel.created_at)
        .bind(channel.updated_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn channel(&self, id: &str) -> Result<Channel> {
        let row = sqlx::query("SELECT * FROM channels WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| Error::not_found("channel", id))?;
        row_to_channel(&row)
    }

    /// Indexed lookup by the provider-specific identifier carried in webhooks.
    pub async fn channel_by_lookup_key(
        &self,
        provider: Provider,
        lookup_key: &str,
    ) -> Result<Option<Channel>> {
        let row = sqlx::query("SELECT * FROM channels WHERE provider = ? AND lookup_key = ?")
            .bind(provider.as_str())
            .bind(lookup_key)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(row_to_channel).transpose()
    }

    /// Flip the active flag from a connection-state webhook. Stamps
    /// `connected_at` only when going active.
    pub async fn set_channel_active(&self, id: &str, active: bool) -> Result<()> {
        let now = now_ts();
        let result = if active {
            sqlx::query(
                "UPDATE channels SET is_active = 1, connected_at = ?, updated_at = ? WHERE id = ?",
            )
            .bind(now)
            .bind(now)
            .bind(id)
            .execute(self.pool())
            .await?
        } else {
            sqlx::query("UPDATE channels SET is_active = 0, updated_at = ? WHERE id = ?")
                .bind(now)
                .bind(id)
                .execute(self.pool())
                .await?
        };
        if result.rows_affected() == 0 {
            return Err(Error::not_found("channel", id));
        }
        info!(channel_id = id, active, "channel connection state updated");
        Ok(())
    }

    /// Remove a channel on explicit disconnect.
    pub async fn delete_channel(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM channels WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("channel", id));
        }
        Ok(())
    }
}
