//! Conversation records: one thread per (tenant, channel, contact).

use {
    sqlx::{Row, sqlite::SqliteRow},
    tracing::debug,
};

use palaver_core::{Conversation, ConversationStatus, new_id, now_ts};

use crate::{
    Store,
    error::{Error, Result, is_unique_violation},
};

fn row_to_conversation(row: &SqliteRow) -> Result<Conversation> {
    let status: String = row.try_get("status")?;
    let metadata: String = row.try_get("metadata")?;
    Ok(Conversation {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        channel_id: row.try_get("channel_id")?,
        contact_id: row.try_get("contact_id")?,
        status: ConversationStatus::parse(&status)
            .ok_or_else(|| Error::corrupt("status", &status))?,
        assignee_id: row.try_get("assignee_id")?,
        team_id: row.try_get("team_id")?,
        last_message_at: row.try_get("last_message_at")?,
        metadata: serde_json::from_str(&metadata)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

impl Store {
    pub async fn conversation(&self, id: &str) -> Result<Conversation> {
        let row = sqlx::query("SELECT * FROM conversations WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| Error::not_found("conversation", id))?;
        row_to_conversation(&row)
    }

    pub async fn find_conversation(
        &self,
        tenant_id: &str,
        channel_id: &str,
        contact_id: &str,
    ) -> Result<Option<Conversation>> {
        let row = sqlx::query(
            "SELECT * FROM conversations
             WHERE tenant_id = ? AND channel_id = ? AND contact_id = ?",
        )
        .bind(tenant_id)
        .bind(channel_id)
        .bind(contact_id)
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(row_to_conversation).transpose()
    }

    /// Find-or-create with uniqueness-conflict recovery. Returns the
    /// conversation plus whether this call created it.
    pub async fn find_or_create_conversation(
        &self,
        tenant_id: &str,
        channel_id: &str,
        contact_id: &str,
        metadata: Option<&serde_json::Value>,
    ) -> Result<(Conversation, bool)> {
        if let Some(existing) = self
            .find_conversation(tenant_id, channel_id, contact_id)
            .await?
        {
            return Ok((existing, false));
        }

        let now = now_ts();
        let conversation = Conversation {
            id: new_id(),
            tenant_id: tenant_id.to_string(),
            channel_id: channel_id.to_string(),
            contact_id: contact_id.to_string(),
            status: ConversationStatus::Open,
            assignee_id: None,
            team_id: None,
            last_message_at: None,
            metadata: metadata.cloned().unwrap_or_else(|| serde_json::json!({})),
            created_at: now,
            updated_at: now,
        };

        let inserted = sqlx::query(
            "INSERT INTO conversations
                 (id, tenant_id, channel_id, contact_id, status, assignee_id, team_id,
                  last_message_at, metadata, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&conversation.id)
        .bind(&conversation.tenant_id)
        .bind(&conversation.channel_id)
        .bind(&conversation.contact_id)
        .bind(conversation.status.as_str())
        .bind(&conversation.assignee_id)
        .bind(&conversation.team_id)
        .bind(conversation.last_message_at)
        .bind(serde_json::to_string(&conversation.metadata)?)
        .bind(conversation.created_at)
        .bind(conversation.updated_at)
        .execute(self.pool())
        .await;

        match inserted {
            Ok(_) => Ok((conversation, true)),
            Err(err) if is_unique_violation(&err) => {
                debug!(tenant_id, channel_id, "conversation insert lost the race, re-reading");
                let existing = self
                    .find_conversation(tenant_id, channel_id, contact_id)
                    .await?
                    .ok_or_else(|| Error::not_found("conversation", contact_id))?;
                Ok((existing, false))
            },
            Err(err) => Err(err.into()),
        }
    }

    /// Flip a `resolved` conversation back to `open` on inbound activity.
    /// Returns whether the transition happened.
    pub async fn reopen_if_resolved(&self, id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE conversations SET status = 'open', updated_at = ?
             WHERE id = ? AND status = 'resolved'",
        )
        .bind(now_ts())
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_conversation_status(&self, id: &str, status: ConversationStatus) -> Result<()> {
        let result = sqlx::query("UPDATE conversations SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(now_ts())
            .bind(id)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("conversation", id));
        }
        Ok(())
    }

    /// Bump recency after a message lands in the thread.
    pub async fn touch_last_message(&self, id: &str, ts: i64) -> Result<()> {
        sqlx::query(
            "UPDATE conversations SET last_message_at = ?, updated_at = ? WHERE id = ?",
        )
        .bind(ts)
        .bind(now_ts())
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Merge top-level keys into the conversation metadata blob (AI
    /// suggestions, sentiment, campaign source).
    pub async fn merge_conversation_metadata(
        &self,
        id: &str,
        patch: &serde_json::Value,
    ) -> Result<Conversation> {
        let mut conversation = self.conversation(id).await?;
        merge_json(&mut conversation.metadata, patch);
        sqlx::query("UPDATE conversations SET metadata = ?, updated_at = ? WHERE id = ?")
            .bind(serde_json::to_string(&conversation.metadata)?)
            .bind(now_ts())
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(conversation)
    }
}

/// Shallow merge of `patch`'s top-level keys into `target`.
pub(crate) fn merge_json(target: &mut serde_json::Value, patch: &serde_json::Value) {
    if let (Some(target), Some(patch)) = (target.as_object_mut(), patch.as_object()) {
        for (key, value) in patch {
            target.insert(key.clone(), value.clone());
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::test_store;

    async fn seeded(store: &Store) -> Conversation {
        let (conversation, created) = store
            .find_or_create_conversation("t1", "ch1", "ct1", None)
            .await
            .unwrap();
        assert!(created);
        conversation
    }

    #[tokio::test]
    async fn test_unique_per_triple() {
        let store = test_store().await;
        let first = seeded(&store).await;
        let (second, created) = store
            .find_or_create_conversation("t1", "ch1", "ct1", None)
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_reopen_only_from_resolved() {
        let store = test_store().await;
        let conversation = seeded(&store).await;

        // Open stays open; no transition is reported.
        assert!(!store.reopen_if_resolved(&conversation.id).await.unwrap());

        store
            .set_conversation_status(&conversation.id, ConversationStatus::Resolved)
            .await
            .unwrap();
        assert!(store.reopen_if_resolved(&conversation.id).await.unwrap());

        let got = store.conversation(&conversation.id).await.unwrap();
        assert_eq!(got.status, ConversationStatus::Open);

        // Snoozed is untouched by inbound activity.
        store
            .set_conversation_status(&conversation.id, ConversationStatus::Snoozed)
            .await
            .unwrap();
        assert!(!store.reopen_if_resolved(&conversation.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_metadata_merge_keeps_existing_keys() {
        let store = test_store().await;
        let conversation = seeded(&store).await;

        store
            .merge_conversation_metadata(&conversation.id, &json!({"sentiment": "positive"}))
            .await
            .unwrap();
        store
            .merge_conversation_metadata(&conversation.id, &json!({"suggestions": ["a", "b", "c"]}))
            .await
            .unwrap();

        let got = store.conversation(&conversation.id).await.unwrap();
        assert_eq!(got.metadata["sentiment"], "positive");
        assert_eq!(got.metadata["suggestions"][2], "c");
    }

    #[tokio::test]
    async fn test_touch_last_message() {
        let store = test_store().await;
        let conversation = seeded(&store).await;
        store.touch_last_message(&conversation.id, 12345).await.unwrap();
        let got = store.conversation(&conversation.id).await.unwrap();
        assert_eq!(got.last_message_at, Some(12345));
    }
}
