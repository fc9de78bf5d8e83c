//! Message records: idempotent insert, forward-only status transitions.

use {
    sqlx::{Row, sqlite::SqliteRow},
    tracing::debug,
};

use palaver_core::{Direction, Message, MessageKind, MessageStatus, SenderKind, now_ts};

use crate::{
    Store,
    conversations::merge_json,
    error::{Error, Result, is_unique_violation},
};

fn row_to_message(row: &SqliteRow) -> Result<Message> {
    let sender: String = row.try_get("sender")?;
    let direction: String = row.try_get("direction")?;
    let kind: String = row.try_get("kind")?;
    let status: String = row.try_get("status")?;
    let metadata: String = row.try_get("metadata")?;
    Ok(Message {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        conversation_id: row.try_get("conversation_id")?,
        sender: SenderKind::parse(&sender).ok_or_else(|| Error::corrupt("sender", &sender))?,
        direction: Direction::parse(&direction)
            .ok_or_else(|| Error::corrupt("direction", &direction))?,
        kind: MessageKind::parse(&kind).ok_or_else(|| Error::corrupt("kind", &kind))?,
        content: row.try_get("content")?,
        media_url: row.try_get("media_url")?,
        media_type: row.try_get("media_type")?,
        status: MessageStatus::parse(&status).ok_or_else(|| Error::corrupt("status", &status))?,
        external_id: row.try_get("external_id")?,
        error: row.try_get("error")?,
        metadata: serde_json::from_str(&metadata)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

impl Store {
    pub async fn message(&self, id: &str) -> Result<Message> {
        let row = sqlx::query("SELECT * FROM messages WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| Error::not_found("message", id))?;
        row_to_message(&row)
    }

    pub async fn message_by_external_id(
        &self,
        tenant_id: &str,
        external_id: &str,
    ) -> Result<Option<Message>> {
        let row = sqlx::query("SELECT * FROM messages WHERE tenant_id = ? AND external_id = ?")
            .bind(tenant_id)
            .bind(external_id)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(row_to_message).transpose()
    }

    /// Insert a message. Idempotent on the external provider id: re-delivery
    /// of the same id returns the existing row instead of creating a
    /// duplicate. Returns the stored message plus whether this call created it.
    pub async fn insert_message(&self, message: &Message) -> Result<(Message, bool)> {
        let inserted = sqlx::query(
            "INSERT INTO messages
                 (id, tenant_id, conversation_id, sender, direction, kind, content,
                  media_url, media_type, status, external_id, error, metadata,
                  created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&message.id)
        .bind(&message.tenant_id)
        .bind(&message.conversation_id)
        .bind(message.sender.as_str())
        .bind(message.direction.as_str())
        .bind(message.kind.as_str())
        .bind(&message.content)
        .bind(&message.media_url)
        .bind(&message.media_type)
        .bind(message.status.as_str())
        .bind(&message.external_id)
        .bind(&message.error)
        .bind(serde_json::to_string(&message.metadata)?)
        .bind(message.created_at)
        .bind(message.updated_at)
        .execute(self.pool())
        .await;

        match inserted {
            Ok(_) => Ok((message.clone(), true)),
            Err(err) if is_unique_violation(&err) => {
                let external_id = message.external_id.as_deref().unwrap_or_default();
                debug!(external_id, "duplicate message delivery, returning existing row");
                let existing = self
                    .message_by_external_id(&message.tenant_id, external_id)
                    .await?
                    .ok_or_else(|| Error::not_found("message", external_id))?;
                Ok((existing, false))
            },
            Err(err) => Err(err.into()),
        }
    }

    /// Apply a delivery receipt by external id. Transitions only move the
    /// status forward; receipts arriving out of order resolve to the furthest
    /// status seen. Returns the message when the row exists, plus whether
    /// this receipt changed it.
    pub async fn update_message_status_forward(
        &self,
        tenant_id: &str,
        external_id: &str,
        status: MessageStatus,
    ) -> Result<Option<(Message, bool)>> {
        let result = sqlx::query(
            "UPDATE messages SET status = ?, updated_at = ?
             WHERE tenant_id = ? AND external_id = ?
               AND CASE status
                     WHEN 'pending' THEN 0
                     WHEN 'sent' THEN 1
                     WHEN 'delivered' THEN 2
                     WHEN 'read' THEN 3
                     ELSE 4
                   END < ?",
        )
        .bind(status.as_str())
        .bind(now_ts())
        .bind(tenant_id)
        .bind(external_id)
        .bind(status.rank())
        .execute(self.pool())
        .await?;

        let message = self.message_by_external_id(tenant_id, external_id).await?;
        Ok(message.map(|m| (m, result.rows_affected() > 0)))
    }

    /// Record a successful provider send: stamp the provider message id and
    /// move the status forward to `sent`.
    pub async fn mark_message_sent(&self, id: &str, external_id: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE messages SET external_id = ?, status = 'sent', updated_at = ?
             WHERE id = ? AND status = 'pending'",
        )
        .bind(external_id)
        .bind(now_ts())
        .bind(id)
        .execute(self.pool())
        .await?;
        if result.rows_affected() == 0 {
            // Already past pending (late duplicate send ack); leave it alone.
            debug!(message_id = id, "mark_sent skipped, message already advanced");
        }
        Ok(())
    }

    /// Terminal failure after retry exhaustion: never left pending forever.
    pub async fn mark_message_failed(&self, id: &str, error: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE messages SET status = 'failed', error = ?, updated_at = ? WHERE id = ?",
        )
        .bind(error)
        .bind(now_ts())
        .bind(id)
        .execute(self.pool())
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("message", id));
        }
        Ok(())
    }

    /// Merge top-level keys into the message metadata blob (transcription,
    /// sentiment, campaign linkage).
    pub async fn merge_message_metadata(
        &self,
        id: &str,
        patch: &serde_json::Value,
    ) -> Result<Message> {
        let mut message = self.message(id).await?;
        merge_json(&mut message.metadata, patch);
        sqlx::query("UPDATE messages SET metadata = ?, updated_at = ? WHERE id = ?")
            .bind(serde_json::to_string(&message.metadata)?)
            .bind(now_ts())
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(message)
    }

    /// Newest-first slice of a conversation, for AI context windows.
    pub async fn recent_messages(&self, conversation_id: &str, limit: u32) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            "SELECT * FROM messages WHERE conversation_id = ?
             ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(conversation_id)
        .bind(limit as i64)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(row_to_message).collect()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {palaver_core::new_id, serde_json::json};

    use super::*;
    use crate::test_store;

    pub(crate) fn make_message(external_id: Option<&str>) -> Message {
        Message {
            id: new_id(),
            tenant_id: "t1".into(),
            conversation_id: "cv1".into(),
            sender: SenderKind::Contact,
            direction: Direction::Inbound,
            kind: MessageKind::Text,
            content: Some("Hi".into()),
            media_url: None,
            media_type: None,
            status: MessageStatus::Sent,
            external_id: external_id.map(str::to_string),
            error: None,
            metadata: json!({}),
            created_at: now_ts(),
            updated_at: now_ts(),
        }
    }

    #[tokio::test]
    async fn test_duplicate_external_id_returns_existing() {
        let store = test_store().await;
        let (first, created) = store.insert_message(&make_message(Some("m1"))).await.unwrap();
        assert!(created);

        let (second, created) = store.insert_message(&make_message(Some("m1"))).await.unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_messages_without_external_id_are_distinct() {
        let store = test_store().await;
        let (_, a) = store.insert_message(&make_message(None)).await.unwrap();
        let (_, b) = store.insert_message(&make_message(None)).await.unwrap();
        assert!(a && b);
    }

    #[tokio::test]
    async fn test_out_of_order_receipts_keep_furthest_status() {
        let store = test_store().await;
        store.insert_message(&make_message(Some("m1"))).await.unwrap();

        // Read arrives before delivered.
        let (message, changed) = store
            .update_message_status_forward("t1", "m1", MessageStatus::Read)
            .await
            .unwrap()
            .unwrap();
        assert!(changed);
        assert_eq!(message.status, MessageStatus::Read);

        let (message, changed) = store
            .update_message_status_forward("t1", "m1", MessageStatus::Delivered)
            .await
            .unwrap()
            .unwrap();
        assert!(!changed);
        assert_eq!(message.status, MessageStatus::Read);
    }

    #[tokio::test]
    async fn test_receipt_for_unknown_message_is_none() {
        let store = test_store().await;
        let got = store
            .update_message_status_forward("t1", "ghost", MessageStatus::Delivered)
            .await
            .unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_mark_sent_then_failed_path() {
        let store = test_store().await;
        let mut message = make_message(None);
        message.status = MessageStatus::Pending;
        message.direction = Direction::Outbound;
        message.sender = SenderKind::Agent;
        store.insert_message(&message).await.unwrap();

        store.mark_message_sent(&message.id, "wamid.1").await.unwrap();
        let got = store.message(&message.id).await.unwrap();
        assert_eq!(got.status, MessageStatus::Sent);
        assert_eq!(got.external_id.as_deref(), Some("wamid.1"));

        store
            .mark_message_failed(&message.id, "recipient rejected")
            .await
            .unwrap();
        let got = store.message(&message.id).await.unwrap();
        assert_eq!(got.status, MessageStatus::Failed);
        assert_eq!(got.error.as_deref(), Some("recipient rejected"));
    }

    #[tokio::test]
    async fn test_recent_messages_newest_first() {
        let store = test_store().await;
        for i in 0..5 {
            let mut message = make_message(None);
            message.content = Some(format!("msg {i}"));
            message.created_at = 1000 + i;
            store.insert_message(&message).await.unwrap();
        }
        let recent = store.recent_messages("cv1", 3).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].content.as_deref(), Some("msg 4"));
    }

    #[tokio::test]
    async fn test_metadata_merge() {
        let store = test_store().await;
        let (message, _) = store.insert_message(&make_message(Some("m1"))).await.unwrap();
        store
            .merge_message_metadata(&message.id, &json!({"transcription": "hello there"}))
            .await
            .unwrap();
        let got = store.message(&message.id).await.unwrap();
        assert_eq!(got.metadata["transcription"], "hello there");
    }
}
