//! Contact records with idempotent find-or-create.

use {
    sqlx::{Row, sqlite::SqliteRow},
    tracing::debug,
};

use palaver_core::{Contact, default_contact_name, new_id, now_ts};

use crate::{
    Store,
    error::{Error, Result, is_unique_violation},
};

fn row_to_contact(row: &SqliteRow) -> Result<Contact> {
    Ok(Contact {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        name: row.try_get("name")?,
        phone: row.try_get("phone")?,
        external_id: row.try_get("external_id")?,
        avatar_url: row.try_get("avatar_url")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

impl Store {
    pub async fn contact(&self, id: &str) -> Result<Contact> {
        let row = sqlx::query("SELECT * FROM contacts WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| Error::not_found("contact", id))?;
        row_to_contact(&row)
    }

    /// Find by phone first, then by external provider id.
    pub async fn find_contact(
        &self,
        tenant_id: &str,
        phone: Option<&str>,
        external_id: Option<&str>,
    ) -> Result<Option<Contact>> {
        if let Some(phone) = phone {
            let row = sqlx::query("SELECT * FROM contacts WHERE tenant_id = ? AND phone = ?")
                .bind(tenant_id)
                .bind(phone)
                .fetch_optional(self.pool())
                .await?;
            if let Some(row) = row {
                return Ok(Some(row_to_contact(&row)?));
            }
        }
        if let Some(external_id) = external_id {
            let row = sqlx::query("SELECT * FROM contacts WHERE tenant_id = ? AND external_id = ?")
                .bind(tenant_id)
                .bind(external_id)
                .fetch_optional(self.pool())
                .await?;
            if let Some(row) = row {
                return Ok(Some(row_to_contact(&row)?));
            }
        }
        Ok(None)
    }

    /// Idempotent under concurrent duplicate webhooks: read, then insert,
    /// and treat a uniqueness conflict as "already exists" followed by a
    /// re-read. Never surfaces the conflict to the caller.
    pub async fn find_or_create_contact(
        &self,
        tenant_id: &str,
        phone: Option<&str>,
        external_id: Option<&str>,
        name: Option<&str>,
    ) -> Result<Contact> {
        if let Some(existing) = self.find_contact(tenant_id, phone, external_id).await? {
            return Ok(existing);
        }

        let now = now_ts();
        let contact = Contact {
            id: new_id(),
            tenant_id: tenant_id.to_string(),
            name: name
                .map(str::to_string)
                .unwrap_or_else(|| default_contact_name(phone, external_id)),
            phone: phone.map(str::to_string),
            external_id: external_id.map(str::to_string),
            avatar_url: None,
            created_at: now,
            updated_at: now,
        };

        let inserted = sqlx::query(
            "INSERT INTO contacts
                 (id, tenant_id, name, phone, external_id, avatar_url, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&contact.id)
        .bind(&contact.tenant_id)
        .bind(&contact.name)
        .bind(&contact.phone)
        .bind(&contact.external_id)
        .bind(&contact.avatar_url)
        .bind(contact.created_at)
        .bind(contact.updated_at)
        .execute(self.pool())
        .await;

        match inserted {
            Ok(_) => Ok(contact),
            Err(err) if is_unique_violation(&err) => {
                debug!(tenant_id, "contact insert lost the race, re-reading");
                self.find_contact(tenant_id, phone, external_id)
                    .await?
                    .ok_or_else(|| Error::not_found("contact", phone.or(external_id).unwrap_or("?")))
            },
            Err(err) => Err(err.into()),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_store;

    #[tokio::test]
    async fn test_find_or_create_is_idempotent() {
        let store = test_store().await;
        let first = store
            .find_or_create_contact("t1", Some("5511999999999"), None, None)
            .await
            .unwrap();
        let second = store
            .find_or_create_contact("t1", Some("5511999999999"), None, Some("Ana"))
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        // Name falls back to the phone when the provider supplies none.
        assert_eq!(first.name, "5511999999999");
    }

    #[tokio::test]
    async fn test_concurrent_resolution_yields_one_contact() {
        let store = test_store().await;
        let a = store.clone();
        let b = store.clone();
        let (left, right) = tokio::join!(
            a.find_or_create_contact("t1", Some("5511988887777"), None, None),
            b.find_or_create_contact("t1", Some("5511988887777"), None, None),
        );
        assert_eq!(left.unwrap().id, right.unwrap().id);
    }

    #[tokio::test]
    async fn test_external_id_lookup() {
        let store = test_store().await;
        let created = store
            .find_or_create_contact("t1", None, Some("17841400000000001"), None)
            .await
            .unwrap();
        // Truncated external id stands in for the missing name.
        assert_eq!(created.name, "178414000000");

        let found = store
            .find_contact("t1", None, Some("17841400000000001"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, created.id);
    }

    #[tokio::test]
    async fn test_tenants_are_isolated() {
        let store = test_store().await;
        let one = store
            .find_or_create_contact("t1", Some("111"), None, None)
            .await
            .unwrap();
        let two = store
            .find_or_create_contact("t2", Some("111"), None, None)
            .await
            .unwrap();
        assert_ne!(one.id, two.id);
    }
}
