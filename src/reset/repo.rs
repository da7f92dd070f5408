use async_trait::async_trait;
use uuid::Uuid;

use super::repo_types::PasswordResetRecord;
use crate::db::{MemoryStore, PgStore};

/// Records are inserted and taken, never updated. Expired records are not
/// collected here; the reset flow removes them when it finds them.
#[async_trait]
pub trait ResetTokenStore: Send + Sync {
    async fn put(&self, record: &PasswordResetRecord) -> anyhow::Result<()>;
    async fn find_by_owner_and_hash(
        &self,
        user_id: Uuid,
        token_hash: &str,
    ) -> anyhow::Result<Option<PasswordResetRecord>>;
    /// Removes `record` and reports whether this call removed it. Of several
    /// concurrent callers holding the same record at most one sees `true`.
    async fn take(&self, record: &PasswordResetRecord) -> anyhow::Result<bool>;
}

#[async_trait]
impl ResetTokenStore for PgStore {
    async fn put(&self, record: &PasswordResetRecord) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO password_resets (id, user_id, token_hash, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(record.id)
        .bind(record.user_id)
        .bind(&record.token_hash)
        .bind(record.expires_at)
        .bind(record.created_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn find_by_owner_and_hash(
        &self,
        user_id: Uuid,
        token_hash: &str,
    ) -> anyhow::Result<Option<PasswordResetRecord>> {
        let record = sqlx::query_as::<_, PasswordResetRecord>(
            r#"
            SELECT id, user_id, token_hash, expires_at, created_at
              FROM password_resets
             WHERE user_id = $1 AND token_hash = $2
            "#,
        )
        .bind(user_id)
        .bind(token_hash)
        .fetch_optional(&self.db)
        .await?;
        Ok(record)
    }

    async fn take(&self, record: &PasswordResetRecord) -> anyhow::Result<bool> {
        let removed: Option<Uuid> =
            sqlx::query_scalar("DELETE FROM password_resets WHERE id = $1 RETURNING id")
                .bind(record.id)
                .fetch_optional(&self.db)
                .await?;
        Ok(removed.is_some())
    }
}

#[async_trait]
impl ResetTokenStore for MemoryStore {
    async fn put(&self, record: &PasswordResetRecord) -> anyhow::Result<()> {
        self.resets.insert(record.token_hash.clone(), record.clone());
        Ok(())
    }

    async fn find_by_owner_and_hash(
        &self,
        user_id: Uuid,
        token_hash: &str,
    ) -> anyhow::Result<Option<PasswordResetRecord>> {
        Ok(self
            .resets
            .get(token_hash)
            .filter(|r| r.user_id == user_id)
            .map(|r| r.value().clone()))
    }

    async fn take(&self, record: &PasswordResetRecord) -> anyhow::Result<bool> {
        Ok(self
            .resets
            .remove_if(&record.token_hash, |_, r| r.id == record.id)
            .is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::{Duration, OffsetDateTime};

    fn record(user_id: Uuid, hash: &str) -> PasswordResetRecord {
        let now = OffsetDateTime::now_utc();
        PasswordResetRecord {
            id: Uuid::new_v4(),
            user_id,
            token_hash: hash.into(),
            expires_at: now + Duration::hours(1),
            created_at: now,
        }
    }

    #[tokio::test]
    async fn lookup_needs_owner_and_hash() {
        let store = MemoryStore::default();
        let owner = Uuid::new_v4();
        let rec = record(owner, "abc");
        store.put(&rec).await.unwrap();

        let found = store.find_by_owner_and_hash(owner, "abc").await.unwrap();
        assert_eq!(found.map(|r| r.id), Some(rec.id));
        assert!(store.find_by_owner_and_hash(Uuid::new_v4(), "abc").await.unwrap().is_none());
        assert!(store.find_by_owner_and_hash(owner, "abd").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn records_for_same_owner_coexist() {
        let store = MemoryStore::default();
        let owner = Uuid::new_v4();
        let first = record(owner, "one");
        let second = record(owner, "two");
        store.put(&first).await.unwrap();
        store.put(&second).await.unwrap();

        assert!(store.take(&first).await.unwrap());
        assert!(store.find_by_owner_and_hash(owner, "one").await.unwrap().is_none());
        assert!(store.find_by_owner_and_hash(owner, "two").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn take_succeeds_once() {
        let store = MemoryStore::default();
        let rec = record(Uuid::new_v4(), "abc");
        store.put(&rec).await.unwrap();

        assert!(store.take(&rec).await.unwrap());
        assert!(!store.take(&rec).await.unwrap());
    }
}
