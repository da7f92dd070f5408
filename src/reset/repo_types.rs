use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// One outstanding password reset. Only the digest of the token is kept.
#[derive(Debug, Clone, FromRow)]
pub struct PasswordResetRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String, // SHA-256 hex of the emailed token
    pub expires_at: OffsetDateTime,
    pub created_at: OffsetDateTime,
}

impl PasswordResetRecord {
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        now > self.expires_at
    }
}
