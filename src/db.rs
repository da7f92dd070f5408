use anyhow::Context;
use dashmap::DashMap;
use sqlx::{postgres::PgPoolOptions, PgPool};
use uuid::Uuid;

use crate::{
    feedback::repo_types::{FeedbackResponse, FeedbackTemplate},
    reset::repo_types::PasswordResetRecord,
    users::repo_types::User,
};

/// Postgres-backed implementation of every store trait.
#[derive(Clone)]
pub struct PgStore {
    pub db: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let db = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .context("connect to database")?;

        // Run migrations if present
        if let Err(e) = sqlx::migrate!("./migrations").run(&db).await {
            tracing::warn!(error = %e, "migration failed; continuing");
        }

        Ok(Self { db })
    }
}

/// Process-local implementation of every store trait. Nothing survives a
/// restart.
#[derive(Default)]
pub struct MemoryStore {
    pub(crate) users: DashMap<Uuid, User>,
    /// email -> user id, the uniqueness index for `users`.
    pub(crate) emails: DashMap<String, Uuid>,
    pub(crate) templates: DashMap<Uuid, FeedbackTemplate>,
    pub(crate) responses: DashMap<Uuid, FeedbackResponse>,
    /// token hash -> record
    pub(crate) resets: DashMap<String, PasswordResetRecord>,
}
