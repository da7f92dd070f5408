use std::sync::Arc;

use tracing::{info, warn};

use crate::auth::jwt::JwtKeys;
use crate::config::AppConfig;
use crate::db::{MemoryStore, PgStore};
use crate::feedback::repo::FeedbackStore;
use crate::mail::{smtp::SmtpMailer, LogMailer, Mailer, Notifier};
use crate::reset::repo::ResetTokenStore;
use crate::users::repo::UserStore;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub keys: JwtKeys,
    pub users: Arc<dyn UserStore>,
    pub feedback: Arc<dyn FeedbackStore>,
    pub resets: Arc<dyn ResetTokenStore>,
    pub notifier: Arc<Notifier>,
}

impl AppState {
    /// Chooses the storage and mail backends once, from configuration.
    pub async fn init() -> anyhow::Result<Self> {
        let config = AppConfig::from_env()?;

        let mailer: Arc<dyn Mailer> = match &config.smtp {
            Some(smtp) => {
                info!(host = %smtp.host, port = smtp.port, implicit_tls = smtp.implicit_tls, "mail via SMTP");
                Arc::new(SmtpMailer::new(smtp.clone())?)
            }
            None => {
                warn!("EMAIL_HOST is not set; outgoing mail is only logged");
                Arc::new(LogMailer)
            }
        };

        match config.database_url.clone() {
            Some(url) => {
                let store = PgStore::connect(&url).await?;
                info!("using postgres storage");
                Ok(Self::from_parts(config, store, mailer))
            }
            None => {
                warn!(
                    "DATABASE_URL is not set; using in-memory storage (development only, \
                     users and password reset records are lost on restart)"
                );
                Ok(Self::from_parts(config, MemoryStore::default(), mailer))
            }
        }
    }

    pub fn from_parts<S>(config: AppConfig, store: S, mailer: Arc<dyn Mailer>) -> Self
    where
        S: UserStore + FeedbackStore + ResetTokenStore + 'static,
    {
        let store = Arc::new(store);
        Self {
            keys: JwtKeys::new(&config.jwt),
            config: Arc::new(config),
            users: store.clone(),
            feedback: store.clone(),
            resets: store,
            notifier: Arc::new(Notifier::new(mailer)),
        }
    }

    #[cfg(test)]
    pub fn fake() -> Self {
        Self::fake_with_mailer(Arc::new(LogMailer))
    }

    #[cfg(test)]
    pub fn fake_with_mailer(mailer: Arc<dyn Mailer>) -> Self {
        let config = AppConfig {
            database_url: None,
            frontend_url: "http://frontend.test".into(),
            jwt: crate::config::JwtConfig {
                secret: "test".into(),
                insecure: false,
            },
            smtp: None,
        };
        Self::from_parts(config, MemoryStore::default(), mailer)
    }
}
