use anyhow::Context;
use serde::Deserialize;
use tracing::warn;

/// Signing secret used when `JWT_SECRET` is absent. Local development only.
pub const INSECURE_DEV_SECRET: &str = "change_this_secret";

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    /// Set when `secret` is the development placeholder.
    pub insecure: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    /// TLS from the first byte; otherwise the plaintext session is upgraded
    /// with STARTTLS.
    pub implicit_tls: bool,
    pub username: String,
    pub password: String,
    pub from: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Postgres connection string. Without it every store is in-memory.
    pub database_url: Option<String>,
    /// Base of the human-facing reset links.
    pub frontend_url: String,
    pub jwt: JwtConfig,
    /// `None` when `EMAIL_HOST` is not set; mail is then only logged.
    pub smtp: Option<SmtpConfig>,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = non_empty_var("DATABASE_URL");

        let jwt = match non_empty_var("JWT_SECRET") {
            Some(secret) => JwtConfig {
                secret,
                insecure: false,
            },
            None => {
                warn!("JWT_SECRET is not set; using an insecure placeholder secret (development only)");
                JwtConfig {
                    secret: INSECURE_DEV_SECRET.into(),
                    insecure: true,
                }
            }
        };

        let frontend_url =
            non_empty_var("FRONTEND_URL").unwrap_or_else(|| "http://localhost:5173".into());

        let smtp = match non_empty_var("EMAIL_HOST") {
            Some(host) => {
                let port = match non_empty_var("EMAIL_PORT") {
                    Some(v) => v
                        .parse::<u16>()
                        .map_err(|e| anyhow::anyhow!("EMAIL_PORT {v:?} is not a port: {e}"))?,
                    None => 465,
                };
                let implicit_tls = match non_empty_var("EMAIL_SECURE") {
                    Some(v) => parse_flag(&v)
                        .ok_or_else(|| anyhow::anyhow!("EMAIL_SECURE {v:?} is not true/false"))?,
                    None => port == 465,
                };
                let username = std::env::var("EMAIL_USER").context("EMAIL_HOST is set but EMAIL_USER is not")?;
                Some(SmtpConfig {
                    host,
                    port,
                    implicit_tls,
                    password: std::env::var("EMAIL_PASS").context("EMAIL_HOST is set but EMAIL_PASS is not")?,
                    from: non_empty_var("EMAIL_FROM").unwrap_or_else(|| username.clone()),
                    username,
                })
            }
            None => None,
        };

        Ok(Self {
            database_url,
            frontend_url,
            jwt,
            smtp,
        })
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_flag(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}
