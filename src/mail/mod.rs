//! Outgoing mail.
//!
//! [`Mailer`] is the delivery mechanism; [`Notifier`] wraps one and turns a
//! delivery failure into a [`Dispatch::Failed`] value that callers may ignore
//! without losing track of it. [`Notifier::queue`] sends in the background so
//! that request latency never depends on the mail server.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub mod smtp;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: &OutgoingMail) -> anyhow::Result<()>;
}

/// Used when no SMTP server is configured. Nothing leaves the process; the
/// body is written at debug level so links can be followed locally.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, mail: &OutgoingMail) -> anyhow::Result<()> {
        info!(to = %mail.to, subject = %mail.subject, "mail not delivered (no SMTP configured)");
        debug!(body = %mail.body, "undelivered mail body");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Sent,
    Failed(String),
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct MailStats {
    pub sent: u64,
    pub failed: u64,
}

pub struct Notifier {
    mailer: Arc<dyn Mailer>,
    sent: AtomicU64,
    failed: AtomicU64,
}

impl Notifier {
    pub fn new(mailer: Arc<dyn Mailer>) -> Self {
        Self {
            mailer,
            sent: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Never fails; the outcome is returned and counted.
    pub async fn dispatch(&self, mail: &OutgoingMail) -> Dispatch {
        match self.mailer.send(mail).await {
            Ok(()) => {
                self.sent.fetch_add(1, Ordering::Relaxed);
                Dispatch::Sent
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, subject = %mail.subject, "mail dispatch failed");
                Dispatch::Failed(e.to_string())
            }
        }
    }

    /// Spawns [`Notifier::dispatch`]. The handle may be dropped; the outcome
    /// is counted and logged either way.
    pub fn queue(self: &Arc<Self>, mail: OutgoingMail) -> JoinHandle<Dispatch> {
        let notifier = Arc::clone(self);
        tokio::spawn(async move { notifier.dispatch(&mail).await })
    }

    pub fn stats(&self) -> MailStats {
        MailStats {
            sent: self.sent.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
pub mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Keeps every message; fails on demand.
    #[derive(Default)]
    pub struct RecordingMailer {
        pub outbox: Mutex<Vec<OutgoingMail>>,
        pub fail: bool,
    }

    impl RecordingMailer {
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        pub fn last(&self) -> Option<OutgoingMail> {
            self.outbox.lock().unwrap().last().cloned()
        }
    }

    /// Waits for `delay` and then fails, like an unreachable SMTP host.
    pub struct StalledMailer {
        pub delay: std::time::Duration,
    }

    #[async_trait]
    impl Mailer for StalledMailer {
        async fn send(&self, _mail: &OutgoingMail) -> anyhow::Result<()> {
            tokio::time::sleep(self.delay).await;
            anyhow::bail!("smtp timed out")
        }
    }

    /// Polls `mailer` until something lands in its outbox.
    pub async fn next_mail(mailer: &RecordingMailer) -> OutgoingMail {
        for _ in 0..200 {
            if let Some(mail) = mailer.last() {
                return mail;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("no mail was sent");
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, mail: &OutgoingMail) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("smtp unreachable");
            }
            self.outbox.lock().unwrap().push(mail.clone());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingMailer;
    use super::*;

    fn mail() -> OutgoingMail {
        OutgoingMail {
            to: "a@x.com".into(),
            subject: "hi".into(),
            body: "body".into(),
        }
    }

    #[tokio::test]
    async fn dispatch_counts_outcomes() {
        let ok = Notifier::new(Arc::new(RecordingMailer::default()));
        assert_eq!(ok.dispatch(&mail()).await, Dispatch::Sent);
        assert_eq!(ok.stats(), MailStats { sent: 1, failed: 0 });

        let broken = Notifier::new(Arc::new(RecordingMailer::failing()));
        assert!(matches!(broken.dispatch(&mail()).await, Dispatch::Failed(_)));
        assert_eq!(broken.stats(), MailStats { sent: 0, failed: 1 });
    }

    #[tokio::test]
    async fn queued_mail_is_counted() {
        let mailer = Arc::new(RecordingMailer::default());
        let notifier = Arc::new(Notifier::new(mailer.clone()));
        let outcome = notifier.queue(mail()).await.unwrap();
        assert_eq!(outcome, Dispatch::Sent);
        assert_eq!(mailer.last(), Some(mail()));
        assert_eq!(notifier.stats().sent, 1);
    }

    #[tokio::test]
    async fn log_mailer_always_succeeds() {
        assert!(LogMailer.send(&mail()).await.is_ok());
    }
}
