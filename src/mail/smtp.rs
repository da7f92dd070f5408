//! Minimal SMTP client with AUTH LOGIN, over implicit TLS (port 465 style)
//! or a plain connection upgraded with STARTTLS (ports 587, 2525).

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use base64::Engine;
use rustls::ClientConfig;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::{client::TlsStream, TlsConnector};
use tracing::{debug, info};

use super::{Mailer, OutgoingMail};
use crate::config::SmtpConfig;

const IO_TIMEOUT: Duration = Duration::from_secs(15);
const EHLO_DOMAIN: &str = "feedback-api.local";

pub struct SmtpMailer {
    cfg: SmtpConfig,
    tls: TlsConnector,
}

impl SmtpMailer {
    pub fn new(cfg: SmtpConfig) -> anyhow::Result<Self> {
        Ok(Self {
            cfg,
            tls: TlsConnector::from(tls_client_config()?),
        })
    }

    async fn connect_tcp(&self) -> anyhow::Result<TcpStream> {
        let addr = format!("{}:{}", self.cfg.host, self.cfg.port);
        tokio::time::timeout(IO_TIMEOUT, TcpStream::connect(&addr))
            .await
            .map_err(|_| anyhow!("TCP connection to {addr} timed out"))?
            .with_context(|| format!("TCP connection to {addr}"))
    }

    async fn wrap_tls(&self, tcp: TcpStream) -> anyhow::Result<TlsStream<TcpStream>> {
        let server_name = rustls::pki_types::ServerName::try_from(self.cfg.host.clone())
            .map_err(|e| anyhow!("invalid server name {:?}: {e}", self.cfg.host))?;
        tokio::time::timeout(IO_TIMEOUT, self.tls.connect(server_name, tcp))
            .await
            .map_err(|_| anyhow!("TLS handshake with {} timed out", self.cfg.host))?
            .with_context(|| format!("TLS handshake with {}", self.cfg.host))
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, mail: &OutgoingMail) -> anyhow::Result<()> {
        info!(host = %self.cfg.host, to = %mail.to, subject = %mail.subject, "sending mail");

        let tcp = self.connect_tcp().await?;
        let mut session = if self.cfg.implicit_tls {
            let mut session = BufReader::new(self.wrap_tls(tcp).await?);
            expect_greeting(&mut session).await?;
            session
        } else {
            let tcp = starttls(BufReader::new(tcp)).await?;
            BufReader::new(self.wrap_tls(tcp).await?)
        };

        deliver(&mut session, &self.cfg, mail).await?;
        let _ = session.write_all(b"QUIT\r\n").await;
        let _ = session.flush().await;
        Ok(())
    }
}

fn tls_client_config() -> anyhow::Result<Arc<ClientConfig>> {
    let root_store = rustls::RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };
    let config = ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .context("rustls protocol versions")?
    .with_root_certificates(root_store)
    .with_no_client_auth();
    Ok(Arc::new(config))
}

async fn expect_greeting<S>(session: &mut BufReader<S>) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (status, lines) = read_reply(session).await?;
    if status / 100 != 2 {
        bail!("SMTP server rejected connection: {}", lines.join("; "));
    }
    Ok(())
}

/// Greeting, EHLO and STARTTLS on a plaintext connection. Returns the raw
/// stream, ready for the TLS handshake.
async fn starttls<S>(mut session: BufReader<S>) -> anyhow::Result<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    expect_greeting(&mut session).await?;
    command(&mut session, &ehlo_command(EHLO_DOMAIN), 2).await?;
    command(&mut session, "STARTTLS\r\n", 2).await?;
    // anything already buffered was sent before the upgrade
    if !session.buffer().is_empty() {
        bail!("SMTP server sent data before the TLS handshake");
    }
    Ok(session.into_inner())
}

/// Everything after the greeting on an encrypted session.
async fn deliver<S>(
    session: &mut BufReader<S>,
    cfg: &SmtpConfig,
    mail: &OutgoingMail,
) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    command(session, &ehlo_command(EHLO_DOMAIN), 2).await?;
    command(session, "AUTH LOGIN\r\n", 3).await?;
    command(session, &base64_line(&cfg.username), 3).await?;
    command(session, &base64_line(&cfg.password), 2).await?;
    command(session, &mail_from_command(&cfg.from), 2).await?;
    command(session, &rcpt_to_command(&mail.to), 2).await?;
    command(session, "DATA\r\n", 3).await?;
    let message = message_body(&cfg.from, &mail.to, &mail.subject, &mail.body);
    command(session, &message, 2).await
}

/// Writes `cmd` and requires a reply whose first digit is `expect`.
async fn command<S>(session: &mut BufReader<S>, cmd: &str, expect: u16) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    session
        .write_all(cmd.as_bytes())
        .await
        .context("SMTP write")?;
    session.flush().await.context("SMTP flush")?;
    let (status, lines) = read_reply(session).await?;
    if status / 100 != expect {
        bail!("SMTP error: expected {expect}xx, got {status}: {}", lines.join("; "));
    }
    Ok(())
}

/// Reads one reply, following `NNN-` continuation lines.
async fn read_reply<S>(reader: &mut BufReader<S>) -> anyhow::Result<(u16, Vec<String>)>
where
    S: AsyncRead + Unpin,
{
    let deadline = tokio::time::Instant::now() + IO_TIMEOUT;
    let mut lines = Vec::new();
    loop {
        let mut line = String::new();
        let n = tokio::time::timeout_at(deadline, reader.read_line(&mut line))
            .await
            .map_err(|_| anyhow!("SMTP reply timed out"))?
            .context("SMTP read")?;
        if n == 0 {
            break;
        }
        let line = line.trim_end().to_string();
        debug!(smtp_line = %line, "SMTP reply line");
        let last = line.as_bytes().get(3) != Some(&b'-');
        lines.push(line);
        if last {
            break;
        }
    }
    Ok((reply_status(&lines), lines))
}

fn reply_status(lines: &[String]) -> u16 {
    lines
        .last()
        .and_then(|l| l.get(..3))
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

fn ehlo_command(domain: &str) -> String {
    format!("EHLO {domain}\r\n")
}

fn mail_from_command(from: &str) -> String {
    format!("MAIL FROM:<{from}>\r\n")
}

fn rcpt_to_command(to: &str) -> String {
    format!("RCPT TO:<{to}>\r\n")
}

fn base64_line(input: &str) -> String {
    format!(
        "{}\r\n",
        base64::engine::general_purpose::STANDARD.encode(input)
    )
}

/// Full DATA payload: headers, CRLF-normalised body with dot-stuffing, and
/// the terminating `.` line.
fn message_body(from: &str, to: &str, subject: &str, body: &str) -> String {
    let mut out = format!(
        "From: {from}\r\n\
         To: {to}\r\n\
         Subject: {subject}\r\n\
         MIME-Version: 1.0\r\n\
         Content-Type: text/plain; charset=UTF-8\r\n\
         \r\n"
    );
    for line in body.lines() {
        if line.starts_with('.') {
            out.push('.');
        }
        out.push_str(line);
        out.push_str("\r\n");
    }
    out.push_str(".\r\n");
    out
}
