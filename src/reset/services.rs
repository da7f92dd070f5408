use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use super::repo_types::PasswordResetRecord;
use crate::{
    auth::password::hash_password,
    error::ApiError,
    mail::{Dispatch, OutgoingMail},
    state::AppState,
};

pub const RESET_TOKEN_TTL: Duration = Duration::hours(1);

/// Sent for known and unknown emails alike.
pub const RESET_REQUESTED_MESSAGE: &str = "If the email exists, a reset link will be sent";

#[derive(Debug)]
pub enum ResetRequest {
    /// No identity with that email; nothing was stored or sent.
    UnknownEmail,
    /// The record is stored and the mail queued. Awaiting `delivery` is
    /// optional.
    Issued {
        user_id: Uuid,
        delivery: JoinHandle<Dispatch>,
    },
}

/// 32 random bytes, hex encoded. Only ever leaves the process by mail.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn digest_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

pub fn reset_link(frontend_url: &str, token: &str, user_id: Uuid) -> String {
    format!(
        "{}/reset-password?token={}&id={}",
        frontend_url.trim_end_matches('/'),
        token,
        user_id
    )
}

pub async fn request_reset(state: &AppState, email: &str) -> Result<ResetRequest, ApiError> {
    let Some(user) = state.users.find_by_email(email).await? else {
        info!("password reset requested for unknown email");
        return Ok(ResetRequest::UnknownEmail);
    };

    let token = generate_token();
    let now = OffsetDateTime::now_utc();
    let record = PasswordResetRecord {
        id: Uuid::new_v4(),
        user_id: user.id,
        token_hash: digest_token(&token),
        expires_at: now + RESET_TOKEN_TTL,
        created_at: now,
    };
    state.resets.put(&record).await?;

    let link = reset_link(&state.config.frontend_url, &token, user.id);
    let mail = OutgoingMail {
        to: user.email.clone(),
        subject: "Password reset request".into(),
        body: format!(
            "You requested a password reset. Open the link below to choose a new password \
             (valid 1 hour):\n\n{link}\n\nIf you did not request this, ignore this email."
        ),
    };
    let delivery = state.notifier.queue(mail);
    info!(user_id = %user.id, "password reset issued");

    Ok(ResetRequest::Issued {
        user_id: user.id,
        delivery,
    })
}

pub async fn consume_reset(
    state: &AppState,
    user_id: Uuid,
    token: &str,
    new_password: &str,
) -> Result<(), ApiError> {
    let token_hash = digest_token(token);
    let Some(record) = state
        .resets
        .find_by_owner_and_hash(user_id, &token_hash)
        .await?
    else {
        warn!(%user_id, "reset token not found");
        return Err(ApiError::bad_request("Invalid or expired token"));
    };

    // claim the record before touching the credential
    let claimed = state.resets.take(&record).await?;

    if record.is_expired_at(OffsetDateTime::now_utc()) {
        warn!(%user_id, "reset token expired");
        return Err(ApiError::bad_request("Token expired"));
    }
    if !claimed {
        warn!(%user_id, "reset token already used");
        return Err(ApiError::bad_request("Invalid or expired token"));
    }

    let hash = hash_password(new_password)?;
    if !state.users.update_password(user_id, &hash).await? {
        // owner vanished between issue and use
        return Err(ApiError::bad_request("Invalid or expired token"));
    }

    info!(%user_id, "password reset completed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        auth::{
            claims::Role,
            password::{hash_password, verify_password},
        },
        mail::{
            testing::{next_mail, RecordingMailer, StalledMailer},
            Mailer,
        },
        users::repo_types::NewUser,
    };

    async fn seeded(mailer: Arc<dyn Mailer>) -> (AppState, Uuid) {
        let state = AppState::fake_with_mailer(mailer);
        let user = state
            .users
            .create(NewUser {
                name: None,
                email: "a@x.com".into(),
                password_hash: hash_password("secret1").unwrap(),
                role: Role::User,
            })
            .await
            .unwrap()
            .unwrap();
        (state, user.id)
    }

    fn token_from(link_mail: &OutgoingMail) -> String {
        let start = link_mail.body.find("token=").unwrap() + "token=".len();
        link_mail.body[start..start + 64].to_string()
    }

    #[test]
    fn digest_is_sha256_hex() {
        assert_eq!(
            digest_token("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn tokens_are_64_hex_chars_and_unique() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn link_shape() {
        let id = Uuid::nil();
        assert_eq!(
            reset_link("http://localhost:5173/", "tok", id),
            "http://localhost:5173/reset-password?token=tok&id=00000000-0000-0000-0000-000000000000"
        );
    }

    #[tokio::test]
    async fn unknown_email_stores_and_sends_nothing() {
        let mailer = Arc::new(RecordingMailer::default());
        let (state, _) = seeded(mailer.clone()).await;
        let outcome = request_reset(&state, "nobody@x.com").await.unwrap();
        assert!(matches!(outcome, ResetRequest::UnknownEmail));
        tokio::task::yield_now().await;
        assert!(mailer.last().is_none());
    }

    #[tokio::test]
    async fn issued_token_is_stored_only_as_digest() {
        let mailer = Arc::new(RecordingMailer::default());
        let (state, user_id) = seeded(mailer.clone()).await;
        request_reset(&state, "a@x.com").await.unwrap();

        let token = token_from(&next_mail(&mailer).await);
        assert!(state
            .resets
            .find_by_owner_and_hash(user_id, &token)
            .await
            .unwrap()
            .is_none());
        let record = state
            .resets
            .find_by_owner_and_hash(user_id, &digest_token(&token))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.expires_at - record.created_at, RESET_TOKEN_TTL);
    }

    #[tokio::test]
    async fn failed_dispatch_still_issues() {
        let mailer = Arc::new(RecordingMailer::failing());
        let (state, user_id) = seeded(mailer).await;
        let ResetRequest::Issued { user_id: id, delivery } =
            request_reset(&state, "a@x.com").await.unwrap()
        else {
            panic!("reset was not issued");
        };
        assert_eq!(id, user_id);
        assert!(matches!(delivery.await.unwrap(), Dispatch::Failed(_)));
        assert_eq!(state.notifier.stats().failed, 1);
    }

    #[tokio::test]
    async fn issuing_does_not_wait_for_delivery() {
        let mailer = Arc::new(StalledMailer {
            delay: std::time::Duration::from_secs(5),
        });
        let (state, user_id) = seeded(mailer).await;
        let outcome = tokio::time::timeout(
            std::time::Duration::from_millis(500),
            request_reset(&state, "a@x.com"),
        )
        .await
        .expect("issuing waited on the mailer")
        .unwrap();
        assert!(matches!(outcome, ResetRequest::Issued { user_id: id, .. } if id == user_id));
        assert_eq!(state.notifier.stats().failed, 0);
    }

    #[tokio::test]
    async fn token_is_single_use() {
        let mailer = Arc::new(RecordingMailer::default());
        let (state, user_id) = seeded(mailer.clone()).await;
        request_reset(&state, "a@x.com").await.unwrap();
        let token = token_from(&next_mail(&mailer).await);

        consume_reset(&state, user_id, &token, "newpass1").await.unwrap();
        let user = state.users.find_by_id(user_id).await.unwrap().unwrap();
        assert!(verify_password("newpass1", &user.password_hash));

        let again = consume_reset(&state, user_id, &token, "other").await;
        assert!(matches!(again, Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn expired_token_is_rejected_and_removed() {
        let (state, user_id) = seeded(Arc::new(RecordingMailer::default())).await;
        let token = generate_token();
        let created = OffsetDateTime::now_utc() - Duration::hours(2);
        state
            .resets
            .put(&PasswordResetRecord {
                id: Uuid::new_v4(),
                user_id,
                token_hash: digest_token(&token),
                expires_at: created + RESET_TOKEN_TTL,
                created_at: created,
            })
            .await
            .unwrap();

        let err = consume_reset(&state, user_id, &token, "newpass1").await.unwrap_err();
        assert_eq!(err.to_string(), "Token expired");
        assert!(state
            .resets
            .find_by_owner_and_hash(user_id, &digest_token(&token))
            .await
            .unwrap()
            .is_none());

        let user = state.users.find_by_id(user_id).await.unwrap().unwrap();
        assert!(verify_password("secret1", &user.password_hash));
    }

    #[tokio::test]
    async fn token_bound_to_its_owner() {
        let mailer = Arc::new(RecordingMailer::default());
        let (state, _) = seeded(mailer.clone()).await;
        request_reset(&state, "a@x.com").await.unwrap();
        let token = token_from(&next_mail(&mailer).await);

        let err = consume_reset(&state, Uuid::new_v4(), &token, "newpass1")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid or expired token");
    }

    #[tokio::test]
    async fn concurrent_consumes_have_one_winner() {
        let mailer = Arc::new(RecordingMailer::default());
        let (state, user_id) = seeded(mailer.clone()).await;
        request_reset(&state, "a@x.com").await.unwrap();
        let token = token_from(&next_mail(&mailer).await);

        let (a, b) = tokio::join!(
            consume_reset(&state, user_id, &token, "first-pass"),
            consume_reset(&state, user_id, &token, "second-pass"),
        );
        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
    }
}
