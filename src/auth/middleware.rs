//! Request gates.
//!
//! `authenticate` verifies the bearer token and stores the [`Claims`] in the
//! request extensions. `require_role` reads them back and compares roles.
//! Routers apply them with [`protect`], authentication outermost.

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::{from_fn_with_state, Next},
    response::Response,
    Router,
};
use tracing::warn;

use super::{
    claims::{Claims, Role},
    jwt::JwtKeys,
};
use crate::{error::ApiError, state::AppState};

/// Token from `Authorization: Bearer <token>`. The scheme is matched exactly.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    let header = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;
    match header.strip_prefix("Bearer ") {
        Some(token) if !token.is_empty() => Ok(token),
        _ => Err(ApiError::Unauthorized),
    }
}

/// Exact-match role check; no role implies another.
pub fn authorize(identity: Option<&Claims>, required: Role) -> Result<(), ApiError> {
    let claims = identity.ok_or(ApiError::Unauthorized)?;
    if claims.role != required {
        warn!(user_id = %claims.sub, role = %claims.role, required = %required, "role mismatch");
        return Err(ApiError::Forbidden);
    }
    Ok(())
}

pub async fn authenticate(
    State(keys): State<JwtKeys>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let claims = keys.verify(bearer_token(req.headers())?)?;
    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

pub async fn require_role(
    State(required): State<Role>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    authorize(req.extensions().get::<Claims>(), required)?;
    Ok(next.run(req).await)
}

/// Puts every route of `router` behind the authentication gate and, when a
/// role is given, the authorization gate.
pub fn protect(
    router: Router<AppState>,
    state: &AppState,
    role: Option<Role>,
) -> Router<AppState> {
    let router = match role {
        Some(role) => router.route_layer(from_fn_with_state(role, require_role)),
        None => router,
    };
    router.route_layer(from_fn_with_state(state.clone(), authenticate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use uuid::Uuid;

    fn headers_with(value: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        h
    }

    fn claims(role: Role) -> Claims {
        Claims {
            sub: Uuid::new_v4(),
            email: "a@x.com".into(),
            role,
            iat: 0,
            exp: 0,
        }
    }

    #[test]
    fn bearer_token_requires_exact_scheme() {
        assert_eq!(bearer_token(&headers_with("Bearer abc")).unwrap(), "abc");
        assert!(bearer_token(&headers_with("bearer abc")).is_err());
        assert!(bearer_token(&headers_with("Basic abc")).is_err());
        assert!(bearer_token(&headers_with("Bearer ")).is_err());
        assert!(bearer_token(&headers_with("abc")).is_err());
        assert!(bearer_token(&HeaderMap::new()).is_err());
    }

    #[test]
    fn authorize_is_exact_match() {
        assert!(authorize(Some(&claims(Role::Admin)), Role::Admin).is_ok());
        assert!(authorize(Some(&claims(Role::User)), Role::User).is_ok());
        assert!(matches!(
            authorize(Some(&claims(Role::Admin)), Role::User),
            Err(ApiError::Forbidden)
        ));
        assert!(matches!(
            authorize(Some(&claims(Role::User)), Role::Admin),
            Err(ApiError::Forbidden)
        ));
    }

    #[test]
    fn authorize_without_identity_is_unauthorized() {
        assert!(matches!(
            authorize(None, Role::User),
            Err(ApiError::Unauthorized)
        ));
    }
}
