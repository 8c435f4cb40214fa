use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use tracing::warn;
use uuid::Uuid;

use super::jwt::JwtKeys;
use crate::{error::AppError, state::AppState};

/// The authenticated user behind a request.
///
/// Only constructed from a valid access token belonging to an existing,
/// active user, so handlers that take a `Caller` never run anonymously.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub id: Uuid,
}

#[async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| AppError::unauthenticated("missing Authorization header"))?;

        // Expect "Bearer <token>"
        let token = auth
            .strip_prefix("Bearer ")
            .or_else(|| auth.strip_prefix("bearer "))
            .ok_or_else(|| AppError::unauthenticated("invalid auth scheme"))?;

        let keys = JwtKeys::from_ref(state);
        let claims = keys.verify_access(token).map_err(|e| {
            warn!(error = %e, "invalid or expired token");
            AppError::unauthenticated("invalid or expired token")
        })?;

        match state.store.user_by_id(claims.sub).await? {
            Some(user) if user.is_active => Ok(Caller { id: user.id }),
            _ => {
                warn!(user_id = %claims.sub, "token for missing or inactive user");
                Err(AppError::unauthenticated("user not found or inactive"))
            }
        }
    }
}
