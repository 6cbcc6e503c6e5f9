use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use time::OffsetDateTime;
use tracing::warn;

use super::{error::AuthError, token::Claims};
use crate::state::AppState;

/// Validated bearer token claims.
pub struct AuthUser(pub Claims);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or(AuthError::Unauthorized)?;

        // Expect "Bearer <token>"
        let token = auth
            .strip_prefix("Bearer ")
            .or_else(|| auth.strip_prefix("bearer "))
            .ok_or(AuthError::Unauthorized)?;

        let Some(claims) = state.auth.tokens().validate_token(token.trim()) else {
            warn!("invalid or expired token");
            return Err(AuthError::Unauthorized);
        };

        if let Some(jti) = claims.jti {
            if state
                .revoked
                .is_revoked(&jti, OffsetDateTime::now_utc().unix_timestamp())
            {
                warn!(%jti, "revoked token presented");
                return Err(AuthError::Unauthorized);
            }
        }

        Ok(AuthUser(claims))
    }
}
