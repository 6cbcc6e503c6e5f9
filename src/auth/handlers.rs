use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use time::OffsetDateTime;
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        dto::{
            ChangePasswordRequest, LoginRequest, RegisterRequest, TokenResponse, UserResponse,
            VerifyTokenResponse,
        },
        error::AuthError,
        extractors::AuthUser,
    },
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/me", get(get_me))
        .route("/auth/verify-token", post(verify_token))
        .route("/auth/change-password", post(change_password))
        .route("/auth/logout", post(logout))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<UserResponse>), AuthError> {
    let Json(payload) = payload?;
    let user = state.auth.register(payload).await?;
    Ok((StatusCode::CREATED, Json(user.into())))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<TokenResponse>, AuthError> {
    let Json(payload) = payload?;
    let res = state.auth.login(&payload.email, &payload.password).await?;
    Ok(Json(res))
}

#[instrument(skip(state, claims))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
) -> Result<Json<UserResponse>, AuthError> {
    let user = state.auth.current_user(&claims).await?;
    Ok(Json(user.into()))
}

#[instrument(skip(state, claims))]
pub async fn verify_token(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
) -> Result<Json<VerifyTokenResponse>, AuthError> {
    let user = state.auth.current_user(&claims).await?;
    Ok(Json(VerifyTokenResponse {
        valid: true,
        user_id: Some(user.id),
        email: user.email,
    }))
}

#[instrument(skip(state, claims, payload))]
pub async fn change_password(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    payload: Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> Result<StatusCode, AuthError> {
    let Json(payload) = payload?;
    let user = state.auth.current_user(&claims).await?;
    state
        .auth
        .change_password(&user, &payload.current_password, &payload.new_password)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, claims))]
pub async fn logout(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
) -> StatusCode {
    match claims.jti {
        Some(jti) => {
            state
                .revoked
                .revoke(jti, claims.exp, OffsetDateTime::now_utc().unix_timestamp());
            info!(%jti, "token revoked on logout");
        }
        None => warn!(sub = %claims.sub, "token without jti cannot be revoked"),
    }
    StatusCode::NO_CONTENT
}
