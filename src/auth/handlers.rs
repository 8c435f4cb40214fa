use axum::{
    extract::{FromRef, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::{info, instrument, warn};

use super::{
    dto::{
        CreateUserRequest, PublicUser, RefreshRequest, TokenRequest, TokenResponse,
        UpdateMeRequest, TOKEN_TYPE,
    },
    email::is_valid_email,
    extractors::Caller,
    jwt::{JwtKeys, TokenPair},
    password::MIN_PASSWORD_LEN,
    services::{self, ProfileChanges},
};
use crate::{
    error::{AppError, AppResult},
    extract::JsonBody,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/user/create", post(create_user))
        .route("/user/token", post(create_token))
        .route("/user/token/refresh", post(refresh_token))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/user/me", get(get_me).put(put_me).patch(patch_me))
}

fn check_password(password: &str) -> AppResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        warn!("password too short");
        return Err(AppError::invalid(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

fn token_response(pair: TokenPair) -> Json<TokenResponse> {
    Json(TokenResponse {
        token_type: TOKEN_TYPE.to_owned(),
        access_token: pair.access_token,
        refresh_token: pair.refresh_token,
        expires_in: pair.expires_in,
    })
}

#[instrument(skip(state, payload))]
pub async fn create_user(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<CreateUserRequest>,
) -> AppResult<(StatusCode, Json<PublicUser>)> {
    let email = payload.email.trim();
    if !is_valid_email(email) {
        warn!(email = %email, "invalid email");
        return Err(AppError::invalid("enter a valid email address"));
    }
    check_password(&payload.password)?;
    if payload.name.trim().is_empty() {
        return Err(AppError::invalid("name is required"));
    }

    let user = services::register(
        state.store.as_ref(),
        email,
        &payload.password,
        payload.name.trim(),
    )
    .await?;
    info!(user_id = %user.id, "user registered");
    Ok((StatusCode::CREATED, Json(user.into())))
}

#[instrument(skip(state, payload))]
pub async fn create_token(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<TokenRequest>,
) -> AppResult<Json<TokenResponse>> {
    if payload.email.trim().is_empty() || payload.password.is_empty() {
        return Err(AppError::invalid("email and password are required"));
    }
    let user = services::verify(state.store.as_ref(), &payload.email, &payload.password).await?;
    let pair = JwtKeys::from_ref(&state).issue_pair(user.id)?;
    info!(user_id = %user.id, "token issued");
    Ok(token_response(pair))
}

#[instrument(skip(state, payload))]
pub async fn refresh_token(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<RefreshRequest>,
) -> AppResult<Json<TokenResponse>> {
    let keys = JwtKeys::from_ref(&state);
    let claims = keys.verify_refresh(&payload.refresh_token).map_err(|e| {
        warn!(error = %e, "refresh rejected");
        AppError::unauthenticated("invalid or expired refresh token")
    })?;
    match state.store.user_by_id(claims.sub).await? {
        Some(user) if user.is_active => Ok(token_response(keys.issue_pair(user.id)?)),
        _ => Err(AppError::unauthenticated("user not found or inactive")),
    }
}

#[instrument(skip(state))]
pub async fn get_me(State(state): State<AppState>, caller: Caller) -> AppResult<Json<PublicUser>> {
    let user = state
        .store
        .user_by_id(caller.id)
        .await?
        .ok_or(AppError::NotFound("user"))?;
    Ok(Json(user.into()))
}

#[instrument(skip(state, payload))]
pub async fn put_me(
    State(state): State<AppState>,
    caller: Caller,
    JsonBody(payload): JsonBody<UpdateMeRequest>,
) -> AppResult<Json<PublicUser>> {
    if payload.name.is_none() || payload.password.is_none() {
        return Err(AppError::invalid("name and password are required"));
    }
    update_me(state, caller, payload).await
}

#[instrument(skip(state, payload))]
pub async fn patch_me(
    State(state): State<AppState>,
    caller: Caller,
    JsonBody(payload): JsonBody<UpdateMeRequest>,
) -> AppResult<Json<PublicUser>> {
    update_me(state, caller, payload).await
}

async fn update_me(
    state: AppState,
    caller: Caller,
    payload: UpdateMeRequest,
) -> AppResult<Json<PublicUser>> {
    if let Some(password) = &payload.password {
        check_password(password)?;
    }
    if matches!(&payload.name, Some(n) if n.trim().is_empty()) {
        return Err(AppError::invalid("name may not be blank"));
    }
    let user = services::update_profile(
        state.store.as_ref(),
        caller.id,
        ProfileChanges {
            name: payload.name.map(|n| n.trim().to_string()),
            password: payload.password,
        },
    )
    .await?;
    Ok(Json(user.into()))
}
