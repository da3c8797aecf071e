//! Account handlers: registration, login/logout, profile and password reset.

use axum::{
    Json,
    extract::{Extension, Path, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument};
use utoipa::ToSchema;

use super::{normalize_email, valid_email};
use crate::{
    api::{
        AppState,
        error::{ErrorBody, MessageBody, json_body},
    },
    auth::{ResetNotice, bearer_token, password},
    error::{Error, Result},
    storage::{NewUser, ProfileUpdate, User},
};

#[derive(ToSchema, Deserialize, Debug)]
pub struct RegisterRequest {
    username: String,
    email: String,
    #[schema(format = Password)]
    password: String,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct LoginRequest {
    email: String,
    #[schema(format = Password)]
    password: String,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct LoginResponse {
    token: String,
    expires_at: DateTime<Utc>,
    user: User,
}

#[derive(ToSchema, Deserialize, Debug, Default)]
pub struct ProfileRequest {
    username: Option<String>,
    email: Option<String>,
    profile_image_url: Option<String>,
    biography: Option<String>,
    institution: Option<String>,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct ResetRequest {
    email: String,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct ResetConfirm {
    #[schema(format = Password)]
    new_password: String,
}

/// `Some(trimmed)` for a non-empty value, `None` otherwise.
fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[utoipa::path(
    post,
    path= "/api/user/register",
    request_body = RegisterRequest,
    responses (
        (status = 201, description = "Registration successful", body = User),
        (status = 400, description = "Invalid username, email or password", body = ErrorBody),
        (status = 409, description = "Username or email already taken", body = ErrorBody),
    ),
    tag= "user"
)]
#[instrument(skip(state, payload))]
pub async fn register(
    state: Extension<Arc<AppState>>,
    payload: std::result::Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let request = json_body(payload)?;

    let username = request.username.trim().to_string();
    if username.is_empty() {
        return Err(Error::Validation("Username is required".to_string()));
    }

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return Err(Error::Validation("Invalid email".to_string()));
    }

    password::check_strength(&request.password)?;
    let password_hash = password::hash_password(SecretString::from(request.password)).await?;

    let user = state
        .store
        .create_user(&NewUser {
            username,
            email,
            password_hash,
        })
        .await?;

    info!(user_id = user.id, "user registered");

    Ok((StatusCode::CREATED, Json(user)))
}

#[utoipa::path(
    post,
    path= "/api/user/login",
    request_body = LoginRequest,
    responses (
        (status = 200, description = "Login successful", body = LoginResponse),
        (status = 401, description = "Invalid credentials", body = ErrorBody),
    ),
    tag= "user"
)]
#[instrument(skip(state, payload))]
pub async fn login(
    state: Extension<Arc<AppState>>,
    payload: std::result::Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>> {
    let request = json_body(payload)?;
    let email = normalize_email(&request.email);

    let credentials = state
        .store
        .find_credentials(&email)
        .await?
        .ok_or(Error::Unauthorized)?;

    let verified = password::verify_password(
        SecretString::from(request.password),
        credentials.password_hash,
    )
    .await?;
    if !verified || !credentials.user.is_active {
        return Err(Error::Unauthorized);
    }

    let user = credentials.user;
    let issued = state.sessions.issue_session_token(user.id)?;
    state.store.record_login(user.id).await?;

    info!(user_id = user.id, "user logged in");

    Ok(Json(LoginResponse {
        token: issued.token,
        expires_at: issued.expires_at,
        user,
    }))
}

#[utoipa::path(
    get,
    path= "/api/user/logout",
    responses (
        (status = 200, description = "Token revoked", body = MessageBody),
        (status = 401, description = "Missing or invalid token", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag= "user"
)]
#[instrument(skip(state, headers))]
pub async fn logout(
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<MessageBody>> {
    let principal = state.sessions.authorize(&headers).await?;
    let token = bearer_token(&headers).ok_or(Error::Unauthorized)?;
    state.sessions.revoke_session_token(token).await?;

    info!(user_id = principal.user_id, "user logged out");

    Ok(MessageBody::new("Successfully logged out"))
}

#[utoipa::path(
    get,
    path= "/api/user/profile",
    responses (
        (status = 200, description = "Current user", body = User),
        (status = 401, description = "Missing or invalid token", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag= "user"
)]
#[instrument(skip(state, headers))]
pub async fn profile(state: Extension<Arc<AppState>>, headers: HeaderMap) -> Result<Json<User>> {
    let principal = state.sessions.authorize(&headers).await?;
    let user = state
        .store
        .fetch_user(principal.user_id)
        .await?
        .ok_or_else(|| Error::NotFound("User not found".to_string()))?;
    Ok(Json(user))
}

#[utoipa::path(
    put,
    path= "/api/user/profile",
    request_body = ProfileRequest,
    responses (
        (status = 200, description = "Profile updated", body = User),
        (status = 400, description = "Invalid email", body = ErrorBody),
        (status = 401, description = "Missing or invalid token", body = ErrorBody),
        (status = 409, description = "Username or email already taken", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag= "user"
)]
#[instrument(skip(state, headers, payload))]
pub async fn update_profile(
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
    payload: std::result::Result<Json<ProfileRequest>, JsonRejection>,
) -> Result<Json<User>> {
    let principal = state.sessions.authorize(&headers).await?;
    let request = json_body(payload)?;

    let email = non_empty(request.email).map(|email| normalize_email(&email));
    if let Some(email) = &email
        && !valid_email(email)
    {
        return Err(Error::Validation("Invalid email".to_string()));
    }

    let update = ProfileUpdate {
        username: non_empty(request.username),
        email,
        profile_image_url: non_empty(request.profile_image_url),
        biography: non_empty(request.biography),
        institution: non_empty(request.institution),
    };

    let user = state
        .store
        .update_profile(principal.user_id, &update)
        .await?
        .ok_or_else(|| Error::NotFound("User not found".to_string()))?;
    Ok(Json(user))
}

#[utoipa::path(
    post,
    path= "/api/user/reset-password",
    request_body = ResetRequest,
    responses (
        (status = 202, description = "Reset instructions sent if the account exists", body = MessageBody),
    ),
    tag= "user"
)]
#[instrument(skip(state, payload))]
pub async fn request_password_reset(
    state: Extension<Arc<AppState>>,
    payload: std::result::Result<Json<ResetRequest>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let request = json_body(payload)?;
    let email = normalize_email(&request.email);

    // Same answer whether or not the account exists.
    let accepted = (
        StatusCode::ACCEPTED,
        MessageBody::new("If the account exists, reset instructions have been sent"),
    );

    let credentials = match state.store.find_credentials(&email).await {
        Ok(Some(credentials)) if credentials.user.is_active => credentials,
        Ok(_) => return Ok(accepted),
        Err(err) => {
            error!("Failed to look up account for reset: {err}");
            return Ok(accepted);
        }
    };

    let user_id = credentials.user.id;
    match state.sessions.issue_password_reset_token(user_id).await {
        Ok(issued) => {
            let notice = ResetNotice {
                user_id,
                to_email: credentials.user.email,
                token: issued.token,
                expires_at: issued.expires_at,
            };
            if let Err(err) = state.notifier.send(&notice) {
                error!(user_id, "Failed to deliver reset token: {err}");
            }
        }
        Err(err) => error!(user_id, "Failed to issue reset token: {err}"),
    }

    Ok(accepted)
}

#[utoipa::path(
    post,
    path= "/api/user/reset-password/{token}",
    request_body = ResetConfirm,
    params(("token" = String, Path, description = "Password reset token")),
    responses (
        (status = 200, description = "Password changed", body = MessageBody),
        (status = 400, description = "Invalid or expired token, or weak password", body = ErrorBody),
    ),
    tag= "user"
)]
#[instrument(skip_all)]
pub async fn confirm_password_reset(
    state: Extension<Arc<AppState>>,
    Path(token): Path<String>,
    payload: std::result::Result<Json<ResetConfirm>, JsonRejection>,
) -> Result<Json<MessageBody>> {
    let request = json_body(payload)?;
    let user_id = state
        .sessions
        .redeem_password_reset_token(
            &token,
            SecretString::from(request.new_password),
            state.store.as_ref(),
        )
        .await?;

    info!(user_id, "password reset");

    Ok(MessageBody::new("Password has been reset"))
}
