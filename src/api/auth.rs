use axum::{
    Json,
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::sync::Arc;

use super::{ApiError, ApiResponse, AppState};
use crate::entities::users::UserStatus;
use crate::services::{AuthTokens, AuthenticatedIdentity, SignUpData};

// ============================================================================
// Request Types
// ============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignUpRequest {
    pub name: String,
    pub username: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

#[derive(Deserialize)]
pub struct SignInRequest {
    pub username: String,
    pub password: String,
}

// ============================================================================
// Field Validation
// ============================================================================

const MAX_IDENTIFIER_LEN: usize = 45;
const SPECIAL_CHARS: &str = "@#$%^&+=!";

/// Passwords need at least 8 characters, one uppercase letter, and one
/// special character.
pub(super) fn validate_password(password: &str, field: &str) -> Result<(), ApiError> {
    if password.len() < 8 {
        return Err(ApiError::validation(format!(
            "{field} must be at least 8 characters"
        )));
    }
    if !password.chars().any(char::is_uppercase) {
        return Err(ApiError::validation(format!(
            "{field} must contain at least one uppercase letter"
        )));
    }
    if !password.chars().any(|c| SPECIAL_CHARS.contains(c)) {
        return Err(ApiError::validation(format!(
            "{field} must contain at least one special character"
        )));
    }
    Ok(())
}

fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.chars().any(char::is_whitespace)
}

fn validate_sign_up(payload: &SignUpRequest) -> Result<(), ApiError> {
    if payload.name.is_empty() {
        return Err(ApiError::validation("Name is required"));
    }
    if payload.username.is_empty() {
        return Err(ApiError::validation("Username is required"));
    }
    if payload.username.len() > MAX_IDENTIFIER_LEN {
        return Err(ApiError::validation("Username must be at most 45 characters"));
    }
    if payload.email.is_empty() {
        return Err(ApiError::validation("Email is required"));
    }
    if payload.email.len() > MAX_IDENTIFIER_LEN {
        return Err(ApiError::validation("Email must be at most 45 characters"));
    }
    if !is_valid_email(&payload.email) {
        return Err(ApiError::validation("Invalid email format"));
    }
    validate_password(&payload.password, "Password")?;
    validate_password(&payload.confirm_password, "Password confirmation")?;
    Ok(())
}

// ============================================================================
// Middleware
// ============================================================================

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let auth_header = headers.get("Authorization")?;
    let auth_str = auth_header.to_str().ok()?;
    let token = auth_str.strip_prefix("Bearer ")?;
    Some(token.trim().to_string())
}

/// Authentication middleware for protected routes.
///
/// The bearer access token must carry a verifiable signature, resolve to
/// an existing Active user, pass the validity predicate, and its persisted
/// token record must be neither expired nor revoked. On success an
/// [`AuthenticatedIdentity`] is attached to the request for handlers.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<impl IntoResponse, ApiError> {
    let Some(token) = bearer_token(&headers) else {
        return Ok((StatusCode::UNAUTHORIZED, "Unauthorized").into_response());
    };

    let Ok(subject) = state.codec().extract_subject(&token) else {
        return Ok((StatusCode::UNAUTHORIZED, "Unauthorized").into_response());
    };

    let user = state
        .store()
        .get_user_by_username(&subject)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to load user: {e}")))?;

    let Some(user) = user else {
        return Ok((StatusCode::UNAUTHORIZED, "Unauthorized").into_response());
    };

    if user.status != UserStatus::Active || !state.codec().is_valid(&token, &user.username) {
        return Ok((StatusCode::UNAUTHORIZED, "Unauthorized").into_response());
    }

    // The signature may be fine while the record has been superseded
    let stored = state
        .store()
        .find_token_by_string(&token)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to load token: {e}")))?;

    match stored {
        Some(record) if !record.expired && !record.revoked => {
            tracing::Span::current().record("user_id", user.id);
            request.extensions_mut().insert(AuthenticatedIdentity {
                user_id: user.id,
                username: user.username,
            });
            Ok(next.run(request).await)
        }
        _ => Ok((StatusCode::UNAUTHORIZED, "Unauthorized").into_response()),
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/v1/auth/signup
/// Register a new user; returns an access/refresh token pair on success
pub async fn sign_up(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SignUpRequest>,
) -> Result<Json<ApiResponse<AuthTokens>>, ApiError> {
    validate_sign_up(&payload)?;

    let tokens = state
        .auth()
        .sign_up(SignUpData {
            name: payload.name,
            username: payload.username,
            email: payload.email,
            password: payload.password,
            confirm_password: payload.confirm_password,
        })
        .await?;

    Ok(Json(ApiResponse::success(tokens)))
}

/// POST /api/v1/auth/signin
/// Authenticate with username and password; supersedes previous tokens
pub async fn sign_in(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SignInRequest>,
) -> Result<Json<ApiResponse<AuthTokens>>, ApiError> {
    if payload.username.is_empty() {
        return Err(ApiError::validation("Username is required"));
    }
    if payload.password.is_empty() {
        return Err(ApiError::validation("Password is required"));
    }

    let tokens = state.auth().sign_in(&payload.username, &payload.password).await?;

    Ok(Json(ApiResponse::success(tokens)))
}

/// POST /api/v1/auth/refresh-token
/// Exchange a refresh token (Authorization: Bearer ...) for a new access
/// token. Malformed or invalid refresh requests get an empty 200, not an
/// error; only a vanished subject produces a 404.
pub async fn refresh_token(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let authorization = headers.get("Authorization").and_then(|h| h.to_str().ok());

    match state.auth().refresh_token(authorization).await? {
        Some(tokens) => Ok(Json(ApiResponse::success(tokens)).into_response()),
        None => Ok(StatusCode::OK.into_response()),
    }
}
