use axum::{Extension, Json, extract::State};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{ApiError, ApiResponse, AppState};
use crate::services::AuthenticatedIdentity;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
    pub confirm_password: String,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// PUT /api/v1/users/change-password
/// Change the caller's password (requires current password verification).
/// The identity comes from the auth middleware, not from the body.
pub async fn change_password(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<AuthenticatedIdentity>,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    if payload.current_password.is_empty() {
        return Err(ApiError::validation("Current password is required"));
    }
    super::auth::validate_password(&payload.new_password, "New password")?;
    super::auth::validate_password(&payload.confirm_password, "Password confirmation")?;

    state
        .auth()
        .change_password(
            &identity,
            &payload.current_password,
            &payload.new_password,
            &payload.confirm_password,
        )
        .await?;

    Ok(Json(ApiResponse::success(MessageResponse {
        message: "Password updated successfully".to_string(),
    })))
}
