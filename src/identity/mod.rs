//! User directory and bearer-token authentication.
//!
//! Tokens are opaque 256-bit random values, hex-encoded. A token never
//! expires server-side; clients treat it as a session credential.

use crate::error::{ApiError, ApiResult};
use crate::storage::{Storage, UserRow};
use rand_core::{OsRng, RngCore};

/// Generate a 64-char hex token from 32 bytes of OS randomness.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Register a new user. Email addresses are unique (case-preserved,
/// compared exactly).
pub async fn register_user(
    storage: &Storage,
    email: &str,
    display_name: &str,
) -> ApiResult<UserRow> {
    let email = email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(ApiError::InvalidInput("valid email is required".into()));
    }
    let display_name = display_name.trim();
    if display_name.is_empty() {
        return Err(ApiError::InvalidInput("display_name is required".into()));
    }
    if storage.lookup_user_by_email(email).await?.is_some() {
        return Err(ApiError::Conflict(format!(
            "user with email {email} already exists"
        )));
    }
    Ok(storage.create_user(email, display_name).await?)
}

/// Issue a fresh bearer token for an existing user, by email.
pub async fn issue_token(storage: &Storage, email: &str) -> ApiResult<(UserRow, String)> {
    let user = storage
        .lookup_user_by_email(email.trim())
        .await?
        .ok_or(ApiError::NotFound("user"))?;
    let token = generate_token();
    storage.insert_token(&token, user.id).await?;
    tracing::debug!(user_id = user.id, "issued bearer token");
    Ok((user, token))
}

/// Resolve a bearer token to its user, or `Unauthorized`.
pub async fn authenticate(storage: &Storage, token: &str) -> ApiResult<UserRow> {
    storage
        .user_for_token(token)
        .await?
        .ok_or(ApiError::Unauthorized)
}
