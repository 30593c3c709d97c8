//! Bearer-token extractor for REST handlers.

use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts};
use std::sync::Arc;

use crate::error::ApiError;
use crate::identity;
use crate::storage::UserRow;
use crate::AppContext;

/// The authenticated caller. Add as a handler argument to require auth.
pub struct AuthUser(pub UserRow);

impl FromRequestParts<Arc<AppContext>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppContext>,
    ) -> Result<Self, Self::Rejection> {
        let header_value = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::Unauthorized)?;
        let token = header_value
            .strip_prefix("Bearer ")
            .ok_or(ApiError::Unauthorized)?;
        let user = identity::authenticate(&state.storage, token).await?;
        Ok(AuthUser(user))
    }
}
