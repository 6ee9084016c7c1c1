use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use innkeep_core::CoreError;
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

pub const OWNER_ROLE: &str = "OWNER";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OwnerClaims {
    pub sub: String,
    pub role: String,
    pub exp: usize,
}

impl OwnerClaims {
    pub fn owner_id(&self) -> Result<Uuid, AppError> {
        Uuid::parse_str(&self.sub)
            .map_err(|_| AppError::AuthenticationError("token subject is not an owner id".to_string()))
    }
}

/// Owner routes: HS256 bearer token with role `OWNER`. Claims land in request extensions.
pub async fn owner_auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or_else(|| AppError::AuthenticationError("missing bearer token".to_string()))?;

    let token_data = decode::<OwnerClaims>(
        token,
        &DecodingKey::from_secret(state.auth.secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| AppError::AuthenticationError("invalid bearer token".to_string()))?;

    if token_data.claims.role != OWNER_ROLE {
        return Err(CoreError::PermissionDenied("owner access only".to_string()).into());
    }

    req.extensions_mut().insert(token_data.claims);

    Ok(next.run(req).await)
}
