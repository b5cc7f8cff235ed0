use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use shuttle_core::{Identity, Role};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

// ============================================================================
// JWT Claims
// ============================================================================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// User id.
    pub sub: String,
    /// `CUSTOMER` or `ADMIN`.
    pub role: String,
    pub exp: usize,
}

impl Claims {
    pub fn new(user_id: Uuid, role: Role, exp: usize) -> Self {
        Self {
            sub: user_id.to_string(),
            role: role.to_string(),
            exp,
        }
    }
}

/// HS256 token for `claims`. Used by operator tooling and tests.
pub fn issue_token(secret: &str, claims: &Claims) -> Result<String, jsonwebtoken::errors::Error> {
    encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

fn identity_from_request(state: &AppState, req: &Request) -> Result<Identity, AppError> {
    // 1. Extract token from Authorization header
    let token = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or_else(|| AppError::AuthenticationError("Missing bearer token".to_string()))?;

    // 2. Decode and validate JWT
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(state.auth.secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| {
        tracing::debug!(error = %e, "Rejected bearer token");
        AppError::AuthenticationError("Invalid or expired token".to_string())
    })?;

    // 3. Claims become the identity the engine trusts
    let user_id = Uuid::parse_str(&token_data.claims.sub)
        .map_err(|_| AppError::AuthenticationError("Token subject is not a user id".to_string()))?;
    let role: Role = token_data.claims.role.parse()?;

    Ok(Identity { user_id, role })
}

// ============================================================================
// Authentication Middleware
// ============================================================================

/// Any valid token; injects the caller's `Identity`.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let identity = identity_from_request(&state, &req)?;
    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}

/// Valid token with the ADMIN role.
pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let identity = identity_from_request(&state, &req)?;
    identity.ensure_admin()?;
    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}
