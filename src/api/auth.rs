use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::routes::{ApiError, AppState};
use crate::types::account::Role;

/// JWT claims: `sub` = account id (Uuid as string), `role`, `exp` (expiry),
/// `iat` (issued at).
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: String,
    pub exp: i64,
    pub iat: i64,
}

/// Authenticated account extracted from the JWT Bearer token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub account_id: Uuid,
    pub role: Role,
}

const JWT_EXPIRY_HOURS: i64 = 24;

impl Claims {
    pub fn new(account_id: Uuid, role: Role) -> Self {
        let now = chrono::Utc::now();
        let exp = (now + chrono::Duration::hours(JWT_EXPIRY_HOURS)).timestamp();
        Self {
            sub: account_id.to_string(),
            role: role.as_str().to_string(),
            exp,
            iat: now.timestamp(),
        }
    }
}

pub fn create_token(
    secret: &[u8],
    account_id: Uuid,
    role: Role,
) -> Result<String, jsonwebtoken::errors::Error> {
    let claims = Claims::new(account_id, role);
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret),
    )
}

pub fn decode_token(secret: &[u8], token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let mut validation = Validation::default();
    validation.validate_exp = true;
    let token_data = decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation)?;
    Ok(token_data.claims)
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(ApiError::unauthorized)?;
        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(ApiError::unauthorized)?;
        let claims =
            decode_token(&state.jwt_secret, token).map_err(|_| ApiError::unauthorized())?;
        let account_id = Uuid::parse_str(&claims.sub).map_err(|_| ApiError::unauthorized())?;
        let role = Role::parse(&claims.role).ok_or_else(ApiError::unauthorized)?;
        Ok(AuthUser { account_id, role })
    }
}
