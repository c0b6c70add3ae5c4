//! Bearer-token identity
//!
//! HS256 JWTs carrying the numeric user id and role. Tokens are minted by the
//! `token` CLI command and checked by `api::middleware::auth_middleware`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::assistant::scope::Role;
use crate::config::AuthConfig;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,
    #[error("token expired")]
    Expired,
    #[error("invalid token: {0}")]
    Invalid(String),
    #[error("token subject '{0}' is not a user id")]
    BadSubject(String),
    #[error("could not sign token: {0}")]
    Signing(String),
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::Expired,
            _ => AuthError::Invalid(e.to_string()),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match self {
            AuthError::Signing(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNAUTHORIZED,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// User id, as a string per JWT convention.
    pub sub: String,
    pub role: Role,
    pub exp: usize,
}

impl Claims {
    pub fn user_id(&self) -> Result<i64, AuthError> {
        self.sub.parse().map_err(|_| AuthError::BadSubject(self.sub.clone()))
    }
}

/// Signing and verification keys derived from one shared secret.
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl_hours: u64,
}

impl JwtKeys {
    pub fn new(secret: &str, ttl_hours: u64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl_hours,
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(&config.jwt_secret, config.token_ttl_hours)
    }

    pub fn issue(&self, user_id: i64, role: Role) -> Result<String, AuthError> {
        self.issue_for(user_id, role, self.ttl_hours)
    }

    pub fn issue_for(&self, user_id: i64, role: Role, ttl_hours: u64) -> Result<String, AuthError> {
        let exp = chrono::Utc::now() + chrono::Duration::hours(ttl_hours as i64);
        let claims = Claims { sub: user_id.to_string(), role, exp: exp.timestamp() as usize };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding).map_err(|e| AuthError::Signing(e.to_string()))
    }

    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let validation = Validation::new(Algorithm::HS256);
        Ok(decode::<Claims>(token, &self.decoding, &validation)?.claims)
    }
}

/// Mint a token from `[auth]` settings.
pub fn issue_token(config: &AuthConfig, user_id: i64, role: Role, ttl_hours: Option<u64>) -> Result<String, AuthError> {
    let keys = JwtKeys::from_config(config);
    keys.issue_for(user_id, role, ttl_hours.unwrap_or(config.token_ttl_hours))
}
