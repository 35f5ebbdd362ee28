//! JWT token generation and validation
//! Access tokens only; attribute claims feed ABAC conditions

use crate::{config::SecurityConfig, error::AppError, models::access::Environment};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// JWT claims for access tokens
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,

    /// Username
    pub username: String,

    /// User attributes (department, region, ...)
    #[serde(default)]
    pub attributes: Environment,

    /// Issued at
    pub iat: i64,

    /// Expiration
    pub exp: i64,

    /// JWT ID (unique token identifier)
    pub jti: String,
}

/// JWT service
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_token_exp_secs: u64,
}

impl JwtService {
    /// Create JWT service from config
    pub fn from_config(config: &SecurityConfig) -> Result<Self, AppError> {
        let secret = config.jwt_secret.expose_secret();

        // Ensure secret is at least 32 bytes for HS256
        if secret.len() < 32 {
            return Err(AppError::Config("JWT secret too short (min 32 chars)".to_string()));
        }

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            access_token_exp_secs: config.access_token_exp_secs,
        })
    }

    /// Generate access token
    pub fn generate_access_token(
        &self,
        user_id: &Uuid,
        username: &str,
        attributes: Environment,
    ) -> Result<String, AppError> {
        let now = Utc::now();
        let expiration = now + Duration::seconds(self.access_token_exp_secs as i64);

        let claims = Claims {
            sub: user_id.to_string(),
            username: username.to_string(),
            attributes,
            iat: now.timestamp(),
            exp: expiration.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::default(), &claims, &self.encoding_key).map_err(|e| {
            tracing::error!("Failed to encode access token: {:?}", e);
            AppError::Internal(format!("Failed to encode access token: {}", e))
        })
    }

    /// Validate access token
    pub fn validate_access_token(&self, token: &str) -> Result<Claims, AppError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;

        let token_data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|e| {
            tracing::debug!("Token validation failed: {:?}", e);
            AppError::Unauthorized
        })?;

        Ok(token_data.claims)
    }
}
