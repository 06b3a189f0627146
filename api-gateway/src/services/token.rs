use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;

use crate::config::JwtConfig;

/// The one algorithm this gateway signs and accepts. Tokens declaring any
/// other algorithm are rejected outright, whatever their signature.
const SIGNING_ALGORITHM: Algorithm = Algorithm::HS256;

/// Verified identity carried by a bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    /// Role granted at login ("user", "admin", ...)
    pub role: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

impl Claims {
    /// Permit iff the caller holds `required` or is an admin.
    pub fn require_role(&self, required: &str) -> Result<(), AppError> {
        if self.role == required || self.role == "admin" {
            Ok(())
        } else {
            Err(AppError::Forbidden(anyhow::anyhow!(
                "insufficient role for this operation"
            )))
        }
    }

    /// Permit iff the caller is the subject itself or an admin.
    pub fn require_self_or_admin(&self, subject_id: &str) -> Result<(), AppError> {
        if self.sub == subject_id || self.role == "admin" {
            Ok(())
        } else {
            Err(AppError::Forbidden(anyhow::anyhow!(
                "you can only access your own resources"
            )))
        }
    }
}

/// Issues and verifies HS256 tokens under the shared gateway secret.
#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expiry_seconds: i64,
}

impl TokenService {
    pub fn new(config: &JwtConfig) -> Self {
        let secret = config.secret.expose_secret().as_bytes();

        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            expiry_seconds: config.token_expiry_seconds,
        }
    }

    /// Issue a token for a subject/role pair.
    pub fn generate(&self, subject_id: &str, role: &str) -> Result<String, AppError> {
        let now = Utc::now();
        let claims = Claims {
            sub: subject_id.to_string(),
            role: role.to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::seconds(self.expiry_seconds)).timestamp(),
        };

        encode(&Header::new(SIGNING_ALGORITHM), &claims, &self.encoding_key)
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("failed to sign token: {e}")))
    }

    /// Verify a token and return its claims. Rejects algorithm mismatches,
    /// bad signatures, and anything at or past its expiry.
    pub fn validate(&self, token: &str) -> Result<Claims, AppError> {
        let mut validation = Validation::new(SIGNING_ALGORITHM);
        validation.validate_exp = true;
        validation.leeway = 0;

        let token_data = decode::<Claims>(token, &self.decoding_key, &validation)?;

        Ok(token_data.claims)
    }

    /// Token lifetime in seconds (for client info).
    pub fn expiry_seconds(&self) -> i64 {
        self.expiry_seconds
    }
}
