//! JWT access-token validation.
//!
//! Tokens are HS256-signed JWTs issued by the identity provider and carry a
//! [`Claims`] payload with the user and the tenant (`company_id`) the
//! holder is scoped to. The gateway only validates them;
//! [`generate_access_token`] exists for tooling and tests.

use eventgate_core::error::CoreError;
use eventgate_core::types::{CompanyId, UserId};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// JWT claims embedded in every access token.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject -- the user's identifier at the identity provider.
    pub sub: UserId,
    /// Tenant the token is scoped to.
    pub company_id: CompanyId,
    /// Expiration time (UTC Unix timestamp).
    pub exp: i64,
    /// Issued-at time (UTC Unix timestamp).
    pub iat: i64,
    /// Unique token identifier, for audit.
    pub jti: String,
}

/// Configuration for JWT validation.
#[derive(Debug, Clone)]
pub struct JwtConfig {
    /// HMAC-SHA256 secret shared with the identity provider.
    pub secret: String,
}

/// Lifetime of tokens minted by [`generate_access_token`], in minutes.
const ACCESS_TOKEN_EXPIRY_MINS: i64 = 15;

impl JwtConfig {
    /// Load JWT configuration from environment variables.
    ///
    /// | Env Var      | Required |
    /// |--------------|----------|
    /// | `JWT_SECRET` | **yes**  |
    ///
    /// # Panics
    ///
    /// Panics if `JWT_SECRET` is not set or is empty.
    pub fn from_env() -> Self {
        let secret =
            std::env::var("JWT_SECRET").expect("JWT_SECRET must be set in the environment");
        assert!(!secret.is_empty(), "JWT_SECRET must not be empty");

        Self { secret }
    }
}

/// Generate an HS256 access token for `user_id` scoped to `company_id`.
pub fn generate_access_token(
    user_id: &str,
    company_id: &str,
    config: &JwtConfig,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = chrono::Utc::now().timestamp();
    let exp = now + ACCESS_TOKEN_EXPIRY_MINS * 60;

    let claims = Claims {
        sub: user_id.to_string(),
        company_id: company_id.to_string(),
        exp,
        iat: now,
        jti: Uuid::new_v4().to_string(),
    };

    encode(
        &Header::default(), // HS256
        &claims,
        &EncodingKey::from_secret(config.secret.as_bytes()),
    )
}

/// Validate and decode an access token, returning the embedded [`Claims`].
///
/// Validates the signature and expiration.
pub fn validate_token(
    token: &str,
    config: &JwtConfig,
) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.secret.as_bytes()),
        &Validation::default(), // HS256, validates exp
    )?;
    Ok(token_data.claims)
}

/// Identity resolved from a validated token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub company_id: CompanyId,
}

/// Resolve the identity for a token and an optional requested tenant.
///
/// A missing or invalid token is [`CoreError::Unauthorized`]; a requested
/// `company_id` other than the token's tenant is [`CoreError::Forbidden`].
pub fn authenticate(
    token: Option<&str>,
    requested_company: Option<&str>,
    config: &JwtConfig,
) -> Result<Identity, CoreError> {
    let token = token
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| CoreError::Unauthorized("Missing access token".into()))?;

    let claims = validate_token(token, config)
        .map_err(|_| CoreError::Unauthorized("Invalid or expired token".into()))?;

    if let Some(requested) = requested_company.filter(|c| !c.is_empty()) {
        if requested != claims.company_id {
            return Err(CoreError::Forbidden(format!(
                "Token is not scoped to company {requested}"
            )));
        }
    }

    Ok(Identity {
        user_id: claims.sub,
        company_id: claims.company_id,
    })
}
