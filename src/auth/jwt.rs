use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// JWT Claims structure
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,   // Subject (user id)
    pub email: String, // Account email
    pub exp: i64,      // Expiration time
    pub iat: i64,      // Issued at
}

/// Identity the credential verifier hands back for a valid bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: String,
    pub email: String,
}

/// The credential verifier: opaque bearer token in, identity out.
pub struct JwtValidator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtValidator {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 30; // Allow 30 seconds clock skew

        Self {
            decoding_key: DecodingKey::from_secret(secret.as_ref()),
            validation,
        }
    }

    pub fn verify_token(&self, token: &str) -> Result<AuthenticatedUser> {
        let token_data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| Error::AuthenticationFailed(format!("invalid token: {e}")))?;

        let claims = token_data.claims;
        if claims.sub.is_empty() {
            return Err(Error::AuthenticationFailed(
                "token has no subject".to_string(),
            ));
        }

        Ok(AuthenticatedUser {
            user_id: claims.sub,
            email: claims.email,
        })
    }
}

/// Mints tokens for accounts created elsewhere; the login flow itself lives
/// outside this service.
pub struct JwtIssuer {
    encoding_key: EncodingKey,
}

impl JwtIssuer {
    pub const TOKEN_TTL_HOURS: i64 = 24;

    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_ref()),
        }
    }

    pub fn issue(&self, user_id: &str, email: &str) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            email: email.to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::hours(Self::TOKEN_TTL_HOURS)).timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| Error::AuthenticationFailed(format!("could not issue token: {e}")))
    }
}

/// Pulls the bearer token out of a WebSocket upgrade request.
///
/// Checks the Authorization header first, then the `token` query parameter,
/// which browser WebSocket clients need since they cannot set custom headers.
pub fn extract_token_from_request(
    req: &tokio_tungstenite::tungstenite::handshake::server::Request,
) -> Option<String> {
    if let Some(auth_header) = req.headers().get("Authorization") {
        if let Ok(auth_str) = auth_header.to_str() {
            if let Some(token) = auth_str.strip_prefix("Bearer ") {
                return Some(token.to_string());
            }
        }
    }

    if let Some(query) = req.uri().query() {
        for param in query.split('&') {
            if let Some((key, value)) = param.split_once('=') {
                if key == "token" {
                    if let Ok(decoded_token) = urlencoding::decode(value) {
                        return Some(decoded_token.to_string());
                    }
                }
            }
        }
    }

    None
}
