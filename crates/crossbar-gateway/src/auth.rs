//! Connection token verification.
//!
//! Clients present a signed token with the WebSocket upgrade; the subject
//! claim becomes the connection's recipient identity.

use crossbar_core::RecipientId;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Claims carried by a connection token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Recipient identity this token authenticates.
    pub sub: String,
    /// Expiry as a Unix timestamp.
    pub exp: u64,
}

/// Token verification failures. The upgrade is refused; no detail beyond the
/// reason is sent to the client.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The token is malformed, mis-signed, or expired.
    #[error("invalid connection token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    /// The token verified but its subject is empty.
    #[error("connection token has an empty subject")]
    EmptySubject,
}

/// Verify a connection token and extract the recipient it authenticates.
pub fn verify_token(token: &str, secret: &[u8]) -> Result<RecipientId, AuthError> {
    let validation = Validation::new(Algorithm::HS256);
    let data = jsonwebtoken::decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation)?;
    if data.claims.sub.is_empty() {
        return Err(AuthError::EmptySubject);
    }
    Ok(RecipientId::from(data.claims.sub))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use jsonwebtoken::{EncodingKey, Header};
    use std::time::{SystemTime, UNIX_EPOCH};

    const SECRET: &[u8] = b"test-secret";

    fn sign(sub: &str, exp_offset_secs: i64) -> String {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64;
        let claims = Claims {
            sub: sub.into(),
            exp: (now + exp_offset_secs).max(0) as u64,
        };
        jsonwebtoken::encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET))
            .unwrap()
    }

    #[test]
    fn valid_token_yields_recipient() {
        let token = sign("u1", 3600);
        let recipient = verify_token(&token, SECRET).unwrap();
        assert_eq!(recipient.as_str(), "u1");
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = sign("u1", 3600);
        let err = verify_token(&token, b"other-secret").unwrap_err();
        assert_matches!(err, AuthError::InvalidToken(_));
    }

    #[test]
    fn expired_token_is_rejected() {
        let token = sign("u1", -3600);
        let err = verify_token(&token, SECRET).unwrap_err();
        assert_matches!(err, AuthError::InvalidToken(_));
    }

    #[test]
    fn garbage_token_is_rejected() {
        let err = verify_token("not.a.token", SECRET).unwrap_err();
        assert_matches!(err, AuthError::InvalidToken(_));
    }

    #[test]
    fn empty_subject_is_rejected() {
        let token = sign("", 3600);
        let err = verify_token(&token, SECRET).unwrap_err();
        assert_matches!(err, AuthError::EmptySubject);
    }
}
