//! Callback bearer tokens
//!
//! The prepare step mints a short-lived token bound to one execution and
//! its tenant. The engine presents it to the completion endpoint, which
//! verifies the binding before applying the report.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Audience claim expected by the completion endpoint.
pub const CALLBACK_AUDIENCE: &str = "job-worker";

/// Issuer claim stamped by the orchestrator.
pub const CALLBACK_ISSUER: &str = "job-orchestrator";

/// Token lifetime in seconds.
pub const CALLBACK_TOKEN_TTL_SECS: i64 = 3600;

/// Claims carried by a callback token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackClaims {
    /// Execution id the token is bound to.
    pub sub: String,
    /// Tenant the execution belongs to.
    pub tid: String,
    pub aud: String,
    pub iss: String,
    pub exp: i64,
    pub iat: i64,
}

/// Mint an HS256 token for one execution with a one-hour expiry.
pub fn mint_callback_token(
    execution_id: Uuid,
    tenant_id: &str,
    signing_key: &[u8],
) -> crate::Result<String> {
    let now = chrono::Utc::now().timestamp();
    let claims = CallbackClaims {
        sub: execution_id.to_string(),
        tid: tenant_id.to_string(),
        aud: CALLBACK_AUDIENCE.to_string(),
        iss: CALLBACK_ISSUER.to_string(),
        exp: now + CALLBACK_TOKEN_TTL_SECS,
        iat: now,
    };

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(signing_key),
    )
    .map_err(|e| crate::Error::Internal(format!("failed to sign callback token: {e}")))
}

/// Verify signature, audience, issuer, and expiry. Binding the claims to
/// the path's execution id and the execution's tenant is the caller's job.
pub fn verify_callback_token(token: &str, signing_key: &[u8]) -> crate::Result<CallbackClaims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_audience(&[CALLBACK_AUDIENCE]);
    validation.set_issuer(&[CALLBACK_ISSUER]);

    decode::<CallbackClaims>(token, &DecodingKey::from_secret(signing_key), &validation)
        .map(|data| data.claims)
        .map_err(|e| crate::Error::Execution(format!("invalid callback token: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &[u8] = b"test-signing-key";

    #[test]
    fn test_mint_and_verify_round_trip() {
        let execution_id = Uuid::new_v4();
        let token = mint_callback_token(execution_id, "tenant-a", KEY).unwrap();
        let claims = verify_callback_token(&token, KEY).unwrap();

        assert_eq!(claims.sub, execution_id.to_string());
        assert_eq!(claims.tid, "tenant-a");
        assert_eq!(claims.aud, CALLBACK_AUDIENCE);
        assert_eq!(claims.iss, CALLBACK_ISSUER);
        assert_eq!(claims.exp - claims.iat, CALLBACK_TOKEN_TTL_SECS);
    }

    #[test]
    fn test_wrong_key_rejected() {
        let token = mint_callback_token(Uuid::new_v4(), "tenant-a", KEY).unwrap();
        assert!(verify_callback_token(&token, b"other-key").is_err());
    }

    #[test]
    fn test_garbage_token_rejected() {
        assert!(verify_callback_token("not-a-token", KEY).is_err());
    }

    #[test]
    fn test_wrong_audience_rejected() {
        let now = chrono::Utc::now().timestamp();
        let claims = CallbackClaims {
            sub: Uuid::new_v4().to_string(),
            tid: "tenant-a".to_string(),
            aud: "someone-else".to_string(),
            iss: CALLBACK_ISSUER.to_string(),
            exp: now + 60,
            iat: now,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(KEY),
        )
        .unwrap();
        assert!(verify_callback_token(&token, KEY).is_err());
    }

    #[test]
    fn test_expired_token_rejected() {
        let now = chrono::Utc::now().timestamp();
        let claims = CallbackClaims {
            sub: Uuid::new_v4().to_string(),
            tid: "tenant-a".to_string(),
            aud: CALLBACK_AUDIENCE.to_string(),
            iss: CALLBACK_ISSUER.to_string(),
            exp: now - 120,
            iat: now - 240,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(KEY),
        )
        .unwrap();
        assert!(verify_callback_token(&token, KEY).is_err());
    }
}
