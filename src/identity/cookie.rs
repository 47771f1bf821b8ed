//! Signed auth cookie (`_t`).
//!
//! The cookie holds an HS256 token with the user id, trust level and the
//! time it was issued. Only the verified result matters here; any failure
//! means the request is treated as coming from its IP.

use std::time::Duration;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Cookie carrying the credential.
pub const AUTH_COOKIE_NAME: &str = "_t";

/// Default freshness window.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(10 * 60);

/// Allowed clock skew for cookies issued "in the future".
pub const CLOCK_SKEW: Duration = Duration::from_secs(60);

/// Verified identity carried by the cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: u64,
    pub trust_level: u8,
    /// Unix seconds.
    pub issued_at: i64,
}

/// Why a cookie was not accepted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerificationError {
    #[error("malformed auth cookie")]
    Malformed,

    #[error("auth cookie signature mismatch")]
    BadSignature,

    #[error("auth cookie issued {age_secs}s ago")]
    Expired { age_secs: i64 },

    #[error("auth cookie issued {ahead_secs}s in the future")]
    FromFuture { ahead_secs: i64 },
}

impl VerificationError {
    /// True when the signature was valid but the cookie is not fresh.
    #[inline]
    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            VerificationError::Expired { .. } | VerificationError::FromFuture { .. }
        )
    }
}

/// Verifies auth cookies against a shared secret.
pub struct CookieVerifier {
    key: DecodingKey,
    validation: Validation,
    max_age: Duration,
}

impl CookieVerifier {
    pub fn new(secret: &[u8], max_age: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        Self {
            key: DecodingKey::from_secret(secret),
            validation,
            max_age,
        }
    }

    #[inline]
    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Check signature and freshness at unix time `now`.
    pub fn verify(&self, token: &str, now: u64) -> Result<Identity, VerificationError> {
        let identity = self.verify_signature(token)?;

        let now = i64::try_from(now).unwrap_or(i64::MAX);
        let age = now.saturating_sub(identity.issued_at);
        if age < 0 {
            let ahead = -age;
            if ahead > CLOCK_SKEW.as_secs() as i64 {
                return Err(VerificationError::FromFuture { ahead_secs: ahead });
            }
        } else if age > self.max_age.as_secs() as i64 {
            return Err(VerificationError::Expired { age_secs: age });
        }

        Ok(identity)
    }

    /// Check the signature only.
    pub fn verify_signature(&self, token: &str) -> Result<Identity, VerificationError> {
        decode::<Identity>(token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature => VerificationError::BadSignature,
                _ => VerificationError::Malformed,
            })
    }
}

impl std::fmt::Debug for CookieVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CookieVerifier")
            .field("max_age", &self.max_age)
            .finish_non_exhaustive()
    }
}

/// Issues auth cookies. Used by tooling and tests.
pub struct CookieSigner {
    key: EncodingKey,
}

impl CookieSigner {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: EncodingKey::from_secret(secret),
        }
    }

    pub fn issue(&self, identity: &Identity) -> Result<String, jsonwebtoken::errors::Error> {
        encode(&Header::new(Algorithm::HS256), identity, &self.key)
    }
}
