//! Credential expiry tracking
//!
//! Bearer credentials issued by the backend are JWTs. Only the `exp` claim is
//! read here; the signature is the backend's business. Decoding fails soft:
//! a credential whose expiry cannot be read is assumed to live for one hour.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, TimeZone, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::debug;

/// Lifetime assumed for credentials without a readable expiry
pub const FALLBACK_LIFETIME_MS: i64 = 3_600_000;

/// Bearer credential plus its derived expiry
#[derive(Debug, Clone)]
pub struct Credential {
    token: SecretString,
    expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    /// Wrap a raw token, decoding its expiry relative to `Utc::now()`
    pub fn new(token: impl Into<String>) -> Self {
        Self::new_at(token, Utc::now())
    }

    /// Wrap a raw token, decoding its expiry relative to `now`
    pub fn new_at(token: impl Into<String>, now: DateTime<Utc>) -> Self {
        let token = token.into();
        let expires_at = TokenManager::decode_expiry(&token, now);
        Self {
            token: SecretString::from(token),
            expires_at,
        }
    }

    /// The raw bearer string
    pub fn expose(&self) -> &str {
        self.token.expose_secret()
    }

    /// When the credential stops being accepted
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Whether the credential is expired at `now`
    ///
    /// Credentials without any expiry never expire locally; the backend
    /// is the judge for those.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .map(|expiry| TokenManager::is_expired(expiry, now))
            .unwrap_or(false)
    }

    /// Masked form for display (first 4 and last 4 chars)
    pub fn masked(&self) -> String {
        let exposed = self.expose();
        if exposed.len() <= 8 || !exposed.is_char_boundary(4) {
            "*".repeat(exposed.chars().count())
        } else {
            match exposed.char_indices().rev().nth(3) {
                Some((tail, _)) => format!("{}...{}", &exposed[..4], &exposed[tail..]),
                None => "*".repeat(exposed.chars().count()),
            }
        }
    }
}

impl PartialEq for Credential {
    fn eq(&self, other: &Self) -> bool {
        self.expose() == other.expose() && self.expires_at == other.expires_at
    }
}

/// Stateless expiry arithmetic over credentials
pub struct TokenManager;

impl TokenManager {
    /// Read the expiry out of a credential
    ///
    /// Returns `None` only for an empty credential. Anything else that cannot
    /// be decoded (not a JWT, bad base64, bad JSON, missing or non-numeric
    /// `exp`) yields `now + 1h`.
    pub fn decode_expiry(credential: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if credential.is_empty() {
            return None;
        }

        match Self::exp_claim_millis(credential).and_then(|ms| Utc.timestamp_millis_opt(ms).single()) {
            Some(expiry) => Some(expiry),
            None => {
                debug!("credential expiry unreadable, assuming one hour");
                Some(now + Duration::milliseconds(FALLBACK_LIFETIME_MS))
            }
        }
    }

    /// `now >= expiry`
    pub fn is_expired(expiry: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now >= expiry
    }

    /// Time left before `expiry`; negative once expired
    pub fn time_until_expiry(expiry: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
        expiry.signed_duration_since(now)
    }

    fn exp_claim_millis(credential: &str) -> Option<i64> {
        let payload = credential.split('.').nth(1)?;
        let normalized: String = payload
            .trim_end_matches('=')
            .chars()
            .map(|c| match c {
                '+' => '-',
                '/' => '_',
                other => other,
            })
            .collect();
        let bytes = URL_SAFE_NO_PAD.decode(normalized).ok()?;
        let claims: Value = serde_json::from_slice(&bytes).ok()?;
        let exp = claims.get("exp")?.as_f64()?;
        if !exp.is_finite() {
            return None;
        }
        Some((exp * 1000.0) as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jwt_with_claims(claims: &str) -> String {
        format!(
            "{}.{}.signature",
            URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#),
            URL_SAFE_NO_PAD.encode(claims)
        )
    }

    #[test]
    fn test_decode_exp_claim() {
        let now = Utc::now();
        let token = jwt_with_claims(r#"{"id":"u1","exp":1700000000}"#);
        let expiry = TokenManager::decode_expiry(&token, now).unwrap();
        assert_eq!(expiry.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn test_decode_padded_standard_alphabet() {
        let now = Utc::now();
        let payload = base64::engine::general_purpose::STANDARD.encode(r#"{"exp":1700000001}"#);
        let token = format!("header.{}.sig", payload);
        let expiry = TokenManager::decode_expiry(&token, now).unwrap();
        assert_eq!(expiry.timestamp(), 1_700_000_001);
    }

    #[test]
    fn test_fallback_for_opaque_token() {
        let now = Utc::now();
        for token in ["opaque-token", "a.!!!.c", &jwt_with_claims(r#"{"sub":"u1"}"#)] {
            let expiry = TokenManager::decode_expiry(token, now).unwrap();
            assert_eq!(
                (expiry - now).num_milliseconds(),
                FALLBACK_LIFETIME_MS,
                "token {token}"
            );
        }
    }

    #[test]
    fn test_empty_credential_has_no_expiry() {
        assert!(TokenManager::decode_expiry("", Utc::now()).is_none());
    }

    #[test]
    fn test_expiry_arithmetic() {
        let now = Utc::now();
        let expiry = now + Duration::minutes(3);
        assert!(!TokenManager::is_expired(expiry, now));
        assert!(TokenManager::is_expired(expiry, expiry));
        assert_eq!(
            TokenManager::time_until_expiry(expiry, now),
            Duration::minutes(3)
        );
        assert!(TokenManager::time_until_expiry(now, expiry) < Duration::zero());
    }

    #[test]
    fn test_mask() {
        assert_eq!(Credential::new("abc").masked(), "***");
        assert_eq!(Credential::new("eyJhbGciOi.xyz.abcd").masked(), "eyJh...abcd");
    }
}
