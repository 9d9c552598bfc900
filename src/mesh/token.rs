//! Signed navigation tokens.
//!
//! Wire format: `base64(header).base64(payload).hex(hmac)` where the header
//! is `{"alg": "HS256"}`, the payload carries `domain`, `user_id`, `iat` and
//! `exp` (seconds), and the HMAC-SHA256 covers `base64(header).base64(payload)`.
//! Tokens are stateless: validity is the signature plus expiry.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::Sha256;

use crate::core::audit::canonical_json;
use crate::core::{EngineError, EngineResult};
use crate::util::serde::ThresholdDomain;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "HS256";

/// Signing secret. Never printed.
#[derive(Clone)]
pub struct TokenSecret(Vec<u8>);

impl TokenSecret {
    /// Shortest accepted secret in bytes.
    pub const MIN_LEN: usize = 32;

    /// Wrap raw secret bytes, rejecting short secrets.
    pub fn new(bytes: impl Into<Vec<u8>>) -> EngineResult<Self> {
        let bytes = bytes.into();
        if bytes.len() < Self::MIN_LEN {
            return Err(EngineError::MissingSecret(format!(
                "secret must be at least {} bytes, got {}",
                Self::MIN_LEN,
                bytes.len()
            )));
        }
        Ok(Self(bytes))
    }

    /// Read the secret from `var`, loading `.env` first if present.
    pub fn from_env(var: &str) -> EngineResult<Self> {
        let _ = dotenvy::dotenv();
        let value = std::env::var(var)
            .map_err(|_| EngineError::MissingSecret(format!("environment variable {var} is not set")))?;
        Self::new(value.into_bytes())
    }
}

impl std::fmt::Debug for TokenSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TokenSecret(<redacted>)")
    }
}

/// Decoded token claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationToken {
    /// Domain the token grants.
    pub domain: ThresholdDomain,
    /// User the token was issued to.
    pub user_id: String,
    /// Issued-at, seconds since epoch.
    pub iat: u64,
    /// Expiry, seconds since epoch.
    pub exp: u64,
}

impl NavigationToken {
    /// True once `now_secs` reaches `exp`.
    pub const fn is_expired(&self, now_secs: u64) -> bool {
        now_secs >= self.exp
    }
}

/// Issues and verifies tokens with one secret.
#[derive(Debug, Clone)]
pub struct TokenSigner {
    secret: TokenSecret,
    ttl_secs: u64,
}

impl TokenSigner {
    /// Signer issuing tokens valid for `ttl_secs`.
    pub const fn new(secret: TokenSecret, ttl_secs: u64) -> Self {
        Self { secret, ttl_secs }
    }

    /// Token lifetime.
    pub const fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }

    /// Issue a token for `user_id` into `domain`.
    pub fn issue(&self, domain: ThresholdDomain, user_id: &str, now_secs: u64) -> EngineResult<String> {
        self.encode(&NavigationToken {
            domain,
            user_id: user_id.to_owned(),
            iat: now_secs,
            exp: now_secs + self.ttl_secs,
        })
    }

    /// Serialize and sign `token`.
    pub fn encode(&self, token: &NavigationToken) -> EngineResult<String> {
        let header = canonical_json(&json!({ "alg": ALGORITHM }));
        let payload = canonical_json(&serde_json::to_value(token)?);
        let signing_input = format!("{}.{}", STANDARD.encode(header), STANDARD.encode(payload));
        let signature = hex::encode(self.mac(signing_input.as_bytes())?.finalize().into_bytes());
        Ok(format!("{signing_input}.{signature}"))
    }

    /// Verify signature and expiry, returning the claims.
    pub fn decode(&self, token: &str, now_secs: u64) -> EngineResult<NavigationToken> {
        let invalid = |msg: &str| EngineError::InvalidToken(msg.to_owned());

        let mut parts = token.split('.');
        let (Some(header_b64), Some(payload_b64), Some(signature_hex), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid("expected three dot-separated segments"));
        };

        let signature = hex::decode(signature_hex).map_err(|_| invalid("signature is not hex"))?;
        let signing_input = &token[..header_b64.len() + 1 + payload_b64.len()];
        self.mac(signing_input.as_bytes())?
            .verify_slice(&signature)
            .map_err(|_| invalid("signature mismatch"))?;

        let header: Value = decode_segment(header_b64).ok_or_else(|| invalid("malformed header"))?;
        if header.get("alg").and_then(Value::as_str) != Some(ALGORITHM) {
            return Err(invalid("unsupported algorithm"));
        }
        let claims: NavigationToken =
            decode_segment(payload_b64).ok_or_else(|| invalid("malformed payload"))?;
        if claims.is_expired(now_secs) {
            return Err(invalid("token expired"));
        }
        Ok(claims)
    }

    fn mac(&self, input: &[u8]) -> EngineResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret.0)
            .map_err(|e| EngineError::MissingSecret(e.to_string()))?;
        mac.update(input);
        Ok(mac)
    }
}

fn decode_segment<T: serde::de::DeserializeOwned>(segment: &str) -> Option<T> {
    let bytes = STANDARD.decode(segment).ok()?;
    serde_json::from_slice(&bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> TokenSigner {
        TokenSigner::new(TokenSecret::new(vec![7u8; 32]).unwrap(), 3600)
    }

    #[test]
    fn test_round_trip() {
        let signer = signer();
        let token = signer.issue(ThresholdDomain::Info, "alice", 1_000).unwrap();
        let claims = signer.decode(&token, 1_500).unwrap();
        assert_eq!(
            claims,
            NavigationToken {
                domain: ThresholdDomain::Info,
                user_id: "alice".into(),
                iat: 1_000,
                exp: 4_600,
            }
        );
    }

    #[test]
    fn test_expired_token_rejected() {
        let signer = signer();
        let token = signer.issue(ThresholdDomain::Wealth, "bob", 1_000).unwrap();
        let err = signer.decode(&token, 4_600).unwrap_err();
        assert!(matches!(err, EngineError::InvalidToken(msg) if msg.contains("expired")));
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let signer = signer();
        let token = signer.issue(ThresholdDomain::Myth, "carol", 1_000).unwrap();
        let mut parts: Vec<&str> = token.split('.').collect();
        let forged = STANDARD.encode(
            r#"{"domain": "myth", "exp": 99999999, "iat": 1000, "user_id": "mallory"}"#,
        );
        parts[1] = &forged;
        assert!(signer.decode(&parts.join("."), 1_100).is_err());
    }

    #[test]
    fn test_other_secret_rejected() {
        let token = signer().issue(ThresholdDomain::Info, "dave", 0).unwrap();
        let other = TokenSigner::new(TokenSecret::new(vec![9u8; 32]).unwrap(), 3600);
        assert!(other.decode(&token, 1).is_err());
    }

    #[test]
    fn test_short_secret_refused() {
        assert!(matches!(
            TokenSecret::new("too-short"),
            Err(EngineError::MissingSecret(_))
        ));
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        let secret = TokenSecret::new(vec![b'x'; 40]).unwrap();
        assert_eq!(format!("{secret:?}"), "TokenSecret(<redacted>)");
    }
}
