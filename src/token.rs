//! Escalation Token Service - opaque single-purpose case-access tokens
//!
//! A token is 128 bits of OS randomness, hex-encoded, handed out exactly
//! once inside the specialist magic link. Only its SHA-256 digest is stored
//! (on the case and in the lookup tree); validation recomputes the digest
//! and compares constant-time. Expiry is explicit; the default TTL comes
//! from configuration and tests may mint with an arbitrary expiry.

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Token byte length (128 bits)
const TOKEN_BYTES: usize = 16;

/// A freshly-minted token. The opaque value leaves the process exactly once.
#[derive(Debug, Clone)]
pub struct MintedToken {
    /// Opaque hex value placed in the magic link
    pub token: String,
    /// Hex SHA-256 digest stored at rest
    pub digest: String,
    pub expires_at: DateTime<Utc>,
}

/// Mint a token expiring `ttl_hours` from now.
pub fn mint(ttl_hours: u64) -> MintedToken {
    mint_with_expiry(Utc::now() + Duration::hours(ttl_hours as i64))
}

/// Mint a token with an explicit expiry. Test hook for expiry scenarios;
/// also used by mint().
pub fn mint_with_expiry(expires_at: DateTime<Utc>) -> MintedToken {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    let token = hex_encode(&bytes);
    let digest = digest_hex(&token);
    MintedToken {
        token,
        digest,
        expires_at,
    }
}

/// Hex SHA-256 digest of an opaque token value.
pub fn digest_hex(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex_encode(&hasher.finalize())
}

/// Constant-time comparison of two hex digests.
pub fn digests_match(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_is_128_bits_hex() {
        let minted = mint(24);
        assert_eq!(minted.token.len(), TOKEN_BYTES * 2);
        assert!(minted.token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_tokens_are_unique() {
        let a = mint(24);
        let b = mint(24);
        assert_ne!(a.token, b.token);
        assert_ne!(a.digest, b.digest);
    }

    #[test]
    fn test_digest_round_trip() {
        let minted = mint(24);
        assert!(digests_match(&digest_hex(&minted.token), &minted.digest));
    }

    #[test]
    fn test_wrong_token_does_not_match() {
        let minted = mint(24);
        assert!(!digests_match(&digest_hex("not-the-token"), &minted.digest));
    }

    #[test]
    fn test_explicit_expiry_hook() {
        let past = Utc::now() - Duration::seconds(1);
        let minted = mint_with_expiry(past);
        assert!(minted.expires_at < Utc::now());
    }
}
