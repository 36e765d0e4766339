use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::error::{GatewayError, Result};

/// An opaque 64-char plaintext credential, returned exactly once at creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: i64,
    pub tenant_id: i64,

    /// The raw secret; present only on the response to the create call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,

    pub active: bool,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// The persisted, hashed form of an [`ApiKey`]. Never stores the
/// plaintext secret; the 8-char prefix is the index used for lookup.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ApiKeyHash {
    pub id: i64,
    pub tenant_id: i64,
    pub prefix: String,
    pub salt: String,
    pub secret_hash: String,
    pub active: bool,
    pub last_used_at: Option<DateTime<Utc>>,
}

const SECRET_LEN: usize = 64;
const PREFIX_LEN: usize = 8;

impl ApiKey {
    /// Generate a new opaque secret and its salted hash, ready for storage.
    pub fn generate(tenant_id: i64) -> (Self, ApiKeyHash) {
        let random_bytes: Vec<u8> = (0..SECRET_LEN).map(|_| rand::random::<u8>()).collect();
        let secret = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(&random_bytes)
            .chars()
            .take(SECRET_LEN)
            .collect::<String>();
        let prefix = secret.chars().take(PREFIX_LEN).collect::<String>();

        let salt_bytes: [u8; 16] = rand::random();
        let salt = hex::encode(salt_bytes);
        let secret_hash = hash_secret(&secret, &salt);

        let key = ApiKey {
            id: 0,
            tenant_id,
            secret: Some(secret),
            active: true,
            last_used_at: None,
        };
        let hash = ApiKeyHash {
            id: 0,
            tenant_id,
            prefix,
            salt,
            secret_hash,
            active: true,
            last_used_at: None,
        };
        (key, hash)
    }
}

impl ApiKeyHash {
    /// Constant-time verification of a candidate plaintext against this hash.
    pub fn verify(&self, candidate: &str) -> bool {
        if !self.active {
            return false;
        }
        let candidate_hash = hash_secret(candidate, &self.salt);
        constant_time_eq::constant_time_eq(self.secret_hash.as_bytes(), candidate_hash.as_bytes())
    }
}

fn hash_secret(secret: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(secret.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Extract the lookup prefix from a bearer/header-supplied secret.
pub fn lookup_prefix(secret: &str) -> Result<&str> {
    if secret.len() < PREFIX_LEN {
        return Err(GatewayError::Unauthenticated);
    }
    Ok(&secret[..PREFIX_LEN])
}

mod hex {
    pub fn encode(bytes: [u8; 16]) -> String {
        bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_then_verify_roundtrip() {
        let (key, hash) = ApiKey::generate(1);
        let secret = key.secret.unwrap();
        assert!(hash.verify(&secret));
        assert!(!hash.verify("wrong-secret-wrong-secret-wrong"));
    }

    #[test]
    fn inactive_key_never_verifies() {
        let (key, mut hash) = ApiKey::generate(1);
        let secret = key.secret.unwrap();
        hash.active = false;
        assert!(!hash.verify(&secret));
    }

    #[test]
    fn lookup_prefix_matches_generated_key() {
        let (key, hash) = ApiKey::generate(1);
        let secret = key.secret.unwrap();
        assert_eq!(lookup_prefix(&secret).unwrap(), hash.prefix);
    }
}
