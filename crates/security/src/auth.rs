use std::collections::HashMap;

use chrono::{Duration, Utc};
use choir_domain::config::JwtConfig;
use choir_domain::error::{Error, Result};
use choir_domain::model::ApiKey;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

pub const API_KEY_PREFIX: &str = "pa_";

fn hash_key(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    hex::encode(digest)
}

/// An authenticated identity, produced by either JWT or API-key
/// verification, carrying only what the authorisation layer needs.
#[derive(Debug, Clone)]
pub struct Identity {
    pub subject: String,
    pub permissions: Vec<String>,
}

impl Identity {
    pub fn has_permission(&self, required: &str) -> bool {
        self.permissions.iter().any(|p| p == "admin:all" || p == required)
    }
}

/// Administratively managed API keys, matched by comparing the SHA-256
/// of the presented key against the stored hash in constant time.
pub struct ApiKeyStore {
    by_hash: RwLock<HashMap<String, ApiKey>>,
}

impl Default for ApiKeyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ApiKeyStore {
    pub fn new() -> Self {
        Self {
            by_hash: RwLock::new(HashMap::new()),
        }
    }

    /// Generates a new `pa_`-prefixed key, stores its hash, and
    /// returns the clear key — the only time it is ever visible.
    pub fn create(&self, name: impl Into<String>, permissions: Vec<String>) -> String {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        let raw: String = (0..32)
            .map(|_| {
                const CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
                CHARS[rng.gen_range(0..CHARS.len())] as char
            })
            .collect();
        let key_value = format!("{API_KEY_PREFIX}{raw}");
        let key_hash = hash_key(&key_value);

        let api_key = ApiKey {
            key_id: uuid::Uuid::new_v4().to_string(),
            key_hash: key_hash.clone(),
            name: name.into(),
            permissions,
            created_at: Utc::now(),
            last_used: None,
            is_active: true,
            usage_count: 0,
        };
        self.by_hash.write().insert(key_hash, api_key);
        key_value
    }

    /// Validate a presented key, bumping usage stats on success.
    /// Revoked or unknown keys fail closed (`None`), never panicking
    /// on malformed input.
    pub fn validate(&self, presented: &str) -> Option<Identity> {
        if !presented.starts_with(API_KEY_PREFIX) {
            return None;
        }
        let presented_hash = hash_key(presented);
        let mut keys = self.by_hash.write();
        let stored_hash_bytes = presented_hash.as_bytes();
        let entry = keys.iter_mut().find(|(hash, _)| {
            hash.as_bytes().ct_eq(stored_hash_bytes).into()
        })?;
        let (_, key) = entry;
        if !key.is_active {
            return None;
        }
        key.last_used = Some(Utc::now());
        key.usage_count += 1;
        Some(Identity {
            subject: key.key_id.clone(),
            permissions: key.permissions.clone(),
        })
    }

    /// Whether any key has ever been created. Used to decide whether
    /// API-key auth is configured at all.
    pub fn is_empty(&self) -> bool {
        self.by_hash.read().is_empty()
    }

    pub fn revoke(&self, presented: &str) -> bool {
        let hash = hash_key(presented);
        let mut keys = self.by_hash.write();
        if let Some(key) = keys.get_mut(&hash) {
            key.is_active = false;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    user_id: String,
    permissions: Vec<String>,
    iat: i64,
    exp: i64,
    iss: String,
}

/// JWT issuance/verification (HS256, fixed issuer, configurable expiry).
pub struct Jwt {
    config: JwtConfig,
    secret: String,
}

impl Jwt {
    /// Reads the HMAC secret from `config.secret_env`. Returns
    /// `Configuration` if the variable is unset — callers should
    /// surface this at boot, not per-request.
    pub fn from_env(config: JwtConfig) -> Result<Self> {
        let secret = std::env::var(&config.secret_env)
            .map_err(|_| Error::Configuration(format!("{} is not set", config.secret_env)))?;
        Ok(Self { config, secret })
    }

    pub fn issue(&self, user_id: &str, permissions: Vec<String>) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            user_id: user_id.to_string(),
            permissions,
            iat: now.timestamp(),
            exp: (now + Duration::hours(self.config.expiry_hours)).timestamp(),
            iss: self.config.issuer.clone(),
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(self.secret.as_bytes()))
            .map_err(|e| Error::Authentication(format!("signing token: {e}")))
    }

    pub fn verify(&self, token: &str) -> Option<Identity> {
        let mut validation = Validation::new(jsonwebtoken::Algorithm::HS256);
        validation.set_issuer(&[&self.config.issuer]);
        let data = decode::<Claims>(token, &DecodingKey::from_secret(self.secret.as_bytes()), &validation).ok()?;
        Some(Identity {
            subject: data.claims.user_id,
            permissions: data.claims.permissions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_key_roundtrips_through_hash() {
        let store = ApiKeyStore::new();
        let key = store.create("test", vec!["chat:write".into()]);
        assert!(key.starts_with(API_KEY_PREFIX));
        let identity = store.validate(&key).expect("key should validate");
        assert!(identity.has_permission("chat:write"));
        assert!(!identity.has_permission("admin:all"));
    }

    #[test]
    fn revoked_key_fails_closed() {
        let store = ApiKeyStore::new();
        let key = store.create("test", vec!["chat:write".into()]);
        assert!(store.revoke(&key));
        assert!(store.validate(&key).is_none());
    }

    #[test]
    fn garbage_key_never_validates() {
        let store = ApiKeyStore::new();
        assert!(store.validate("not-a-key").is_none());
        assert!(store.validate("pa_but_unregistered").is_none());
    }

    #[test]
    fn admin_all_grants_every_permission() {
        let store = ApiKeyStore::new();
        let key = store.create("root", vec!["admin:all".into()]);
        let identity = store.validate(&key).unwrap();
        assert!(identity.has_permission("anything:at:all"));
    }

    #[test]
    fn jwt_roundtrip() {
        std::env::set_var("CHOIR_TEST_JWT_SECRET", "super-secret-test-value");
        let jwt = Jwt::from_env(JwtConfig {
            secret_env: "CHOIR_TEST_JWT_SECRET".into(),
            issuer: "choir".into(),
            expiry_hours: 24,
        })
        .unwrap();
        let token = jwt.issue("user-1", vec!["chat:write".into()]).unwrap();
        let identity = jwt.verify(&token).expect("token should verify");
        assert_eq!(identity.subject, "user-1");
        assert!(identity.has_permission("chat:write"));
    }

    #[test]
    fn jwt_rejects_tampered_token() {
        std::env::set_var("CHOIR_TEST_JWT_SECRET_2", "another-secret-value");
        let jwt = Jwt::from_env(JwtConfig {
            secret_env: "CHOIR_TEST_JWT_SECRET_2".into(),
            issuer: "choir".into(),
            expiry_hours: 24,
        })
        .unwrap();
        let mut token = jwt.issue("user-1", vec![]).unwrap();
        token.push('x');
        assert!(jwt.verify(&token).is_none());
    }

    #[test]
    fn missing_secret_env_is_configuration_error() {
        std::env::remove_var("CHOIR_TEST_JWT_SECRET_MISSING");
        let err = Jwt::from_env(JwtConfig {
            secret_env: "CHOIR_TEST_JWT_SECRET_MISSING".into(),
            issuer: "choir".into(),
            expiry_hours: 24,
        })
        .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
