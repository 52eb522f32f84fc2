use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub requests: u32,
    pub window_secs: i64,
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests: 100,
            window_secs: 3600,
            burst: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtConfig {
    /// Environment variable holding the HMAC signing secret.
    pub secret_env: String,
    pub issuer: String,
    pub expiry_hours: i64,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret_env: d_secret_env(),
            issuer: d_issuer(),
            expiry_hours: 24,
        }
    }
}

fn d_secret_env() -> String {
    "CHOIR_JWT_SECRET".into()
}
fn d_issuer() -> String {
    "choir".into()
}
