mod agents;
mod audit;
mod bus;
mod fault;
mod llm;
mod orchestrator;
mod security;
mod server;

pub use agents::*;
pub use audit::*;
pub use bus::*;
pub use fault::*;
pub use llm::*;
pub use orchestrator::*;
pub use security::*;
pub use server::*;

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Top-level configuration, loaded from TOML with `CHOIR_*` environment overrides.
///
/// Every field has a serde default so an empty file (or no file at all) is
/// valid; call [`Config::validate`] after loading to surface structural
/// problems before starting the server.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    pub server: ServerConfig,
    pub orchestrator: OrchestratorConfig,
    pub agents: AgentsConfig,
    pub llm: LlmConfig,
    pub bus: BusConfig,
    pub audit: AuditConfig,
    pub retry: RetryConfig,
    pub breaker: BreakerConfig,
    pub rate_limit: RateLimitConfig,
    pub jwt: JwtConfig,
}

impl Config {
    /// Load from a TOML file, then apply `CHOIR_*` environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Configuration(format!("reading {}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let mut cfg: Config = toml::from_str(text)
            .map_err(|e| Error::Configuration(format!("parsing config: {e}")))?;
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    /// A handful of the most commonly overridden scalar fields, following the
    /// common env-override convention of a fixed prefix plus dotted path.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("CHOIR_SERVER_PORT") {
            if let Ok(port) = v.parse() {
                self.server.port = port;
            }
        }
        if let Ok(v) = std::env::var("CHOIR_SERVER_HOST") {
            self.server.host = v;
        }
        if let Ok(v) = std::env::var("CHOIR_ORCHESTRATOR_NUM_AGENTS") {
            if let Ok(n) = v.parse() {
                self.orchestrator.num_agents = n;
            }
        }
        if let Ok(v) = std::env::var("CHOIR_ORCHESTRATOR_DEFAULT_TURNS") {
            if let Ok(n) = v.parse() {
                self.orchestrator.default_turns = n;
            }
        }
        if let Ok(v) = std::env::var("CHOIR_LLM_GEMINI_MODEL") {
            self.llm.gemini_model = v;
        }
    }

    /// Validate and return a list of issues; empty means the config is usable.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.server.host.is_empty() {
            issues.push(ConfigIssue::error("server.host", "host must not be empty"));
        }
        if self.server.port == 0 {
            issues.push(ConfigIssue::error("server.port", "port must be greater than 0"));
        }
        if self.server.cors.allowed_origins.len() == 1 && self.server.cors.allowed_origins[0] == "*" {
            issues.push(ConfigIssue::warning(
                "server.cors.allowed_origins",
                "wildcard \"*\" allows all origins (not recommended for production)",
            ));
        }

        if self.orchestrator.num_agents == 0 {
            issues.push(ConfigIssue::error(
                "orchestrator.num_agents",
                "num_agents must be greater than 0",
            ));
        }

        let mut seen_ids: HashSet<&str> = HashSet::new();
        for (i, o) in self.agents.overrides.iter().enumerate() {
            if o.agent_id.is_empty() {
                issues.push(ConfigIssue::error(
                    format!("agents.overrides[{i}].agent_id"),
                    "agent_id must not be empty",
                ));
            } else if !seen_ids.insert(&o.agent_id) {
                issues.push(ConfigIssue::warning(
                    format!("agents.overrides[{i}].agent_id"),
                    format!("duplicate agent_id \"{}\" — later override wins", o.agent_id),
                ));
            }
            if let Some(t) = o.temperature {
                if !(0.0..=2.0).contains(&t) {
                    issues.push(ConfigIssue::error(
                        format!("agents.overrides[{i}].temperature"),
                        format!("temperature must be within 0.0..=2.0, got {t}"),
                    ));
                }
            }
        }

        if self.llm.gemini_model.is_empty() {
            issues.push(ConfigIssue::error("llm.gemini_model", "gemini_model must not be empty"));
        }

        if self.bus.stream_maxlen == 0 {
            issues.push(ConfigIssue::error(
                "bus.stream_maxlen",
                "stream_maxlen must be greater than 0",
            ));
        }

        if self.audit.retention_days <= 0 {
            issues.push(ConfigIssue::error(
                "audit.retention_days",
                "retention_days must be greater than 0",
            ));
        }

        if self.retry.max_attempts == 0 {
            issues.push(ConfigIssue::error("retry.max_attempts", "max_attempts must be greater than 0"));
        }
        if self.retry.base_delay_secs > self.retry.max_delay_secs {
            issues.push(ConfigIssue::error(
                "retry.base_delay_secs",
                "base_delay_secs must not exceed max_delay_secs",
            ));
        }

        if self.breaker.failure_threshold == 0 {
            issues.push(ConfigIssue::error(
                "breaker.failure_threshold",
                "failure_threshold must be greater than 0",
            ));
        }
        if self.breaker.success_threshold == 0 {
            issues.push(ConfigIssue::error(
                "breaker.success_threshold",
                "success_threshold must be greater than 0",
            ));
        }

        if self.rate_limit.requests == 0 {
            issues.push(ConfigIssue::error(
                "rate_limit.requests",
                "requests must be greater than 0",
            ));
        }
        if self.rate_limit.window_secs <= 0 {
            issues.push(ConfigIssue::error(
                "rate_limit.window_secs",
                "window_secs must be greater than 0",
            ));
        }

        if self.jwt.secret_env.is_empty() {
            issues.push(ConfigIssue::error("jwt.secret_env", "secret_env must not be empty"));
        } else if std::env::var(&self.jwt.secret_env).is_err() {
            issues.push(ConfigIssue::warning(
                "jwt.secret_env",
                format!(
                    "environment variable \"{}\" is unset — JWT auth will reject every token",
                    self.jwt.secret_env
                ),
            ));
        }

        issues
    }

    /// `true` iff `validate()` reports no errors (warnings are non-fatal).
    pub fn is_valid(&self) -> bool {
        !self.validate().iter().any(|i| i.severity == ConfigSeverity::Error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl ConfigIssue {
    fn error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            field: field.into(),
            message: message.into(),
        }
    }

    fn warning(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid_except_missing_jwt_secret() {
        let cfg = Config::default();
        let issues = cfg.validate();
        let errors: Vec<_> = issues.iter().filter(|i| i.severity == ConfigSeverity::Error).collect();
        assert!(errors.is_empty(), "expected no errors, got: {errors:?}");
    }

    #[test]
    fn empty_toml_parses_to_defaults() {
        let cfg = Config::from_toml_str("").expect("empty config should parse");
        assert_eq!(cfg.orchestrator.num_agents, 3);
        assert_eq!(cfg.server.port, 8080);
    }

    #[test]
    fn unknown_top_level_key_is_rejected() {
        let err = Config::from_toml_str("bogus_section = true").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn zero_num_agents_is_error() {
        let mut cfg = Config::default();
        cfg.orchestrator.num_agents = 0;
        let issues = cfg.validate();
        assert!(issues
            .iter()
            .any(|i| i.field == "orchestrator.num_agents" && i.severity == ConfigSeverity::Error));
    }

    #[test]
    fn duplicate_agent_override_ids_is_warning() {
        let mut cfg = Config::default();
        cfg.agents.overrides = vec![
            AgentOverride {
                agent_id: "agent_0".into(),
                ..Default::default()
            },
            AgentOverride {
                agent_id: "agent_0".into(),
                ..Default::default()
            },
        ];
        let issues = cfg.validate();
        let issue = issues
            .iter()
            .find(|i| i.message.contains("duplicate agent_id"))
            .expect("expected duplicate warning");
        assert_eq!(issue.severity, ConfigSeverity::Warning);
    }

    #[test]
    fn out_of_range_temperature_is_error() {
        let mut cfg = Config::default();
        cfg.agents.overrides = vec![AgentOverride {
            agent_id: "agent_1".into(),
            temperature: Some(5.0),
            ..Default::default()
        }];
        let issues = cfg.validate();
        assert!(issues.iter().any(|i| i.field.contains("temperature")));
    }

    #[test]
    fn cors_wildcard_is_warning() {
        let mut cfg = Config::default();
        cfg.server.cors.allowed_origins = vec!["*".into()];
        let issues = cfg.validate();
        let issue = issues
            .iter()
            .find(|i| i.field == "server.cors.allowed_origins")
            .expect("expected wildcard warning");
        assert_eq!(issue.severity, ConfigSeverity::Warning);
    }

    #[test]
    fn is_valid_ignores_warnings() {
        let mut cfg = Config::default();
        cfg.server.cors.allowed_origins = vec!["*".into()];
        assert!(cfg.is_valid());
    }
}
