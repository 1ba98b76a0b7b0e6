use crate::entities::EntityRules;
use crate::error::ConfigError;
use crate::search::SearchMode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const CONFIG_PATH_ENV: &str = "ALERT_ROUTER_CONFIG";

/// Router behaviour. Defaults, then an optional JSON file, then
/// `ALERT_ROUTER_*` environment overrides.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub persona: String,
    /// Used when the persona cannot be read.
    pub default_threshold: f64,
    /// Single entity used when extraction finds nothing. `None` stops
    /// the pipeline with `no-entities` instead.
    pub fallback_entity: Option<String>,
    pub session_prefix: String,
    /// Recorded as `fromSearchQuery` on each run request.
    pub source: String,
    pub search_mode: SearchMode,
    pub dry_run: bool,
    pub rules: EntityRules,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            persona: "eager-edgar".into(),
            default_threshold: 0.7,
            fallback_entity: Some("health".into()),
            session_prefix: "automated".into(),
            source: "webhook".into(),
            search_mode: SearchMode::Ranked,
            dry_run: false,
            rules: EntityRules::default(),
        }
    }
}

impl RouterConfig {
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }

    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(|key| std::env::var(key).ok())
    }

    pub fn load_from(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let base = match lookup(CONFIG_PATH_ENV).filter(|p| !p.trim().is_empty()) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        base.with_overrides(lookup)
    }

    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(persona) = lookup("ALERT_ROUTER_PERSONA").filter(|v| !v.trim().is_empty()) {
            self.persona = persona.trim().to_string();
        }
        if let Some(raw) = lookup("ALERT_ROUTER_THRESHOLD") {
            self.default_threshold = raw.trim().parse().map_err(|_| ConfigError::Invalid {
                key: "ALERT_ROUTER_THRESHOLD".into(),
                value: raw.clone(),
            })?;
        }
        if let Some(raw) = lookup("ALERT_ROUTER_FALLBACK_ENTITY") {
            let raw = raw.trim();
            self.fallback_entity = match raw.to_lowercase().as_str() {
                "" | "none" | "off" => None,
                _ => Some(raw.to_string()),
            };
        }
        if let Some(raw) = lookup("ALERT_ROUTER_DRY_RUN") {
            self.dry_run = parse_bool("ALERT_ROUTER_DRY_RUN", &raw)?;
        }
        Ok(self)
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key: key.to_string(),
            value: raw.to_string(),
        }),
    }
}

/// Where the workspace platform lives and how to authenticate.
#[derive(Clone, Debug, PartialEq)]
pub struct PlatformConfig {
    pub workspace: String,
    pub api_url: String,
    pub frontend_url: Option<String>,
    pub token: Option<String>,
    /// Session the runbook itself runs in, if any.
    pub session_id: Option<String>,
    pub timeout: Duration,
}

impl PlatformConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |key: &'static str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::Missing(key))
        };
        let optional = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        Ok(Self {
            workspace: required("RW_WORKSPACE")?,
            api_url: required("RW_WORKSPACE_API_URL")?,
            frontend_url: optional("RW_FRONTEND_URL"),
            token: optional("RW_USER_TOKEN"),
            session_id: optional("RW_SESSION_ID"),
            timeout: Duration::from_secs(30),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_environment() {
        let config = RouterConfig::load_from(lookup(&[])).expect("config");
        assert_eq!(config, RouterConfig::default());
        assert_eq!(config.default_threshold, 0.7);
        assert_eq!(config.fallback_entity.as_deref(), Some("health"));
        assert_eq!(config.session_prefix, "automated");
    }

    #[test]
    fn env_overrides_apply() {
        let config = RouterConfig::load_from(lookup(&[
            ("ALERT_ROUTER_PERSONA", "cautious-cathy"),
            ("ALERT_ROUTER_THRESHOLD", "0.55"),
            ("ALERT_ROUTER_FALLBACK_ENTITY", "none"),
            ("ALERT_ROUTER_DRY_RUN", "yes"),
        ]))
        .expect("config");
        assert_eq!(config.persona, "cautious-cathy");
        assert_eq!(config.default_threshold, 0.55);
        assert_eq!(config.fallback_entity, None);
        assert!(config.dry_run);
    }

    #[test]
    fn bad_threshold_is_rejected() {
        let err = RouterConfig::load_from(lookup(&[("ALERT_ROUTER_THRESHOLD", "high")]))
            .expect_err("must fail");
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: RouterConfig =
            serde_json::from_str(r#"{"persona": "admin-alice", "search_mode": "admin"}"#)
                .expect("config");
        assert_eq!(config.persona, "admin-alice");
        assert_eq!(config.search_mode, SearchMode::Admin);
        assert_eq!(config.rules.min_len, 2);
    }

    #[test]
    fn platform_requires_workspace_and_api() {
        let err = PlatformConfig::from_lookup(lookup(&[("RW_WORKSPACE", "shop")]))
            .expect_err("must fail");
        assert!(matches!(err, ConfigError::Missing("RW_WORKSPACE_API_URL")));

        let config = PlatformConfig::from_lookup(lookup(&[
            ("RW_WORKSPACE", "shop"),
            ("RW_WORKSPACE_API_URL", "https://papi.example.com/api/v3"),
            ("RW_USER_TOKEN", " "),
        ]))
        .expect("config");
        assert_eq!(config.token, None);
        assert_eq!(config.timeout, Duration::from_secs(30));
    }
}
