//! Configuration loading from disk and the environment.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::GuardConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<GuardConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let mut config: GuardConfig = toml::from_str(&content)?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Defaults plus environment overrides, validated.
pub fn load_default() -> Result<GuardConfig, ConfigError> {
    let mut config = GuardConfig::default();
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Apply connection-string style overrides.
///
/// - `GUARD_BIND_ADDRESS` → `listener.bind_address`
/// - `GUARD_UPSTREAM_URL` → `upstream.base_url`
/// - `GUARD_REDIS_URL`, then `REDIS_URL` → `quota.redis_url`
/// - `GUARD_ADMIN_API_KEY` → `admin.api_key`
pub fn apply_env_overrides<F>(config: &mut GuardConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

    if let Some(addr) = get("GUARD_BIND_ADDRESS") {
        config.listener.bind_address = addr;
    }
    if let Some(url) = get("GUARD_UPSTREAM_URL") {
        config.upstream.base_url = url;
    }
    if let Some(url) = get("GUARD_REDIS_URL").or_else(|| get("REDIS_URL")) {
        config.quota.redis_url = Some(url);
    }
    if let Some(key) = get("GUARD_ADMIN_API_KEY") {
        config.admin.api_key = key;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("GUARD_UPSTREAM_URL", "http://backend:5000"),
            ("REDIS_URL", "redis://cache:6379"),
            ("GUARD_ADMIN_API_KEY", ""),
        ]
        .into_iter()
        .collect();

        let mut config = GuardConfig::default();
        apply_env_overrides(&mut config, |key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.upstream.base_url, "http://backend:5000");
        assert_eq!(config.quota.redis_url.as_deref(), Some("redis://cache:6379"));
        assert_eq!(config.admin.api_key, "CHANGE_ME_IN_PRODUCTION");
        assert_eq!(config.listener.bind_address, "0.0.0.0:8080");
    }

    #[test]
    fn test_missing_file() {
        let err = load_config(Path::new("/nonexistent/guard.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
