//! Configuration loading from disk and from the `BACKENDS` list syntax.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::overrides::ConfigOverrides;
use crate::config::schema::{BackendConfig, ProxyConfig};
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),

    #[error("Invalid backend list entry '{entry}': {reason}")]
    BackendList { entry: String, reason: String },
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn read_config(path: &Path) -> Result<ProxyConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ProxyConfig, ConfigError> {
    let config = read_config(path)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Build the effective configuration: the file (or defaults when there is
/// none) with `overrides` applied, then validated as a whole.
pub fn resolve_config(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<ProxyConfig, ConfigError> {
    let mut config = match path {
        Some(path) => read_config(path)?,
        None => ProxyConfig::default(),
    };
    overrides.apply(&mut config);

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Parse a comma separated backend list.
///
/// Each entry is either `address` or `address=weight`, e.g.
/// `http://host1:8081=5,http://host2:8081`. Empty entries are skipped.
pub fn parse_backend_list(input: &str) -> Result<Vec<BackendConfig>, ConfigError> {
    input
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once('=') {
            Some((address, weight)) => {
                let weight = weight.trim().parse::<i64>().map_err(|e| ConfigError::BackendList {
                    entry: entry.to_string(),
                    reason: e.to_string(),
                })?;
                let address = address.trim();
                if address.is_empty() {
                    return Err(ConfigError::BackendList {
                        entry: entry.to_string(),
                        reason: "missing address".to_string(),
                    });
                }
                Ok(BackendConfig::new(address, weight))
            }
            None => Ok(BackendConfig::new(entry, 1)),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_backend_list() {
        let list = parse_backend_list("http://h1:8081=5, http://h2:8081 ,,h3:8081=0").unwrap();
        assert_eq!(
            list,
            [
                BackendConfig::new("http://h1:8081", 5),
                BackendConfig::new("http://h2:8081", 1),
                BackendConfig::new("h3:8081", 0),
            ]
        );
        assert!(parse_backend_list("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_backend_list_rejects_bad_weight() {
        let err = parse_backend_list("http://h1:8081=heavy").unwrap_err();
        assert!(matches!(err, ConfigError::BackendList { .. }));
        assert!(parse_backend_list("=3").is_err());
    }

    #[test]
    fn test_load_config_from_file() {
        let path = std::env::temp_dir().join(format!("http-balancer-{}.toml", uuid::Uuid::new_v4()));
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "[[backends]]\naddress = \"http://127.0.0.1:8081\"\nweight = 2").unwrap();
        drop(file);

        let config = load_config(&path).unwrap();
        assert_eq!(config.backends, [BackendConfig::new("http://127.0.0.1:8081", 2)]);
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_load_config_reports_validation_errors() {
        let path = std::env::temp_dir().join(format!("http-balancer-{}.toml", uuid::Uuid::new_v4()));
        fs::write(&path, "[health_check]\ninterval_secs = 0\n[[backends]]\naddress = \"ftp://x\"\n").unwrap();

        let err = load_config(&path).unwrap_err();
        match err {
            ConfigError::Validation(errors) => assert_eq!(errors.len(), 2),
            other => panic!("unexpected error: {other}"),
        }
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_resolve_config_applies_overrides_before_validation() {
        let path = std::env::temp_dir().join(format!("http-balancer-{}.toml", uuid::Uuid::new_v4()));
        fs::write(&path, "[balancer]\nstrategy = \"least\"\n").unwrap();

        let overrides = ConfigOverrides {
            backends: Some(parse_backend_list("http://10.0.0.1:8081=3").unwrap()),
            ..Default::default()
        };
        let config = resolve_config(Some(&path), &overrides).unwrap();
        assert_eq!(config.backends, [BackendConfig::new("http://10.0.0.1:8081", 3)]);
        assert_eq!(config.balancer.strategy, crate::load_balancer::StrategyKind::Least);

        let config = resolve_config(None, &ConfigOverrides::default()).unwrap();
        assert_eq!(config.backends, ProxyConfig::default_backends());
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_missing_file() {
        let err = load_config(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
