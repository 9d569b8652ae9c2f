use crate::model::CoreConfig;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;

// Feature gates sourced from the license/edition of the deployment.
#[derive(Debug, Clone)]
pub struct FeatureFlags {
    // Gates the per-tenant resource loaders; with this off only the base
    // tenant is served.
    pub multi_tenancy: bool,
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Postgres,
}

// Process configuration sourced from environment variables.
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    // HTTP bind address for the core API.
    pub bind_addr: SocketAddr,
    // Metrics HTTP bind address.
    pub metrics_bind: SocketAddr,
    pub features: FeatureFlags,
    pub storage: StorageBackend,
    pub postgres: Option<PostgresConfig>,
    // Process-wide defaults layered under every tenant's core config.
    pub base_core_config: CoreConfig,
}

#[derive(Debug, Deserialize)]
struct ProcessConfigOverride {
    bind_addr: Option<String>,
    metrics_bind: Option<String>,
    ee_features: Option<Vec<String>>,
    postgres_url: Option<String>,
    base_core_config: Option<serde_json::Value>,
}

impl ProcessConfig {
    pub fn from_env() -> Result<Self> {
        // Environment variables provide defaults for local development.
        let bind_addr = std::env::var("GATEHOUSE_BIND")
            .unwrap_or_else(|_| "0.0.0.0:3567".to_string())
            .parse()
            .with_context(|| "parse GATEHOUSE_BIND")?;
        let metrics_bind = std::env::var("GATEHOUSE_METRICS_BIND")
            .unwrap_or_else(|_| "0.0.0.0:9090".to_string())
            .parse()
            .with_context(|| "parse GATEHOUSE_METRICS_BIND")?;
        let features = FeatureFlags {
            multi_tenancy: std::env::var("GATEHOUSE_EE_FEATURES")
                .map(|value| parse_features(&value))
                .unwrap_or(false),
        };
        let postgres = std::env::var("GATEHOUSE_POSTGRES_URL")
            .ok()
            .map(|url| PostgresConfig {
                url,
                max_connections: 10,
                acquire_timeout_ms: 5_000,
            });
        let storage = if postgres.is_some() {
            StorageBackend::Postgres
        } else {
            StorageBackend::Memory
        };
        Ok(Self {
            bind_addr,
            metrics_bind,
            features,
            storage,
            postgres,
            base_core_config: CoreConfig::new(),
        })
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Ok(path) = std::env::var("GATEHOUSE_CONFIG") {
            // YAML overrides allow ops-friendly config files.
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("read GATEHOUSE_CONFIG: {path}"))?;
            let override_cfg: ProcessConfigOverride =
                serde_yaml::from_str(&contents).with_context(|| "parse gatehouse config yaml")?;
            if let Some(value) = override_cfg.bind_addr {
                config.bind_addr = value.parse().with_context(|| "parse bind_addr")?;
            }
            if let Some(value) = override_cfg.metrics_bind {
                config.metrics_bind = value.parse().with_context(|| "parse metrics_bind")?;
            }
            if let Some(values) = override_cfg.ee_features {
                config.features.multi_tenancy = values
                    .iter()
                    .any(|f| f.eq_ignore_ascii_case("multi_tenancy"));
            }
            if let Some(url) = override_cfg.postgres_url {
                config.postgres = Some(PostgresConfig {
                    url,
                    max_connections: 10,
                    acquire_timeout_ms: 5_000,
                });
                config.storage = StorageBackend::Postgres;
            }
            if let Some(value) = override_cfg.base_core_config {
                config.base_core_config = CoreConfig::from_object(value)
                    .with_context(|| "base_core_config must be a mapping")?;
            }
        }
        Ok(config)
    }
}

fn parse_features(value: &str) -> bool {
    value
        .split(',')
        .any(|f| f.trim().eq_ignore_ascii_case("multi_tenancy"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use tempfile::TempDir;

    // Helper to clear all gatehouse env vars
    fn clear_gatehouse_env() {
        for (key, _) in env::vars() {
            if key.starts_with("GATEHOUSE_") {
                unsafe {
                    env::remove_var(key);
                }
            }
        }
    }

    #[serial]
    #[test]
    fn from_env_uses_defaults() {
        clear_gatehouse_env();
        let config = ProcessConfig::from_env().expect("from_env");
        assert_eq!(config.bind_addr.to_string(), "0.0.0.0:3567");
        assert_eq!(config.metrics_bind.to_string(), "0.0.0.0:9090");
        assert!(!config.features.multi_tenancy);
        assert_eq!(config.storage, StorageBackend::Memory);
    }

    #[serial]
    #[test]
    fn from_env_respects_env_vars() {
        clear_gatehouse_env();
        unsafe {
            env::set_var("GATEHOUSE_BIND", "127.0.0.1:4567");
            env::set_var("GATEHOUSE_EE_FEATURES", "multi_tenancy, account_linking");
            env::set_var("GATEHOUSE_POSTGRES_URL", "postgres://localhost/gatehouse");
        }

        let config = ProcessConfig::from_env().expect("from_env");
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:4567");
        assert!(config.features.multi_tenancy);
        assert_eq!(config.storage, StorageBackend::Postgres);
        assert_eq!(
            config.postgres.expect("postgres").url,
            "postgres://localhost/gatehouse"
        );

        clear_gatehouse_env();
    }

    #[serial]
    #[test]
    fn from_env_rejects_invalid_socket_addr() {
        clear_gatehouse_env();
        unsafe {
            env::set_var("GATEHOUSE_BIND", "not-a-valid-address");
        }
        let result = ProcessConfig::from_env();
        assert!(result.is_err());
        clear_gatehouse_env();
    }

    #[serial]
    #[test]
    fn from_env_or_yaml_overrides_with_valid_yaml() {
        clear_gatehouse_env();
        let tmpdir = TempDir::new().unwrap();
        let config_path = tmpdir.path().join("config.yml");
        fs::write(
            &config_path,
            r#"
bind_addr: "127.0.0.1:7567"
ee_features: ["multi_tenancy"]
base_core_config:
  access_token_signing_key_update_interval: 100
"#,
        )
        .unwrap();
        unsafe {
            env::set_var("GATEHOUSE_CONFIG", config_path.to_str().unwrap());
        }

        let config = ProcessConfig::from_env_or_yaml().expect("from_env_or_yaml");
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:7567");
        assert!(config.features.multi_tenancy);
        assert_eq!(
            config
                .base_core_config
                .access_token_signing_key_update_interval(),
            100
        );

        clear_gatehouse_env();
    }

    #[serial]
    #[test]
    fn from_env_or_yaml_file_not_found_fails() {
        clear_gatehouse_env();
        let tmpdir = TempDir::new().unwrap();
        let nonexistent = tmpdir.path().join("nonexistent.yml");
        unsafe {
            env::set_var("GATEHOUSE_CONFIG", nonexistent.to_str().unwrap());
        }
        let result = ProcessConfig::from_env_or_yaml();
        assert!(result.is_err());
        clear_gatehouse_env();
    }

    #[serial]
    #[test]
    fn from_env_or_yaml_invalid_yaml_fails() {
        clear_gatehouse_env();
        let tmpdir = TempDir::new().unwrap();
        let config_path = tmpdir.path().join("bad.yml");
        fs::write(&config_path, "this is not: valid: yaml:").unwrap();
        unsafe {
            env::set_var("GATEHOUSE_CONFIG", config_path.to_str().unwrap());
        }

        let result = ProcessConfig::from_env_or_yaml();
        assert!(result.is_err());

        clear_gatehouse_env();
    }
}
