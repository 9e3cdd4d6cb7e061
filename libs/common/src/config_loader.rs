//! Layered configuration loading
//!
//! Priority (highest to lowest):
//! 1. Environment variables (prefixed, `__` separates nested keys)
//! 2. Configuration file given on the command line
//! 3. Compiled-in defaults

use errors::{BridgeError, BridgeResult};
use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// Build the figment for a service without extracting it
pub fn figment_for<T>(path: Option<&Path>, env_prefix: &str) -> BridgeResult<Figment>
where
    T: Serialize + Default,
{
    let mut figment = Figment::from(Serialized::defaults(T::default()));

    if let Some(path) = path {
        if !path.exists() {
            return Err(BridgeError::MissingConfig(format!(
                "configuration file not found: {}",
                path.display()
            )));
        }

        let extension = path
            .extension()
            .and_then(|s| s.to_str())
            .ok_or_else(|| {
                BridgeError::Configuration("Config file must have an extension".to_string())
            })?;

        figment = match extension {
            "toml" => figment.merge(Toml::file(path)),
            "yaml" | "yml" => figment.merge(Yaml::file(path)),
            "json" => figment.merge(Json::file(path)),
            _ => {
                return Err(BridgeError::Configuration(format!(
                    "Unsupported config file format: {}",
                    extension
                )))
            },
        };
        info!("Loading configuration from {}", path.display());
    } else {
        debug!("No configuration file given, using defaults and environment");
    }

    Ok(figment.merge(Env::prefixed(env_prefix).split("__")))
}

/// Load configuration from defaults, an optional file and the environment
pub fn load_layered<T>(path: Option<&Path>, env_prefix: &str) -> BridgeResult<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    figment_for::<T>(path, env_prefix)?
        .extract()
        .map_err(|e| BridgeError::Configuration(format!("Failed to load configuration: {}", e)))
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::Write;

    #[derive(Debug, Deserialize, Serialize, PartialEq)]
    struct TestConfig {
        name: String,
        port: u16,
    }

    impl Default for TestConfig {
        fn default() -> Self {
            Self {
                name: "bridge".to_string(),
                port: 1883,
            }
        }
    }

    #[test]
    fn test_defaults_without_file() {
        let config: TestConfig = load_layered(None, "BRIDGE_LOADER_TEST_NONE_").unwrap();
        assert_eq!(config, TestConfig::default());
    }

    #[test]
    fn test_yaml_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "port: 8883").unwrap();

        let config: TestConfig =
            load_layered(Some(file.path()), "BRIDGE_LOADER_TEST_YAML_").unwrap();
        assert_eq!(config.name, "bridge");
        assert_eq!(config.port, 8883);
    }

    #[test]
    fn test_missing_file_is_error() {
        let result: BridgeResult<TestConfig> = load_layered(
            Some(Path::new("/nonexistent/bridge.yaml")),
            "BRIDGE_LOADER_TEST_MISSING_",
        );
        assert!(matches!(result, Err(BridgeError::MissingConfig(_))));
    }

    #[test]
    fn test_unsupported_extension() {
        let file = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        let result: BridgeResult<TestConfig> =
            load_layered(Some(file.path()), "BRIDGE_LOADER_TEST_INI_");
        assert!(matches!(result, Err(BridgeError::Configuration(_))));
    }
}
