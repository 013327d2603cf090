//! Configuration loading for the control module.

use serde::Deserialize;
use std::path::Path;

/// Configuration for reaching the external prediction service.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PredictorEndpointConfig {
    /// API key sent with every request.
    pub api_key: String,
    /// Base URL of the service (without the /predict suffix).
    pub service_url: String,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout_s")]
    pub timeout_s: u64,
}

fn default_timeout_s() -> u64 {
    5
}

impl PredictorEndpointConfig {
    /// Load configuration from a TOML file.
    pub fn load(config_path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(config_path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;

        toml::from_str(&content).map_err(|e| format!("Failed to parse config file: {}", e))
    }

    /// Derive the config path from a scenario file path.
    ///
    /// Replaces the scenario filename with "predictor.toml" in the same
    /// directory.
    pub fn config_path_from_scenario(scenario_path: &str) -> std::path::PathBuf {
        let scenario = Path::new(scenario_path);
        scenario
            .parent()
            .unwrap_or(Path::new("."))
            .join("predictor.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_kebab_case_toml() {
        let parsed: PredictorEndpointConfig = toml::from_str(
            r#"
            api-key = "secret"
            service-url = "http://ml-service:5050"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.api_key, "secret");
        assert_eq!(parsed.service_url, "http://ml-service:5050");
        assert_eq!(parsed.timeout_s, 5);
    }

    #[test]
    fn config_path_sits_next_to_scenario() {
        let path = PredictorEndpointConfig::config_path_from_scenario("scenarios/highway.json");
        assert_eq!(path, Path::new("scenarios/predictor.toml"));
    }
}
