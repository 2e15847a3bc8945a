use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub check: CheckConfig,

    #[serde(default)]
    pub liquid: LiquidConfig,

    #[serde(default)]
    pub errors: ErrorConfig,

    #[serde(default)]
    pub layers: LayersConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckConfig {
    /// Abort on the first layer failure instead of reporting every layer.
    #[serde(default = "default_false")]
    pub raise_on_error: bool,

    #[serde(default = "default_true")]
    pub control_flow: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidConfig {
    /// Integer variables range over `[-solver_bound, solver_bound]`.
    #[serde(default = "default_solver_bound")]
    pub solver_bound: i64,

    #[serde(default = "default_max_assignments")]
    pub max_assignments: u64,

    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorConfig {
    #[serde(default = "default_100")]
    pub max_errors: usize,

    #[serde(default = "default_true")]
    pub show_suggestions: bool,

    #[serde(default = "default_true")]
    pub color: bool,

    #[serde(default)]
    pub format: ErrorFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorFormat {
    #[default]
    Default,
    Json,
    Compact,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LayersConfig {
    /// Layer names the registry refuses to instantiate.
    #[serde(default)]
    pub disabled: Vec<String>,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            raise_on_error: false,
            control_flow: true,
        }
    }
}

impl Default for LiquidConfig {
    fn default() -> Self {
        Self {
            solver_bound: default_solver_bound(),
            max_assignments: default_max_assignments(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

impl Default for ErrorConfig {
    fn default() -> Self {
        Self {
            max_errors: 100,
            show_suggestions: true,
            color: true,
            format: ErrorFormat::Default,
        }
    }
}

fn default_true() -> bool { true }
fn default_false() -> bool { false }
fn default_100() -> usize { 100 }
fn default_solver_bound() -> i64 { 16 }
fn default_max_assignments() -> u64 { 2_000_000 }
fn default_cache_capacity() -> usize { 1024 }

const CONFIG_FILE_NAMES: [&str; 2] = [".stratarc", "strata.toml"];

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, String> {
        let content = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config: {}", e))?;

        Self::parse(&content)
    }

    /// Parse configuration from TOML string
    pub fn parse(content: &str) -> Result<Self, String> {
        let config: Self = toml::from_str(content)
            .map_err(|e| format!("Failed to parse config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        if self.liquid.solver_bound < 0 {
            return Err(format!("liquid.solver_bound must be non-negative, got {}", self.liquid.solver_bound));
        }
        if self.liquid.cache_capacity == 0 {
            return Err("liquid.cache_capacity must be at least 1".to_string());
        }
        Ok(())
    }

    /// Find and load configuration file from current directory or parents
    pub fn discover() -> Self {
        let Ok(cwd) = std::env::current_dir() else {
            return Self::default();
        };
        Self::discover_from(&cwd)
    }

    pub fn discover_from(start: &Path) -> Self {
        let mut current = Some(start.to_path_buf());

        while let Some(dir) = current {
            for name in CONFIG_FILE_NAMES {
                let config_path = dir.join(name);
                if config_path.exists() {
                    match Self::load(&config_path) {
                        Ok(config) => return config,
                        Err(e) => tracing::warn!(path = %config_path.display(), error = %e, "Ignoring invalid config"),
                    }
                }
            }

            current = dir.parent().map(|p| p.to_path_buf());
        }

        Self::default()
    }

    pub fn is_layer_disabled(&self, name: &str) -> bool {
        self.layers.disabled.iter().any(|d| d == name)
    }

    /// Generate default configuration file content
    pub fn generate_default() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate config"))
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<(), String> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;

        fs::write(path, content)
            .map_err(|e| format!("Failed to write config: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(!config.check.raise_on_error);
        assert!(config.check.control_flow);
        assert_eq!(config.liquid.solver_bound, 16);
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[check]
raise_on_error = true

[liquid]
solver_bound = 8

[errors]
max_errors = 50
format = "json"

[layers]
disabled = ["liquid"]
"#;

        let config = Config::parse(toml).unwrap();
        assert!(config.check.raise_on_error);
        assert!(config.check.control_flow);
        assert_eq!(config.liquid.solver_bound, 8);
        assert_eq!(config.liquid.cache_capacity, 1024);
        assert_eq!(config.errors.max_errors, 50);
        assert_eq!(config.errors.format, ErrorFormat::Json);
        assert!(config.is_layer_disabled("liquid"));
        assert!(!config.is_layer_disabled("types"));
    }

    #[test]
    fn test_rejects_negative_bound() {
        assert!(Config::parse("[liquid]\nsolver_bound = -1\n").is_err());
    }

    #[test]
    fn test_save_and_discover() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("src").join("deep");
        fs::create_dir_all(&nested).unwrap();

        let mut config = Config::default();
        config.liquid.solver_bound = 5;
        config.save(&dir.path().join("strata.toml")).unwrap();

        let found = Config::discover_from(&nested);
        assert_eq!(found.liquid.solver_bound, 5);
    }

    #[test]
    fn test_generate_default_round_trips() {
        let text = Config::generate_default();
        let parsed = Config::parse(&text).unwrap();
        assert_eq!(parsed.errors.max_errors, 100);
    }
}
