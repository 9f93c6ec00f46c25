//! YAML configuration loading
//!
//! Every entry point parses, then validates; a config that parses but breaks
//! a rule never reaches the scanner.

use std::path::Path;

use tracing::info;

use crate::error::AppError;

use super::types::AppConfig;

fn parse(yaml: &str, origin: &str) -> Result<AppConfig, AppError> {
    let config: AppConfig = serde_yaml::from_str(yaml)
        .map_err(|e| AppError::Config(format!("YAML parse error in {}: {}", origin, e)))?;
    config.validate()?;
    Ok(config)
}

/// Load and validate the YAML file at `path`
///
/// ```ignore
/// use std::path::Path;
/// use watchlist_scanner::config::load_config;
///
/// let config = load_config(Path::new("config.yaml"))?;
/// ```
pub fn load_config(path: &Path) -> Result<AppConfig, AppError> {
    let yaml = match std::fs::read_to_string(path) {
        Ok(yaml) => yaml,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(AppError::Config(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }
        Err(e) => return Err(e.into()),
    };
    let config = parse(&yaml, &format!("'{}'", path.display()))?;
    info!(path = %path.display(), detectors = config.detectors.len(), "Configuration loaded");
    Ok(config)
}

/// Parse and validate an in-memory YAML document
pub fn load_config_from_str(yaml_content: &str) -> Result<AppConfig, AppError> {
    parse(yaml_content, "inline config")
}

/// Load the file if present, otherwise run on defaults
///
/// A missing default `config.yaml` is not an error; an explicitly given
/// path that does not exist is.
pub fn load_config_or_default(path: &Path, explicit: bool) -> Result<AppConfig, AppError> {
    if !explicit && !path.exists() {
        info!(path = %path.display(), "No config file found, using defaults");
        let config = AppConfig::default();
        config.validate()?;
        return Ok(config);
    }
    load_config(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCANNER_YAML: &str = r#"
feed:
  data_feed: iex
  channels: [bars]
subscriptions:
  max_concurrent: 30
  rotation_interval_sec: 120
alerts:
  cooldown_sec: 600
detectors:
  - name: bull_flag
    args:
      impulse_len: 8
      flag_len: 6
"#;

    fn write_config(contents: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scanner.yaml");
        std::fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn test_inline_yaml_overrides_defaults() {
        let config = load_config_from_str(SCANNER_YAML).unwrap();
        assert_eq!(config.subscriptions.rotation_interval_sec, 120);
        assert_eq!(config.alerts.cooldown_sec, 600);
        assert_eq!(config.watchlist, AppConfig::default().watchlist);
    }

    #[test]
    fn test_broken_yaml_names_its_origin() {
        let err = load_config_from_str("subscriptions: [").unwrap_err().to_string();
        assert!(err.contains("YAML parse error in inline config"), "Got: {}", err);

        let (_dir, path) = write_config("feed: {channels: [bars]");
        let err = load_config(&path).unwrap_err().to_string();
        assert!(err.contains("scanner.yaml"), "Got: {}", err);
    }

    #[test]
    fn test_rule_violation_is_rejected_after_parse() {
        let err = load_config_from_str("alerts:\n  workers: 0\n").unwrap_err();
        assert!(err.to_string().contains("alerts.workers"));
    }

    #[test]
    fn test_file_matches_inline() {
        let (_dir, path) = write_config(SCANNER_YAML);
        let config = load_config(&path).unwrap();
        assert_eq!(config, load_config_from_str(SCANNER_YAML).unwrap());
    }

    #[test]
    fn test_missing_file() {
        let err = load_config(Path::new("/nonexistent/scanner.yaml")).unwrap_err();
        assert!(err.to_string().contains("Configuration file not found"));
    }

    #[test]
    fn test_missing_default_path_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");

        let config = load_config_or_default(&path, false).unwrap();
        assert_eq!(config, AppConfig::default());

        assert!(load_config_or_default(&path, true).is_err());
    }
}
