//! Config loading for the capsules binary.

use std::fs;
use std::path::{Path, PathBuf};

use crate::types::Config;

pub fn config_path() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or("Could not find home directory")?;
    Ok(home.join(".capsules").join("config.json"))
}

/// Load `~/.capsules/config.json`, falling back to defaults when it is absent,
/// then apply environment overrides.
pub fn load_config() -> Result<Config, String> {
    let path = config_path()?;
    load_config_from(&path)
}

pub fn load_config_from(path: &Path) -> Result<Config, String> {
    let mut config = if path.exists() {
        let content =
            fs::read_to_string(path).map_err(|e| format!("Failed to read config: {}", e))?;
        serde_json::from_str(&content).map_err(|e| format!("Failed to parse config: {}", e))?
    } else {
        log::info!("No config at {}; using defaults", path.display());
        Config::default()
    };

    apply_env_overrides(
        &mut config,
        std::env::var("OPENAI_API_KEY").ok(),
        std::env::var("CAPSULES_DB").ok(),
    );
    Ok(config)
}

/// `OPENAI_API_KEY` fills a missing key; `CAPSULES_DB` replaces the database path.
fn apply_env_overrides(config: &mut Config, api_key: Option<String>, db_path: Option<String>) {
    if config.openai.api_key.as_deref().map_or(true, str::is_empty) {
        if let Some(key) = api_key.filter(|k| !k.trim().is_empty()) {
            config.openai.api_key = Some(key);
        }
    }
    if let Some(db) = db_path.filter(|p| !p.trim().is_empty()) {
        config.database_path = Some(PathBuf::from(db));
    }
}

/// Default OAuth token location: `~/.capsules/google/token.json`.
pub fn token_path(config: &Config) -> Result<PathBuf, String> {
    if let Some(path) = &config.google.token_path {
        return Ok(path.clone());
    }
    let home = dirs::home_dir().ok_or("Could not find home directory")?;
    Ok(home.join(".capsules").join("google").join("token.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("config.json")).unwrap();
        assert_eq!(config.max_emails, 10);
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        let err = load_config_from(&path).unwrap_err();
        assert!(err.starts_with("Failed to parse config"));
    }

    #[test]
    fn test_env_key_only_fills_missing_key() {
        let mut config = Config::default();
        apply_env_overrides(&mut config, Some("sk-env".into()), None);
        assert_eq!(config.openai.api_key.as_deref(), Some("sk-env"));

        config.openai.api_key = Some("sk-file".into());
        apply_env_overrides(&mut config, Some("sk-env".into()), Some("/tmp/c.db".into()));
        assert_eq!(config.openai.api_key.as_deref(), Some("sk-file"));
        assert_eq!(config.database_path, Some(PathBuf::from("/tmp/c.db")));
    }
}
