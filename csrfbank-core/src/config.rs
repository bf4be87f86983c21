//! Configuration management
//!
//! Settings live in `settings.json` inside the data directory:
//! ```json
//! {
//!   "defaultIdentity": "alice",
//!   "bindAddress": "0.0.0.0:8080",
//!   "databaseFile": "csrfbank.duckdb",
//!   "seedAccounts": [{ "username": "alice", "balance": 1000 }]
//! }
//! ```
//! Keys this crate does not know about are kept when saving.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::result::{Error, Result};
use crate::domain::SeedAccount;

pub const DEFAULT_IDENTITY: &str = "alice";
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";
pub const DEFAULT_DATABASE_FILE: &str = "csrfbank.duckdb";

const SETTINGS_FILE: &str = "settings.json";

/// Raw settings.json structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    default_identity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bind_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    database_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    seed_accounts: Option<Vec<SeedAccount>>,
    #[serde(flatten)]
    other: HashMap<String, serde_json::Value>,
}

/// Resolved configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Identity used when a request carries none (demo simplification)
    pub default_identity: String,
    pub bind_address: String,
    pub database_file: String,
    pub seed_accounts: Vec<SeedAccount>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_identity: DEFAULT_IDENTITY.to_string(),
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            database_file: DEFAULT_DATABASE_FILE.to_string(),
            seed_accounts: SeedAccount::defaults(),
        }
    }
}

impl Config {
    /// Load config from the data directory
    ///
    /// Missing file or fields fall back to defaults. `CSRFBANK_BIND` and
    /// `CSRFBANK_DEFAULT_IDENTITY` override the file.
    pub fn load(data_dir: &Path) -> Result<Self> {
        let raw = read_settings(data_dir)?;
        let defaults = Config::default();

        let mut config = Config {
            default_identity: raw.default_identity.unwrap_or(defaults.default_identity),
            bind_address: raw.bind_address.unwrap_or(defaults.bind_address),
            database_file: raw.database_file.unwrap_or(defaults.database_file),
            seed_accounts: raw.seed_accounts.unwrap_or(defaults.seed_accounts),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(bind) = var("CSRFBANK_BIND").filter(|v| !v.is_empty()) {
            self.bind_address = bind;
        }
        if let Some(identity) = var("CSRFBANK_DEFAULT_IDENTITY").filter(|v| !v.is_empty()) {
            self.default_identity = identity;
        }
    }

    fn validate(&self) -> Result<()> {
        if self.default_identity.trim().is_empty() {
            return Err(Error::Config("defaultIdentity cannot be empty".to_string()));
        }
        for seed in &self.seed_accounts {
            seed.clone()
                .into_account()
                .validate()
                .map_err(|e| Error::Config(format!("seed account {:?}: {}", seed.username, e)))?;
        }
        Ok(())
    }

    /// Save config to the data directory
    /// Preserves other settings this crate doesn't manage
    pub fn save(&self, data_dir: &Path) -> Result<()> {
        let mut settings = read_settings(data_dir)?;

        settings.default_identity = Some(self.default_identity.clone());
        settings.bind_address = Some(self.bind_address.clone());
        settings.database_file = Some(self.database_file.clone());
        settings.seed_accounts = Some(self.seed_accounts.clone());

        let content = serde_json::to_string_pretty(&settings)?;
        std::fs::write(data_dir.join(SETTINGS_FILE), content)?;
        Ok(())
    }
}

fn read_settings(data_dir: &Path) -> Result<SettingsFile> {
    let settings_path = data_dir.join(SETTINGS_FILE);
    if !settings_path.exists() {
        return Ok(SettingsFile::default());
    }
    let content = std::fs::read_to_string(&settings_path)?;
    match serde_json::from_str(&content) {
        Ok(settings) => Ok(settings),
        Err(e) => {
            tracing::warn!("Ignoring unreadable {}: {}", settings_path.display(), e);
            Ok(SettingsFile::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_without_settings_file() {
        let dir = tempdir().unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.database_file, "csrfbank.duckdb");
        assert_eq!(config.seed_accounts, SeedAccount::defaults());

        let defaults = Config::default();
        assert_eq!(defaults.default_identity, "alice");
        assert_eq!(defaults.bind_address, "0.0.0.0:8080");
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env_overrides(|key| match key {
            "CSRFBANK_BIND" => Some("127.0.0.1:9000".to_string()),
            "CSRFBANK_DEFAULT_IDENTITY" => Some("bob".to_string()),
            _ => None,
        });
        assert_eq!(config.bind_address, "127.0.0.1:9000");
        assert_eq!(config.default_identity, "bob");

        // empty values do not override
        config.apply_env_overrides(|_| Some(String::new()));
        assert_eq!(config.default_identity, "bob");
    }

    #[test]
    fn test_save_and_load_preserves_unknown_keys() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("settings.json"),
            r#"{ "theme": "dark", "databaseFile": "other.duckdb" }"#,
        )
        .unwrap();

        let mut config = Config::load(dir.path()).unwrap();
        assert_eq!(config.database_file, "other.duckdb");

        config.seed_accounts = vec![SeedAccount::new("carol", 5)];
        config.save(dir.path()).unwrap();

        let content = std::fs::read_to_string(dir.path().join("settings.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(value["theme"], "dark");
        assert_eq!(value["seedAccounts"][0]["username"], "carol");

        let reloaded = Config::load(dir.path()).unwrap();
        assert_eq!(reloaded.seed_accounts, vec![SeedAccount::new("carol", 5)]);
    }

    #[test]
    fn test_invalid_seed_rejected() {
        let mut config = Config::default();
        config.seed_accounts.push(SeedAccount::new("overdrawn", -1));
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_malformed_settings_fall_back_to_defaults() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("settings.json"), "not json").unwrap();
        let raw = read_settings(dir.path()).unwrap();
        assert!(raw.default_identity.is_none());
    }
}
