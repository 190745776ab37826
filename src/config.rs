//! Configuration management for NoteCore.
//!
//! This module handles loading and saving configuration to/from a JSON file.
//! The config directory can be customized.
//!
//! Sections:
//! - sync: where and how often the client syncs
//! - server: port and bearer tokens for the sync server

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{NoteError, NoteResult};
use crate::sync_engine::SyncSettings;
use crate::validation::validate_server_url;

/// Client sync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Base URL of the sync server
    #[serde(default = "default_server_url")]
    pub server_url: String,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

fn default_server_url() -> String {
    "http://localhost:5000/api".to_string()
}

fn default_interval_secs() -> u64 {
    30
}

fn default_probe_timeout_ms() -> u64 {
    5000
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_shutdown_timeout_secs() -> u64 {
    5
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            server_url: default_server_url(),
            interval_secs: default_interval_secs(),
            probe_timeout_ms: default_probe_timeout_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

/// Sync server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_port")]
    pub port: u16,
    /// Bearer token -> owner id
    #[serde(default)]
    pub tokens: HashMap<String, i64>,
}

fn default_server_port() -> u16 {
    5000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_server_port(),
            tokens: HashMap::new(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigData {
    /// Path to the database file
    #[serde(default)]
    pub database_file: String,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Configuration manager
pub struct Config {
    config_dir: PathBuf,
    config_file: PathBuf,
    data: ConfigData,
}

impl Config {
    /// Create a new configuration manager
    ///
    /// Without the `desktop` feature, `config_dir` is required.
    pub fn new(config_dir: Option<PathBuf>) -> NoteResult<Self> {
        let config_dir = match config_dir {
            Some(dir) => dir,
            None => {
                #[cfg(feature = "desktop")]
                {
                    dirs::config_dir()
                        .unwrap_or_else(|| PathBuf::from("."))
                        .join("notecore")
                }
                #[cfg(not(feature = "desktop"))]
                {
                    return Err(NoteError::Config(
                        "config_dir is required without the desktop feature".to_string(),
                    ));
                }
            }
        };

        fs::create_dir_all(&config_dir)?;
        let config_file = config_dir.join("config.json");

        let defaults = || ConfigData {
            database_file: config_dir.join("notes.db").to_string_lossy().to_string(),
            ..Default::default()
        };

        let data = if config_file.exists() {
            let content = fs::read_to_string(&config_file)?;
            match serde_json::from_str::<ConfigData>(&content) {
                Ok(data) => data,
                Err(e) => {
                    tracing::warn!(
                        "Ignoring unreadable config {}: {}",
                        config_file.display(),
                        e
                    );
                    defaults()
                }
            }
        } else {
            defaults()
        };

        let config = Self {
            config_dir,
            config_file,
            data,
        };

        // Save default config if it doesn't exist
        if !config.config_file.exists() {
            config.save()?;
        }

        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> NoteResult<()> {
        let content = serde_json::to_string_pretty(&self.data)?;
        fs::write(&self.config_file, content)?;
        Ok(())
    }

    /// Get the configuration directory path
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Get the database file path
    pub fn database_file(&self) -> &str {
        &self.data.database_file
    }

    pub fn sync_config(&self) -> &SyncConfig {
        &self.data.sync
    }

    pub fn is_sync_enabled(&self) -> bool {
        self.data.sync.enabled
    }

    pub fn set_sync_enabled(&mut self, enabled: bool) -> NoteResult<()> {
        self.data.sync.enabled = enabled;
        self.save()
    }

    pub fn server_url(&self) -> &str {
        &self.data.sync.server_url
    }

    pub fn set_server_url(&mut self, url: &str) -> NoteResult<()> {
        validate_server_url(url)?;
        self.data.sync.server_url = url.trim().to_string();
        self.save()
    }

    pub fn set_sync_interval_secs(&mut self, secs: u64) -> NoteResult<()> {
        if secs == 0 {
            return Err(NoteError::validation("interval_secs", "must be positive"));
        }
        self.data.sync.interval_secs = secs;
        self.save()
    }

    /// Engine settings derived from the sync section.
    pub fn sync_settings(&self) -> NoteResult<SyncSettings> {
        let sync = &self.data.sync;
        validate_server_url(&sync.server_url)?;
        if sync.interval_secs == 0 {
            return Err(NoteError::Config("sync.interval_secs must be positive".to_string()));
        }

        Ok(SyncSettings::new(sync.server_url.clone())
            .with_interval(Duration::from_secs(sync.interval_secs))
            .with_probe_timeout(Duration::from_millis(sync.probe_timeout_ms))
            .with_request_timeout(Duration::from_secs(sync.request_timeout_secs))
            .with_shutdown_timeout(Duration::from_secs(sync.shutdown_timeout_secs)))
    }

    pub fn server_config(&self) -> &ServerConfig {
        &self.data.server
    }

    pub fn server_port(&self) -> u16 {
        self.data.server.port
    }

    pub fn set_server_port(&mut self, port: u16) -> NoteResult<()> {
        self.data.server.port = port;
        self.save()
    }

    /// Bearer tokens accepted by the sync server
    pub fn tokens(&self) -> &HashMap<String, i64> {
        &self.data.server.tokens
    }

    /// Allow `token` to act as `owner_id` on the sync server
    pub fn add_token(&mut self, token: &str, owner_id: i64) -> NoteResult<()> {
        let token = token.trim();
        if token.is_empty() {
            return Err(NoteError::validation("token", "cannot be empty"));
        }
        self.data.server.tokens.insert(token.to_string(), owner_id);
        self.save()
    }

    pub fn remove_token(&mut self, token: &str) -> NoteResult<bool> {
        let removed = self.data.server.tokens.remove(token).is_some();
        if removed {
            self.save()?;
        }
        Ok(removed)
    }

    /// Get a configuration value
    pub fn get(&self, key: &str) -> Option<String> {
        let sync = &self.data.sync;
        match key {
            "database_file" => Some(self.data.database_file.clone()),
            "sync.enabled" => Some(sync.enabled.to_string()),
            "sync.server_url" => Some(sync.server_url.clone()),
            "sync.interval_secs" => Some(sync.interval_secs.to_string()),
            "sync.probe_timeout_ms" => Some(sync.probe_timeout_ms.to_string()),
            "sync.request_timeout_secs" => Some(sync.request_timeout_secs.to_string()),
            "sync.shutdown_timeout_secs" => Some(sync.shutdown_timeout_secs.to_string()),
            "server.port" => Some(self.data.server.port.to_string()),
            _ => None,
        }
    }

    /// Set a configuration value
    pub fn set(&mut self, key: &str, value: &str) -> NoteResult<()> {
        match key {
            "database_file" => self.data.database_file = value.to_string(),
            "sync.enabled" => self.data.sync.enabled = parse_value(key, value)?,
            "sync.server_url" => {
                validate_server_url(value)?;
                self.data.sync.server_url = value.trim().to_string();
            }
            "sync.interval_secs" => {
                let secs: u64 = parse_value(key, value)?;
                if secs == 0 {
                    return Err(NoteError::validation("interval_secs", "must be positive"));
                }
                self.data.sync.interval_secs = secs;
            }
            "sync.probe_timeout_ms" => self.data.sync.probe_timeout_ms = parse_value(key, value)?,
            "sync.request_timeout_secs" => {
                self.data.sync.request_timeout_secs = parse_value(key, value)?
            }
            "sync.shutdown_timeout_secs" => {
                self.data.sync.shutdown_timeout_secs = parse_value(key, value)?
            }
            "server.port" => self.data.server.port = parse_value(key, value)?,
            _ => return Err(NoteError::Config(format!("Unknown config key: {}", key))),
        }
        self.save()
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> NoteResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| NoteError::Config(format!("Invalid value for {}: {}", key, value)))
}
