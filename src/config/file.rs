// src/config/file.rs
// File-based configuration from ~/.engram/config.toml

use crate::consolidation::ConsolidationConfig;
use crate::decay::DecayConfig;
use crate::mmr::MmrConfig;
use crate::quality::QualityConfig;
use serde::Deserialize;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Top-level configuration. Every section has complete defaults, so a
/// missing or partial file is never an error.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct EngramConfig {
    pub decay: DecayConfig,
    pub mmr: MmrConfig,
    pub quality: QualityConfig,
    pub consolidation: ConsolidationConfig,
}

impl EngramConfig {
    /// Load from `~/.engram/config.toml`, falling back to defaults when
    /// the file is missing or unparseable.
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// Load from an explicit path (tests, alternate deployments).
    pub fn load_from(path: &PathBuf) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    debug!(path = %path.display(), "Loaded config from file");
                    config
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to parse config file, using defaults");
                    Self::default()
                }
            },
            Err(_) => {
                debug!(path = %path.display(), "Config file not found, using defaults");
                Self::default()
            }
        }
    }

    fn config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".engram")
            .join("config.toml")
    }
}
