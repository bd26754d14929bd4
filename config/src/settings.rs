//! Application settings management

use crate::PathManager;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Application settings stored in settings.toml
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub layout: LayoutSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Tuning for the layout engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutSettings {
    /// Undo snapshots kept, the baseline included
    pub history_depth: usize,
    /// Diagnostic events kept before the oldest are dropped
    pub diagnostics_capacity: usize,
    /// Epsilon (metres) under which touching faces do not count as overlap
    pub overlap_tolerance: f64,
    /// Settled mutation tickets kept for inspection
    pub settled_ticket_capacity: usize,
}

impl Default for LayoutSettings {
    fn default() -> Self {
        Self {
            history_depth: 100,
            diagnostics_capacity: 1000,
            overlap_tolerance: 1e-6,
            settled_ticket_capacity: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive; `RUST_LOG` wins when set
    pub filter: Option<String>,
    /// Write to the log file instead of stderr
    pub to_file: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: None,
            to_file: true,
        }
    }
}

impl Settings {
    /// Load settings from the settings file, or return defaults if not found
    pub fn load() -> Self {
        match PathManager::settings_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load from an explicit path; missing or malformed files yield defaults
    pub fn load_from(path: &Path) -> Self {
        let Ok(content) = fs::read_to_string(path) else {
            return Self::default();
        };
        toml::from_str(&content).unwrap_or_default()
    }

    /// Save settings to the settings file
    pub fn save(&self) -> Result<(), String> {
        let path = PathManager::settings_path().ok_or("Could not determine settings path")?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create config dir: {}", e))?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize settings: {}", e))?;
        fs::write(path, content).map_err(|e| format!("Failed to write settings: {}", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_from(&dir.path().join("nope.toml"));
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.layout.history_depth, 100);
        assert!(settings.logging.to_file);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "[layout]\nhistory_depth = 5\n").unwrap();

        let settings = Settings::load_from(&path);
        assert_eq!(settings.layout.history_depth, 5);
        assert_eq!(settings.layout.diagnostics_capacity, 1000);
        assert_eq!(settings.logging, LoggingSettings::default());
    }

    #[test]
    fn test_save_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.toml");
        let mut settings = Settings::default();
        settings.logging.filter = Some("rackplan_core=debug".into());
        settings.layout.overlap_tolerance = 0.01;

        settings.save_to(&path).unwrap();
        assert_eq!(Settings::load_from(&path), settings);
    }
}
