//! Store configuration.
//!
//! Kept next to the database file as `<db>.config.json`. Missing file
//! means defaults; unknown fields are rejected so typos surface early.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{FlexError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct StoreConfig {
    /// Per-object failures a refactor tolerates before rolling back.
    /// `None` = unlimited.
    pub failure_threshold: Option<usize>,
    /// Recorded as `ChangedBy` in the change log.
    pub changed_by: String,
    /// Global switch for change-log entries.
    pub track_changes: bool,
    /// SQLite journal mode (`WAL`, `DELETE`, ...).
    pub journal_mode: String,
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            failure_threshold: None,
            changed_by: "flexstore".to_string(),
            track_changes: true,
            journal_mode: "WAL".to_string(),
            busy_timeout_ms: 5_000,
        }
    }
}

impl StoreConfig {
    /// Side-car path for a database file.
    pub fn sidecar_path(db_path: &Path) -> PathBuf {
        let mut name = db_path.as_os_str().to_os_string();
        name.push(".config.json");
        PathBuf::from(name)
    }

    /// Read config next to `db_path`. Returns None if the file doesn't exist.
    pub fn read_from(db_path: &Path) -> Result<Option<Self>> {
        let path = Self::sidecar_path(db_path);
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(Some(config))
    }

    /// Write config next to `db_path`.
    pub fn write_to(&self, db_path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(Self::sidecar_path(db_path), json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        const MODES: [&str; 6] = ["DELETE", "TRUNCATE", "PERSIST", "MEMORY", "WAL", "OFF"];
        if !MODES.iter().any(|m| m.eq_ignore_ascii_case(&self.journal_mode)) {
            return Err(FlexError::Config(format!(
                "unknown journal mode '{}'",
                self.journal_mode
            )));
        }
        if self.changed_by.is_empty() {
            return Err(FlexError::Config("changedBy must not be empty".to_string()));
        }
        Ok(())
    }

    /// Whether `failures` per-object failures exceed the threshold.
    pub fn exceeds_threshold(&self, failures: usize) -> bool {
        matches!(self.failure_threshold, Some(t) if failures > t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_is_none() {
        let dir = tempdir().unwrap();
        assert!(StoreConfig::read_from(&dir.path().join("db.sqlite")).unwrap().is_none());
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("db.sqlite");
        let config = StoreConfig {
            failure_threshold: Some(3),
            changed_by: "tester".to_string(),
            ..Default::default()
        };
        config.write_to(&db).unwrap();
        assert!(dir.path().join("db.sqlite.config.json").exists());
        assert_eq!(StoreConfig::read_from(&db).unwrap(), Some(config));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: StoreConfig = serde_json::from_str(r#"{"failureThreshold": 0}"#).unwrap();
        assert_eq!(config.failure_threshold, Some(0));
        assert!(config.track_changes);
        assert!(config.exceeds_threshold(1));
        assert!(!config.exceeds_threshold(0));
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(serde_json::from_str::<StoreConfig>(r#"{"failureTreshold": 1}"#).is_err());
        let bad = StoreConfig { journal_mode: "FAST".to_string(), ..Default::default() };
        assert_eq!(bad.validate().unwrap_err().code(), "CONFIG_ERROR");
    }
}
