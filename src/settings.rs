use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::SettingsError;

/// On-disk shape of the settings file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SettingsData {
    /// Identifiers of migrations that have been applied and committed.
    #[serde(default)]
    completed_migrations: BTreeSet<String>,
}

/// Durable process-wide state kept OUTSIDE the entity database:
/// `$XDG_DATA_HOME/newsmirror/settings.yaml` (or an explicit path).
///
/// Migration flags live here because they record what has been *applied*,
/// not what currently exists, so they must survive a reset or re-creation of
/// the entity tables proper.
#[derive(Debug)]
pub struct Settings {
    data: SettingsData,
    path: Option<PathBuf>,
}

impl Settings {
    /// Settings that are never persisted. Test/debug support.
    pub fn in_memory() -> Self {
        Self {
            data: SettingsData::default(),
            path: None,
        }
    }

    /// Load settings from an explicit path. A missing or unreadable file
    /// yields defaults; this is the first-launch path, not an error.
    pub fn load_from(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let data = match fs::read_to_string(&path) {
            Ok(contents) => serde_yaml::from_str(&contents).unwrap_or_default(),
            Err(_) => SettingsData::default(),
        };
        Self {
            data,
            path: Some(path),
        }
    }

    /// Load settings from the default location, creating the data
    /// directory if needed.
    pub fn load() -> Result<Self, SettingsError> {
        let dir = dirs::data_dir()
            .ok_or(SettingsError::NoDataDir)?
            .join("newsmirror");
        fs::create_dir_all(&dir)?;
        Ok(Self::load_from(dir.join("settings.yaml")))
    }

    pub fn migration_complete(&self, id: &str) -> bool {
        self.data.completed_migrations.contains(id)
    }

    /// Record a migration as applied and persist immediately. This is the
    /// runner's commit boundary for the flag.
    pub fn mark_migration_complete(&mut self, id: &str) -> Result<(), SettingsError> {
        self.data.completed_migrations.insert(id.to_string());
        self.persist()
    }

    /// Clear one migration flag so it re-runs. Test/debug support only.
    pub fn reset_migration(&mut self, id: &str) -> Result<(), SettingsError> {
        self.data.completed_migrations.remove(id);
        self.persist()
    }

    /// Clear every migration flag. Test/debug support only.
    pub fn reset_all_migrations(&mut self) -> Result<(), SettingsError> {
        self.data.completed_migrations.clear();
        self.persist()
    }

    /// Write the settings file atomically (temp file + rename) so a crash
    /// mid-write cannot corrupt the previous version.
    fn persist(&self) -> Result<(), SettingsError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let yaml = serde_yaml::to_string(&self.data)?;
        let temp_path = path.with_extension("yaml.tmp");
        fs::write(&temp_path, yaml)?;
        fs::rename(&temp_path, path)?;
        Ok(())
    }
}
