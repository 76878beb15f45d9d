//! Settings collaborator seam — the host application owns the real store.

use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

/// Opaque key/value settings API exposed by the host application.
///
/// The subsystem only ever reads and writes `local_backup_path`
/// ([`crate::config::LOCAL_BACKUP_PATH_KEY`]).
pub trait SettingsStore: Send + Sync {
    fn get_setting(&self, key: &str) -> Option<String>;
    fn save_setting(&self, key: &str, value: &str);
}

/// JSON-file settings store for hosts that do not bring their own.
pub struct FileSettings {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

#[derive(Default, Serialize, Deserialize)]
struct StoredSettings(BTreeMap<String, String>);

impl FileSettings {
    pub fn open(path: PathBuf) -> Self {
        let values = std::fs::read_to_string(&path)
            .ok()
            .and_then(|json| serde_json::from_str::<StoredSettings>(&json).ok())
            .unwrap_or_default()
            .0;
        Self {
            path,
            values: Mutex::new(values),
        }
    }

    fn persist(&self, values: &BTreeMap<String, String>) {
        let json = match serde_json::to_string_pretty(&StoredSettings(values.clone())) {
            Ok(json) => json,
            Err(e) => {
                warn!("failed to serialize settings: {e}");
                return;
            }
        };
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        // Temp-then-rename, so a crash mid-write never truncates the
        // previous settings file.
        let tmp = self.path.with_extension("json.tmp");
        if let Err(e) = std::fs::write(&tmp, json) {
            warn!("failed to write settings file {}: {e}", tmp.display());
            return;
        }
        if let Err(e) = std::fs::rename(&tmp, &self.path) {
            warn!("failed to replace settings file {}: {e}", self.path.display());
        }
    }
}

impl SettingsStore for FileSettings {
    fn get_setting(&self, key: &str) -> Option<String> {
        self.values.lock().ok()?.get(key).cloned()
    }

    fn save_setting(&self, key: &str, value: &str) {
        let Ok(mut values) = self.values.lock() else {
            return;
        };
        values.insert(key.to_string(), value.to_string());
        self.persist(&values);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LOCAL_BACKUP_PATH_KEY;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_means_no_settings() {
        let tmp = TempDir::new().unwrap();
        let store = FileSettings::open(tmp.path().join("settings.json"));
        assert_eq!(store.get_setting(LOCAL_BACKUP_PATH_KEY), None);
    }

    #[test]
    fn test_save_then_reload() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("settings.json");

        let store = FileSettings::open(path.clone());
        store.save_setting(LOCAL_BACKUP_PATH_KEY, "/mnt/usb/backups");

        let reloaded = FileSettings::open(path);
        assert_eq!(
            reloaded.get_setting(LOCAL_BACKUP_PATH_KEY).as_deref(),
            Some("/mnt/usb/backups")
        );
    }

    #[test]
    fn test_save_replaces_file_whole_and_leaves_no_temp() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("settings.json");

        let store = FileSettings::open(path.clone());
        store.save_setting(LOCAL_BACKUP_PATH_KEY, "/first");
        store.save_setting(LOCAL_BACKUP_PATH_KEY, "/second");

        assert!(!path.with_extension("json.tmp").exists());
        let json = std::fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed[LOCAL_BACKUP_PATH_KEY], "/second");
    }
}
