//! Unattended backup scheduling — wakes hourly, backs up once per day.

use crate::config::{BackupConfig, LOCAL_BACKUP_PATH_KEY};
use crate::coordinator::{BackupCoordinator, BackupRequest, CoordinatorError};
use crate::settings::SettingsStore;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// The last-backup timestamp, persisted as one RFC 3339 line.
pub struct BackupStamp {
    path: PathBuf,
}

impl BackupStamp {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Absent or garbled file means "never backed up".
    pub fn load(&self) -> Option<DateTime<Utc>> {
        let text = std::fs::read_to_string(&self.path).ok()?;
        match DateTime::parse_from_rfc3339(text.trim()) {
            Ok(ts) => Some(ts.with_timezone(&Utc)),
            Err(e) => {
                warn!("ignoring garbled last-backup stamp: {e}");
                None
            }
        }
    }

    pub fn save(&self, at: DateTime<Utc>) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, at.to_rfc3339())
    }
}

/// Wakes on a fixed interval and triggers an unattended local backup once
/// the configured backup interval has elapsed. The 24 h gate is evaluated
/// on every wake, so a late tick self-corrects.
pub struct Scheduler {
    coordinator: Arc<BackupCoordinator>,
    settings: Arc<dyn SettingsStore>,
    stamp: BackupStamp,
    backup_interval: chrono::Duration,
    tick_interval: Duration,
}

impl Scheduler {
    pub fn new(
        config: &BackupConfig,
        coordinator: Arc<BackupCoordinator>,
        settings: Arc<dyn SettingsStore>,
    ) -> Self {
        Self {
            coordinator,
            settings,
            stamp: BackupStamp::new(config.last_backup_path.clone()),
            backup_interval: config.backup_interval,
            tick_interval: config.tick_interval,
        }
    }

    /// One scheduling decision. Returns whether a backup actually ran.
    pub async fn tick(&self) -> bool {
        let now = Utc::now();
        let due = match self.stamp.load() {
            None => true,
            Some(last) => now - last >= self.backup_interval,
        };
        if !due {
            debug!("scheduled backup not due yet");
            return false;
        }

        let Some(path) = self.settings.get_setting(LOCAL_BACKUP_PATH_KEY) else {
            debug!("scheduled backup due but no local backup path is configured");
            return false;
        };

        let request = BackupRequest {
            destination: PathBuf::from(path),
            silent: true,
        };
        match self.coordinator.run_local_backup(request).await {
            Ok(written) => {
                info!("scheduled backup written to {}", written.display());
                true
            }
            Err(CoordinatorError::Busy) => {
                debug!("scheduled backup skipped, another backup is running");
                false
            }
            Err(e) => {
                warn!("scheduled backup failed: {e}");
                false
            }
        }
    }

    /// Run forever. The single-flight gate is only touched when a backup
    /// actually starts, never while idle.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.tick().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::auth::{AuthError, AuthFlow, SessionState};
    use crate::remote::{AuthSession, RemoteResult, RemoteSnapshot, RemoteStore};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct UnusedAuth;

    #[async_trait]
    impl AuthFlow for UnusedAuth {
        async fn ensure_session(&self) -> Result<SessionState, AuthError> {
            Err(AuthError::AuthorizationFailed("not used".into()))
        }

        async fn complete_authorization(&self, _code: &str) -> Result<AuthSession, AuthError> {
            Err(AuthError::AuthorizationFailed("not used".into()))
        }
    }

    struct UnusedRemote;

    #[async_trait]
    impl RemoteStore for UnusedRemote {
        async fn get_or_create_folder(
            &self,
            _session: &AuthSession,
            _name: &str,
        ) -> RemoteResult<String> {
            Err(crate::remote::RemoteError::Api("not used".into()))
        }

        async fn upload(
            &self,
            _session: &AuthSession,
            _folder_id: &str,
            _local_path: &Path,
        ) -> RemoteResult<RemoteSnapshot> {
            Err(crate::remote::RemoteError::Api("not used".into()))
        }

        async fn list_snapshots(
            &self,
            _session: &AuthSession,
            _folder_id: &str,
        ) -> RemoteResult<Vec<RemoteSnapshot>> {
            Err(crate::remote::RemoteError::Api("not used".into()))
        }

        async fn delete(&self, _session: &AuthSession, _snapshot_id: &str) -> RemoteResult<()> {
            Err(crate::remote::RemoteError::Api("not used".into()))
        }
    }

    struct MemorySettings {
        values: Mutex<HashMap<String, String>>,
    }

    impl MemorySettings {
        fn with_backup_path(path: &Path) -> Arc<Self> {
            let mut values = HashMap::new();
            values.insert(
                LOCAL_BACKUP_PATH_KEY.to_string(),
                path.to_string_lossy().into_owned(),
            );
            Arc::new(Self {
                values: Mutex::new(values),
            })
        }

        fn empty() -> Arc<Self> {
            Arc::new(Self {
                values: Mutex::new(HashMap::new()),
            })
        }
    }

    impl crate::settings::SettingsStore for MemorySettings {
        fn get_setting(&self, key: &str) -> Option<String> {
            self.values.lock().unwrap().get(key).cloned()
        }

        fn save_setting(&self, key: &str, value: &str) {
            self.values
                .lock()
                .unwrap()
                .insert(key.to_string(), value.to_string());
        }
    }

    fn setup(tmp: &TempDir, settings: Arc<MemorySettings>) -> (Scheduler, BackupConfig) {
        let _ = env_logger::builder().is_test(true).try_init();
        let db_path = tmp.path().join("students.db");
        std::fs::write(&db_path, b"student records").unwrap();
        let config = BackupConfig {
            db_path,
            client_secret_path: tmp.path().join("credentials.json"),
            credential_path: tmp.path().join("token.json"),
            last_backup_path: tmp.path().join("last_backup.txt"),
            ..BackupConfig::default()
        };
        let coordinator = Arc::new(BackupCoordinator::new(
            &config,
            Arc::new(UnusedAuth),
            Arc::new(UnusedRemote),
        ));
        (Scheduler::new(&config, coordinator, settings), config)
    }

    #[test]
    fn test_stamp_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let stamp = BackupStamp::new(tmp.path().join("last_backup.txt"));
        assert!(stamp.load().is_none());

        let at = Utc::now();
        stamp.save(at).unwrap();
        let loaded = stamp.load().unwrap();
        assert!((loaded - at).num_milliseconds().abs() < 10);
    }

    #[test]
    fn test_garbled_stamp_means_never_backed_up() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("last_backup.txt");
        std::fs::write(&path, "yesterday-ish").unwrap();
        assert!(BackupStamp::new(path).load().is_none());
    }

    #[tokio::test]
    async fn test_tick_does_not_back_up_before_interval() {
        let tmp = TempDir::new().unwrap();
        let backup_dir = tmp.path().join("backups");
        let (scheduler, config) = setup(&tmp, MemorySettings::with_backup_path(&backup_dir));

        BackupStamp::new(config.last_backup_path.clone())
            .save(Utc::now() - chrono::Duration::hours(23))
            .unwrap();

        assert!(!scheduler.tick().await);
        assert!(!backup_dir.join("students.db").exists());
    }

    #[tokio::test]
    async fn test_tick_backs_up_after_interval_and_moves_stamp() {
        let tmp = TempDir::new().unwrap();
        let backup_dir = tmp.path().join("backups");
        let (scheduler, config) = setup(&tmp, MemorySettings::with_backup_path(&backup_dir));

        let stamp = BackupStamp::new(config.last_backup_path.clone());
        stamp
            .save(Utc::now() - chrono::Duration::hours(25))
            .unwrap();

        let before = Utc::now();
        assert!(scheduler.tick().await);
        assert!(backup_dir.join("students.db").exists());
        assert!(stamp.load().unwrap() >= before);

        // Immediately due again? No — the stamp just moved.
        assert!(!scheduler.tick().await);
    }

    #[tokio::test]
    async fn test_tick_backs_up_when_never_backed_up() {
        let tmp = TempDir::new().unwrap();
        let backup_dir = tmp.path().join("backups");
        let (scheduler, _) = setup(&tmp, MemorySettings::with_backup_path(&backup_dir));

        assert!(scheduler.tick().await);
        assert!(backup_dir.join("students.db").exists());
    }

    #[tokio::test]
    async fn test_tick_without_configured_path_does_nothing() {
        let tmp = TempDir::new().unwrap();
        let (scheduler, config) = setup(&tmp, MemorySettings::empty());

        assert!(!scheduler.tick().await);
        assert!(!config.last_backup_path.exists());
    }
}
