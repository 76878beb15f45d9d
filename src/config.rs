//! Subsystem configuration — paths, intervals, retention settings.

use crate::retention::RetentionPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Remote folder that holds the uploaded snapshots.
pub const DRIVE_FOLDER_NAME: &str = "Elnada_Backup";

/// Settings key under which the host stores the chosen local backup directory.
pub const LOCAL_BACKUP_PATH_KEY: &str = "local_backup_path";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Path to the live SQLite database file
    pub db_path: PathBuf,
    /// Path to the OAuth client secret file (read-only, shipped with the app)
    pub client_secret_path: PathBuf,
    /// Path to the persisted OAuth token blob (writable, per install)
    pub credential_path: PathBuf,
    /// Path to the last-backup timestamp file
    pub last_backup_path: PathBuf,
    /// Name of the remote folder holding snapshots
    pub drive_folder_name: String,
    /// Minimum age of the last backup before the scheduler runs another
    #[serde(with = "chrono_duration_secs")]
    pub backup_interval: chrono::Duration,
    /// How often the scheduler wakes to evaluate the backup interval
    #[serde(with = "duration_secs")]
    pub tick_interval: Duration,
    /// Which remote snapshots get deleted after an upload
    pub retention: RetentionPolicy,
    /// Per-request timeout for remote API calls
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,
}

impl Default for BackupConfig {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            db_path: PathBuf::from("students.db"),
            client_secret_path: PathBuf::from("credentials.json"),
            credential_path: data_dir.join("token.json"),
            last_backup_path: data_dir.join("last_backup.txt"),
            drive_folder_name: DRIVE_FOLDER_NAME.to_string(),
            backup_interval: chrono::Duration::hours(24),
            tick_interval: Duration::from_secs(3600),
            retention: RetentionPolicy::default(),
            request_timeout: Duration::from_secs(120),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("elnada-backup")
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

mod chrono_duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &chrono::Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_i64(d.num_seconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<chrono::Duration, D::Error> {
        Ok(chrono::Duration::seconds(i64::deserialize(d)?))
    }
}
