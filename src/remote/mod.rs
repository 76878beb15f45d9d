//! Remote store interface and the Google Drive implementation.

pub mod auth;
pub mod drive;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

/// Prefix and extension every uploaded snapshot name carries.
pub const SNAPSHOT_PREFIX: &str = "students_backup_";
pub const SNAPSHOT_EXTENSION: &str = ".db";

/// One uploaded copy of the database, as listed by the remote store.
/// The remote listing is the source of truth; no local cache is kept.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteSnapshot {
    pub id: String,
    pub name: String,
    pub modified_time: DateTime<Utc>,
}

/// Ephemeral binding of a credential to remote API calls. Never
/// persisted; rebuilt from the credential store on process start.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub access_token: String,
}

/// Build the remote object name for a snapshot taken at `now`.
pub fn snapshot_name(now: DateTime<Utc>) -> String {
    format!(
        "{SNAPSHOT_PREFIX}{}{SNAPSHOT_EXTENSION}",
        now.format("%Y%m%d_%H%M%S")
    )
}

/// Whether a remote object name follows the snapshot naming pattern.
pub fn is_snapshot_name(name: &str) -> bool {
    name.starts_with(SNAPSHOT_PREFIX) && name.ends_with(SNAPSHOT_EXTENSION)
}

pub type RemoteResult<T> = Result<T, RemoteError>;

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("database file not found: {0}")]
    MissingSource(PathBuf),
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("remote API error: {0}")]
    Api(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Operations the coordinator needs from a remote object store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Find the named folder, creating it if absent. Returns its id.
    async fn get_or_create_folder(&self, session: &AuthSession, name: &str)
        -> RemoteResult<String>;

    /// Upload the file as a new timestamped snapshot under `folder_id`.
    async fn upload(
        &self,
        session: &AuthSession,
        folder_id: &str,
        local_path: &Path,
    ) -> RemoteResult<RemoteSnapshot>;

    /// List snapshots in the folder; an empty folder is an empty list.
    async fn list_snapshots(
        &self,
        session: &AuthSession,
        folder_id: &str,
    ) -> RemoteResult<Vec<RemoteSnapshot>>;

    /// Delete one snapshot by id.
    async fn delete(&self, session: &AuthSession, snapshot_id: &str) -> RemoteResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_snapshot_name_embeds_utc_timestamp() {
        let at = Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap();
        assert_eq!(snapshot_name(at), "students_backup_20260314_092653.db");
    }

    #[test]
    fn test_snapshot_name_matches_its_own_pattern() {
        assert!(is_snapshot_name(&snapshot_name(Utc::now())));
    }

    #[test]
    fn test_unrelated_names_are_rejected() {
        assert!(!is_snapshot_name("students.db"));
        assert!(!is_snapshot_name("students_backup_20260314_092653.txt"));
        assert!(!is_snapshot_name("notes_backup_20260314_092653.db"));
    }
}
