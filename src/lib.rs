//! Backup-and-sync subsystem for the Elnada student records database.
//!
//! Copies the live SQLite file to a local directory and/or to a cloud
//! drive folder, authenticating through an out-of-band OAuth device flow,
//! pruning old remote snapshots after each upload, and running unattended
//! on a daily schedule. The host application supplies the GUI and its own
//! settings store; this crate only reports outcomes through callbacks.

pub mod config;
pub mod coordinator;
pub mod credentials;
pub mod local;
pub mod remote;
pub mod retention;
pub mod scheduler;
pub mod settings;

pub use config::BackupConfig;
pub use coordinator::{
    AuthorizationUrlCallback, BackupCoordinator, BackupRequest, CompletionCallback,
    CoordinatorError,
};
pub use credentials::{Credential, CredentialStore};
pub use local::{LocalBackupEngine, LocalBackupError};
pub use remote::auth::{AuthError, AuthFlow, GoogleAuthenticator, SessionState};
pub use remote::drive::DriveClient;
pub use remote::{AuthSession, RemoteError, RemoteSnapshot, RemoteStore};
pub use retention::RetentionPolicy;
pub use scheduler::{BackupStamp, Scheduler};
pub use settings::{FileSettings, SettingsStore};

use std::sync::Arc;

/// Wire the subsystem together against the real Google Drive backend.
///
/// The coordinator serves user-triggered backups; spawn
/// [`Scheduler::run`] on the host's runtime for unattended ones.
pub fn build(
    config: BackupConfig,
    settings: Arc<dyn SettingsStore>,
) -> (Arc<BackupCoordinator>, Scheduler) {
    let store = CredentialStore::new(config.credential_path.clone());
    let auth = Arc::new(GoogleAuthenticator::new(
        store,
        config.client_secret_path.clone(),
        config.request_timeout,
    ));
    let drive = Arc::new(DriveClient::new(config.request_timeout));
    let coordinator = Arc::new(BackupCoordinator::new(&config, auth, drive));
    let scheduler = Scheduler::new(&config, Arc::clone(&coordinator), settings);
    (coordinator, scheduler)
}
