//! Backup orchestration — single-flight gate, callbacks, retention cleanup.

use crate::config::BackupConfig;
use crate::local::{LocalBackupEngine, LocalBackupError};
use crate::remote::auth::{AuthError, AuthFlow, SessionState};
use crate::remote::{AuthSession, RemoteError, RemoteSnapshot, RemoteStore};
use crate::retention::RetentionPolicy;
use crate::scheduler::BackupStamp;
use chrono::Utc;
use log::{debug, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Fired exactly once per backup operation with a success flag and a
/// human-readable message the host may show verbatim.
pub type CompletionCallback = Box<dyn FnOnce(bool, String) + Send + 'static>;

/// Fired when the user must visit an authorization URL.
pub type AuthorizationUrlCallback = Box<dyn FnOnce(String) + Send + 'static>;

/// One local backup request. `silent` marks unattended (scheduled) runs;
/// the completion callback still fires, only the host's handling differs.
#[derive(Debug, Clone)]
pub struct BackupRequest {
    pub destination: PathBuf,
    pub silent: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("another backup is already in progress")]
    Busy,
    #[error("no authorization is pending")]
    NoPendingAuthorization,
    #[error("the verification code was not accepted: {0}")]
    AuthorizationRejected(String),
    #[error(transparent)]
    Local(#[from] LocalBackupError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("could not record the backup time: {0}")]
    Stamp(std::io::Error),
    #[error("backup task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Public entry points for the host. All copy/upload work runs off the
/// caller's thread, and at most one backup (local or remote) is ever in
/// flight.
pub struct BackupCoordinator {
    auth: Arc<dyn AuthFlow>,
    remote: Arc<dyn RemoteStore>,
    retention: RetentionPolicy,
    db_path: PathBuf,
    folder_name: String,
    stamp: BackupStamp,
    gate: Arc<Mutex<()>>,
    pending: std::sync::Mutex<Option<CompletionCallback>>,
}

impl BackupCoordinator {
    pub fn new(
        config: &BackupConfig,
        auth: Arc<dyn AuthFlow>,
        remote: Arc<dyn RemoteStore>,
    ) -> Self {
        Self {
            auth,
            remote,
            retention: config.retention.clone(),
            db_path: config.db_path.clone(),
            folder_name: config.drive_folder_name.clone(),
            stamp: BackupStamp::new(config.last_backup_path.clone()),
            gate: Arc::new(Mutex::new(())),
            pending: std::sync::Mutex::new(None),
        }
    }

    /// Copy the database to `request.destination` and record the backup
    /// time. Awaitable form used by the scheduler; rejects with
    /// [`CoordinatorError::Busy`] instead of queueing.
    pub async fn run_local_backup(&self, request: BackupRequest) -> Result<PathBuf, CoordinatorError> {
        let _guard = self.gate.try_lock().map_err(|_| CoordinatorError::Busy)?;

        let source = self.db_path.clone();
        let destination = request.destination.clone();
        let written =
            tokio::task::spawn_blocking(move || LocalBackupEngine::copy(&source, &destination))
                .await??;

        self.stamp
            .save(Utc::now())
            .map_err(CoordinatorError::Stamp)?;
        Ok(written)
    }

    /// Back up locally in the background; `on_complete` always fires once.
    pub fn backup_locally(self: &Arc<Self>, request: BackupRequest, on_complete: CompletionCallback) {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            let silent = request.silent;
            let (success, message) = match coordinator.run_local_backup(request).await {
                Ok(path) => (
                    true,
                    format!("Database saved locally to {}", path.display()),
                ),
                Err(e) => (false, format!("Local backup failed: {e}")),
            };
            if success {
                info!("local backup finished (silent: {silent})");
            } else {
                warn!("{message}");
            }
            on_complete(success, message);
        });
    }

    /// Back up to the cloud drive in the background.
    ///
    /// If no usable credential exists, `on_authorization_url` is invoked
    /// and the upload is deferred until
    /// [`complete_authorization_and_retry`](Self::complete_authorization_and_retry)
    /// delivers a verification code; `on_complete` is held back until
    /// then. The single-flight gate is not held while waiting for the
    /// human, so scheduled local backups keep running.
    pub fn backup_remotely(
        self: &Arc<Self>,
        on_authorization_url: AuthorizationUrlCallback,
        on_complete: CompletionCallback,
    ) {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            let guard = match coordinator.gate.clone().try_lock_owned() {
                Ok(guard) => guard,
                Err(_) => {
                    on_complete(
                        false,
                        "Another backup is already in progress, try again in a moment".to_string(),
                    );
                    return;
                }
            };

            // The gate is released while a verification code is awaited,
            // so a deferred backup must be rejected here; replacing it
            // would drop its completion callback unfired.
            if coordinator.has_pending() {
                drop(guard);
                on_complete(
                    false,
                    "A cloud backup is already waiting for its verification code".to_string(),
                );
                return;
            }

            match coordinator.auth.ensure_session().await {
                Ok(SessionState::Ready(session)) => {
                    let (success, message) = coordinator.run_remote_pipeline(&session).await;
                    drop(guard);
                    on_complete(success, message);
                }
                Ok(SessionState::AuthorizationRequired(url)) => {
                    coordinator.stash_pending(on_complete);
                    drop(guard);
                    debug!("awaiting verification code from the user");
                    on_authorization_url(url);
                }
                Err(e) => {
                    drop(guard);
                    on_complete(false, format!("Could not connect to the cloud drive: {e}"));
                }
            }
        });
    }

    /// Exchange the user-supplied verification code and run the deferred
    /// upload.
    ///
    /// A rejected code returns [`CoordinatorError::AuthorizationRejected`]
    /// and keeps the pending backup alive so the host can prompt for
    /// re-entry; any other failure is delivered through the stashed
    /// completion callback.
    pub async fn complete_authorization_and_retry(
        &self,
        code: &str,
    ) -> Result<(), CoordinatorError> {
        if !self.has_pending() {
            return Err(CoordinatorError::NoPendingAuthorization);
        }

        let session = match self.auth.complete_authorization(code).await {
            Ok(session) => session,
            Err(AuthError::AuthorizationFailed(reason)) => {
                warn!("verification code rejected, keeping the backup pending");
                return Err(CoordinatorError::AuthorizationRejected(reason));
            }
            Err(e) => {
                if let Some(on_complete) = self.take_pending() {
                    on_complete(false, format!("Could not connect to the cloud drive: {e}"));
                }
                return Ok(());
            }
        };

        let guard = self.gate.lock().await;
        let Some(on_complete) = self.take_pending() else {
            return Err(CoordinatorError::NoPendingAuthorization);
        };
        let (success, message) = self.run_remote_pipeline(&session).await;
        drop(guard);
        on_complete(success, message);
        Ok(())
    }

    async fn run_remote_pipeline(&self, session: &AuthSession) -> (bool, String) {
        match self.upload_and_clean(session).await {
            Ok(snapshot) => (
                true,
                format!("Database uploaded to the cloud drive as {}", snapshot.name),
            ),
            Err(e) => (false, format!("Cloud backup failed: {e}")),
        }
    }

    /// Folder lookup, upload, then retention cleanup. Cleanup is
    /// best-effort: the upload already succeeded, so listing or delete
    /// failures are logged and never fail the backup.
    async fn upload_and_clean(
        &self,
        session: &AuthSession,
    ) -> Result<RemoteSnapshot, CoordinatorError> {
        let folder_id = self
            .remote
            .get_or_create_folder(session, &self.folder_name)
            .await?;
        let snapshot = self.remote.upload(session, &folder_id, &self.db_path).await?;

        match self.remote.list_snapshots(session, &folder_id).await {
            Ok(snapshots) => {
                let doomed = self.retention.select_for_deletion(&snapshots, Utc::now());
                for old in &doomed {
                    match self.remote.delete(session, &old.id).await {
                        Ok(()) => info!("retention: deleted old snapshot {}", old.name),
                        Err(e) => warn!("retention: could not delete {}: {e}", old.name),
                    }
                }
            }
            Err(e) => warn!("retention: skipped, snapshot listing failed: {e}"),
        }

        Ok(snapshot)
    }

    fn has_pending(&self) -> bool {
        self.pending
            .lock()
            .map(|p| p.is_some())
            .unwrap_or(false)
    }

    fn stash_pending(&self, on_complete: CompletionCallback) {
        if let Ok(mut pending) = self.pending.lock() {
            *pending = Some(on_complete);
        }
    }

    fn take_pending(&self) -> Option<CompletionCallback> {
        self.pending.lock().ok().and_then(|mut p| p.take())
    }
}
