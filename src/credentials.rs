//! Persisted OAuth credential blob and its on-disk store.

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Tokens granted by the remote provider.
///
/// A credential with an unexpired access token is usable without any
/// network round-trip; an expired one can be refreshed silently if a
/// refresh token is present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expiry: DateTime<Utc>,
    pub scope: String,
}

impl Credential {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiry
    }

    pub fn can_refresh(&self) -> bool {
        self.refresh_token.is_some()
    }
}

/// Loads and saves the credential blob at a fixed writable location.
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Load the persisted credential. A missing or unparsable file is a
    /// recoverable "no credential yet" condition, not an error.
    pub fn load(&self) -> Option<Credential> {
        let json = match fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(_) => {
                debug!("no credential blob at {}", self.path.display());
                return None;
            }
        };
        match serde_json::from_str(&json) {
            Ok(credential) => Some(credential),
            Err(e) => {
                warn!("ignoring unparsable credential blob: {e}");
                None
            }
        }
    }

    /// Persist the credential atomically: write a temp file next to the
    /// target and rename it into place, so a crash mid-write never
    /// corrupts the previously good blob.
    pub fn save(&self, credential: &Credential) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(credential)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        debug!("credential blob saved to {}", self.path.display());
        Ok(())
    }
}
