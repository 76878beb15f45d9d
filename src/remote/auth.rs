//! Out-of-band OAuth device flow against the Google token endpoint.
//!
//! The user opens the authorization URL on any device, approves access,
//! and types the verification code back into the application — no
//! redirect listener is involved.

use crate::credentials::{Credential, CredentialStore};
use crate::remote::AuthSession;
use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info, warn};
use reqwest::{Client, Url};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Mutex;

/// Only the per-file Drive scope is requested; the app never sees the
/// rest of the user's drive.
pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive.file";

const OOB_REDIRECT_URI: &str = "urn:ietf:wg:oauth:2.0:oob";

/// Refresh this long before the provider-reported expiry, so a token
/// handed to an upload does not lapse mid-request.
const EXPIRY_SKEW_SECS: i64 = 60;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("client secret file unusable at {path}: {reason}")]
    ClientSecret { path: PathBuf, reason: String },
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("authorization failed: {0}")]
    AuthorizationFailed(String),
    #[error("token endpoint error: {0}")]
    TokenEndpoint(String),
    #[error("invalid authorization endpoint: {0}")]
    BadEndpoint(String),
}

/// Outcome of asking for a usable session.
pub enum SessionState {
    /// A valid (possibly silently refreshed) credential was available.
    Ready(AuthSession),
    /// The human must visit this URL and bring back a verification code.
    AuthorizationRequired(String),
}

/// Seam the coordinator talks through; implemented by
/// [`GoogleAuthenticator`] and by in-memory fakes in tests.
#[async_trait]
pub trait AuthFlow: Send + Sync {
    async fn ensure_session(&self) -> Result<SessionState, AuthError>;
    async fn complete_authorization(&self, code: &str) -> Result<AuthSession, AuthError>;
}

/// OAuth client registration in Google's standard JSON shape.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecret {
    pub installed: InstalledClient,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstalledClient {
    pub client_id: String,
    pub client_secret: String,
    pub auth_uri: String,
    pub token_uri: String,
}

impl ClientSecret {
    /// Load from disk. Read once per authorization attempt; never cached
    /// across attempts so a corrected file takes effect immediately.
    pub fn load(path: &std::path::Path) -> Result<Self, AuthError> {
        let json = std::fs::read_to_string(path).map_err(|e| AuthError::ClientSecret {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&json).map_err(|e| AuthError::ClientSecret {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
    refresh_token: Option<String>,
    scope: Option<String>,
}

/// Build the URL the user must visit to approve access.
pub fn authorization_url(secret: &ClientSecret) -> Result<String, AuthError> {
    let url = Url::parse_with_params(
        &secret.installed.auth_uri,
        &[
            ("client_id", secret.installed.client_id.as_str()),
            ("redirect_uri", OOB_REDIRECT_URI),
            ("response_type", "code"),
            ("scope", DRIVE_SCOPE),
            ("access_type", "offline"),
            ("include_granted_scopes", "true"),
            ("prompt", "consent"),
        ],
    )
    .map_err(|e| AuthError::BadEndpoint(format!("{}: {e}", secret.installed.auth_uri)))?;
    Ok(url.into())
}

/// Drives the state machine NoCredential → AwaitingUserCode →
/// Authenticated, with silent refresh on expiry and fallback to a fresh
/// grant when the refresh token is revoked.
pub struct GoogleAuthenticator {
    store: CredentialStore,
    client_secret_path: PathBuf,
    http: Client,
    cached: Mutex<Option<Credential>>,
}

impl GoogleAuthenticator {
    pub fn new(
        store: CredentialStore,
        client_secret_path: PathBuf,
        request_timeout: Duration,
    ) -> Self {
        let http = Client::builder()
            .timeout(request_timeout)
            .build()
            .unwrap_or_default();
        Self {
            store,
            client_secret_path,
            http,
            cached: Mutex::new(None),
        }
    }

    async fn refresh(
        &self,
        secret: &ClientSecret,
        refresh_token: &str,
    ) -> Result<Credential, AuthError> {
        let response = self
            .http
            .post(&secret.installed.token_uri)
            .form(&[
                ("client_id", secret.installed.client_id.as_str()),
                ("client_secret", secret.installed.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::TokenEndpoint(format!("HTTP {status}: {body}")));
        }

        let token: TokenResponse = response.json().await?;
        Ok(credential_from_token(token, Some(refresh_token)))
    }
}

fn credential_from_token(token: TokenResponse, previous_refresh: Option<&str>) -> Credential {
    Credential {
        access_token: token.access_token,
        // Google omits the refresh token on refresh responses; keep the
        // one we already hold.
        refresh_token: token
            .refresh_token
            .or_else(|| previous_refresh.map(str::to_string)),
        expiry: Utc::now() + chrono::Duration::seconds(token.expires_in - EXPIRY_SKEW_SECS),
        scope: token.scope.unwrap_or_else(|| DRIVE_SCOPE.to_string()),
    }
}

#[async_trait]
impl AuthFlow for GoogleAuthenticator {
    async fn ensure_session(&self) -> Result<SessionState, AuthError> {
        let mut cached = self.cached.lock().await;
        if cached.is_none() {
            *cached = self.store.load();
        }

        if let Some(credential) = cached.as_ref() {
            if !credential.is_expired(Utc::now()) {
                debug!("reusing persisted credential, no user interaction needed");
                return Ok(SessionState::Ready(AuthSession {
                    access_token: credential.access_token.clone(),
                }));
            }
        }

        let secret = ClientSecret::load(&self.client_secret_path)?;

        if let Some(refresh_token) = cached
            .as_ref()
            .and_then(|c| c.refresh_token.clone())
        {
            match self.refresh(&secret, &refresh_token).await {
                Ok(refreshed) => {
                    if let Err(e) = self.store.save(&refreshed) {
                        warn!("refreshed credential could not be persisted: {e}");
                    }
                    let session = AuthSession {
                        access_token: refreshed.access_token.clone(),
                    };
                    *cached = Some(refreshed);
                    info!("access token refreshed silently");
                    return Ok(SessionState::Ready(session));
                }
                Err(e) => {
                    // Revoked grant or network trouble; fall back to a
                    // fresh device-flow authorization.
                    warn!("token refresh failed, requesting a new grant: {e}");
                    *cached = None;
                }
            }
        }

        Ok(SessionState::AuthorizationRequired(authorization_url(
            &secret,
        )?))
    }

    async fn complete_authorization(&self, code: &str) -> Result<AuthSession, AuthError> {
        let secret = ClientSecret::load(&self.client_secret_path)?;

        let response = self
            .http
            .post(&secret.installed.token_uri)
            .form(&[
                ("client_id", secret.installed.client_id.as_str()),
                ("client_secret", secret.installed.client_secret.as_str()),
                ("code", code),
                ("redirect_uri", OOB_REDIRECT_URI),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await?;

        if response.status().is_client_error() {
            // A rejected or expired verification code; the host should
            // re-prompt rather than abort the backup.
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::AuthorizationFailed(body));
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::TokenEndpoint(format!("HTTP {status}: {body}")));
        }

        let token: TokenResponse = response.json().await?;
        let credential = credential_from_token(token, None);
        if let Err(e) = self.store.save(&credential) {
            warn!("new credential could not be persisted: {e}");
        }

        let session = AuthSession {
            access_token: credential.access_token.clone(),
        };
        *self.cached.lock().await = Some(credential);
        info!("device-flow authorization completed");
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SECRET_JSON: &str = r#"{
        "installed": {
            "client_id": "abc123.apps.googleusercontent.com",
            "client_secret": "shhh",
            "auth_uri": "https://accounts.google.com/o/oauth2/auth",
            "token_uri": "https://oauth2.googleapis.com/token"
        }
    }"#;

    fn secret() -> ClientSecret {
        serde_json::from_str(SECRET_JSON).unwrap()
    }

    #[test]
    fn test_client_secret_parses_google_shape() {
        let secret = secret();
        assert_eq!(secret.installed.client_id, "abc123.apps.googleusercontent.com");
        assert_eq!(secret.installed.token_uri, "https://oauth2.googleapis.com/token");
    }

    #[test]
    fn test_client_secret_load_reports_missing_file() {
        let tmp = TempDir::new().unwrap();
        let result = ClientSecret::load(&tmp.path().join("credentials.json"));
        assert!(matches!(result, Err(AuthError::ClientSecret { .. })));
    }

    #[test]
    fn test_authorization_url_requests_offline_oob_access() {
        let url = authorization_url(&secret()).unwrap();
        assert!(url.starts_with("https://accounts.google.com/o/oauth2/auth?"));
        assert!(url.contains("client_id=abc123.apps.googleusercontent.com"));
        assert!(url.contains("redirect_uri=urn%3Aietf%3Awg%3Aoauth%3A2.0%3Aoob"));
        assert!(url.contains("access_type=offline"));
        assert!(url.contains("prompt=consent"));
        assert!(url.contains("drive.file"));
    }

    #[test]
    fn test_refresh_response_keeps_previous_refresh_token() {
        let token = TokenResponse {
            access_token: "new-access".into(),
            expires_in: 3600,
            refresh_token: None,
            scope: None,
        };
        let credential = credential_from_token(token, Some("old-refresh"));
        assert_eq!(credential.refresh_token.as_deref(), Some("old-refresh"));
        assert!(!credential.is_expired(Utc::now()));
        assert!(credential.is_expired(Utc::now() + chrono::Duration::seconds(3600)));
    }

    #[tokio::test]
    async fn test_ensure_session_reuses_unexpired_credential_without_secret_file() {
        let tmp = TempDir::new().unwrap();
        let store = CredentialStore::new(tmp.path().join("token.json"));
        store
            .save(&Credential {
                access_token: "cached-token".into(),
                refresh_token: None,
                expiry: Utc::now() + chrono::Duration::hours(1),
                scope: DRIVE_SCOPE.into(),
            })
            .unwrap();

        // No client secret file exists; a valid credential must not need it.
        let auth = GoogleAuthenticator::new(
            store,
            tmp.path().join("credentials.json"),
            Duration::from_secs(5),
        );
        match auth.ensure_session().await.unwrap() {
            SessionState::Ready(session) => assert_eq!(session.access_token, "cached-token"),
            SessionState::AuthorizationRequired(_) => panic!("expected a ready session"),
        }
    }

    #[tokio::test]
    async fn test_ensure_session_without_credential_asks_for_authorization() {
        let tmp = TempDir::new().unwrap();
        let secret_path = tmp.path().join("credentials.json");
        std::fs::write(&secret_path, SECRET_JSON).unwrap();

        let auth = GoogleAuthenticator::new(
            CredentialStore::new(tmp.path().join("token.json")),
            secret_path,
            Duration::from_secs(5),
        );
        match auth.ensure_session().await.unwrap() {
            SessionState::AuthorizationRequired(url) => {
                assert!(url.contains("accounts.google.com"))
            }
            SessionState::Ready(_) => panic!("expected an authorization request"),
        }
    }
}
