//! Google Drive v3 client — folder lookup, snapshot upload, list, delete.

use super::{
    is_snapshot_name, snapshot_name, AuthSession, RemoteError, RemoteResult, RemoteSnapshot,
    RemoteStore, SNAPSHOT_PREFIX,
};
use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info};
use reqwest::{Client, Response};
use std::path::Path;
use std::time::Duration;

const DEFAULT_API_BASE: &str = "https://www.googleapis.com";
const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
const SNAPSHOT_MIME: &str = "application/octet-stream";

pub struct DriveClient {
    http: Client,
    api_base: String,
    upload_base: String,
}

#[derive(serde::Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    #[serde(default)]
    name: String,
    modified_time: Option<chrono::DateTime<Utc>>,
}

impl DriveClient {
    pub fn new(request_timeout: Duration) -> Self {
        Self::with_base(request_timeout, DEFAULT_API_BASE, DEFAULT_API_BASE)
    }

    /// Point the client at a different API host (used by tests).
    pub fn with_base(request_timeout: Duration, api_base: &str, upload_base: &str) -> Self {
        let http = Client::builder()
            .timeout(request_timeout)
            .build()
            .unwrap_or_default();
        Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            upload_base: upload_base.trim_end_matches('/').to_string(),
        }
    }

    async fn checked(response: Response) -> RemoteResult<Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(RemoteError::Api(format!("HTTP {status}: {body}")))
    }

    async fn list_files(&self, session: &AuthSession, query: &str) -> RemoteResult<Vec<DriveFile>> {
        let response = self
            .http
            .get(format!("{}/drive/v3/files", self.api_base))
            .bearer_auth(&session.access_token)
            .query(&[
                ("q", query),
                ("spaces", "drive"),
                ("fields", "files(id, name, modifiedTime)"),
            ])
            .send()
            .await?;
        let list: FileList = Self::checked(response).await?.json().await?;
        Ok(list.files)
    }
}

/// Drive search term for the backup folder itself.
fn folder_query(name: &str) -> String {
    format!(
        "name = '{}' and mimeType = '{FOLDER_MIME}' and trashed = false",
        name.replace('\'', "\\'")
    )
}

/// Drive search term for snapshots inside the backup folder.
fn snapshot_query(folder_id: &str) -> String {
    format!(
        "'{}' in parents and name contains '{SNAPSHOT_PREFIX}' and trashed = false",
        folder_id.replace('\'', "\\'")
    )
}

#[async_trait]
impl RemoteStore for DriveClient {
    async fn get_or_create_folder(
        &self,
        session: &AuthSession,
        name: &str,
    ) -> RemoteResult<String> {
        // Check-then-create; retries must not pile up duplicate folders.
        let existing = self.list_files(session, &folder_query(name)).await?;
        if let Some(folder) = existing.into_iter().next() {
            debug!("found backup folder '{name}' ({})", folder.id);
            return Ok(folder.id);
        }

        let response = self
            .http
            .post(format!("{}/drive/v3/files", self.api_base))
            .bearer_auth(&session.access_token)
            .query(&[("fields", "id")])
            .json(&serde_json::json!({ "name": name, "mimeType": FOLDER_MIME }))
            .send()
            .await?;
        let created: DriveFile = Self::checked(response).await?.json().await?;
        info!("created backup folder '{name}' ({})", created.id);
        Ok(created.id)
    }

    async fn upload(
        &self,
        session: &AuthSession,
        folder_id: &str,
        local_path: &Path,
    ) -> RemoteResult<RemoteSnapshot> {
        // Re-check at call time; the file may have moved since the caller
        // last looked.
        if !local_path.is_file() {
            return Err(RemoteError::MissingSource(local_path.to_path_buf()));
        }
        let bytes = tokio::fs::read(local_path).await?;
        let name = snapshot_name(Utc::now());

        // Resumable upload: initiate with the metadata, then send the bytes
        // to the session URI Drive hands back.
        let initiate = self
            .http
            .post(format!(
                "{}/upload/drive/v3/files?uploadType=resumable",
                self.upload_base
            ))
            .bearer_auth(&session.access_token)
            .header("X-Upload-Content-Type", SNAPSHOT_MIME)
            .json(&serde_json::json!({ "name": name, "parents": [folder_id] }))
            .send()
            .await?;
        let initiate = Self::checked(initiate).await?;
        let upload_uri = initiate
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                RemoteError::Api("upload initiation returned no session URI".to_string())
            })?;

        let byte_count = bytes.len();
        let response = self
            .http
            .put(&upload_uri)
            .bearer_auth(&session.access_token)
            .header(reqwest::header::CONTENT_TYPE, SNAPSHOT_MIME)
            .query(&[("fields", "id, name, modifiedTime")])
            .body(bytes)
            .send()
            .await?;
        let uploaded: DriveFile = Self::checked(response).await?.json().await?;

        info!("uploaded snapshot '{}' ({} bytes)", name, byte_count);
        Ok(RemoteSnapshot {
            id: uploaded.id,
            name: if uploaded.name.is_empty() {
                name
            } else {
                uploaded.name
            },
            modified_time: uploaded.modified_time.unwrap_or_else(Utc::now),
        })
    }

    async fn list_snapshots(
        &self,
        session: &AuthSession,
        folder_id: &str,
    ) -> RemoteResult<Vec<RemoteSnapshot>> {
        let files = self.list_files(session, &snapshot_query(folder_id)).await?;
        Ok(files
            .into_iter()
            .filter(|f| is_snapshot_name(&f.name))
            .map(|f| RemoteSnapshot {
                id: f.id,
                name: f.name,
                modified_time: f.modified_time.unwrap_or_else(Utc::now),
            })
            .collect())
    }

    async fn delete(&self, session: &AuthSession, snapshot_id: &str) -> RemoteResult<()> {
        let response = self
            .http
            .delete(format!("{}/drive/v3/files/{snapshot_id}", self.api_base))
            .bearer_auth(&session.access_token)
            .send()
            .await?;
        Self::checked(response).await?;
        debug!("deleted snapshot {snapshot_id}");
        Ok(())
    }
}
