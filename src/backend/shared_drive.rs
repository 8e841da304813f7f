/// Shared drive adapter (Drive v3-style HTTP API).
///
/// Downloads use `files/{id}?alt=media`; uploads use the multipart upload
/// endpoint with a JSON metadata part. The access token is issued and
/// refreshed outside the gateway; the adapter only presents it.
///
/// Transfer parameters: `file_id` for pull; `name` (and the configured
/// `root_folder`, if any) for push.
use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::multipart;
use reqwest::Client;
use serde::Deserialize;

use super::{field, require, send_err, status_err, BackendAdapter, TransferParams};
use crate::error::{GatewayError, Result};
use crate::schema::BackendKind;

const DEFAULT_API_BASE: &str = "https://www.googleapis.com";

pub struct SharedDriveAdapter {
    client: Client,
    api_base: String,
    access_token: String,
    root_folder: Option<String>,
}

/// File metadata returned by the upload endpoint.
#[derive(Debug, Deserialize)]
struct DriveFileResponse {
    id: String,
}

impl SharedDriveAdapter {
    pub fn from_fields(fields: &BTreeMap<String, String>) -> Result<Self> {
        let api_base = fields
            .get("api_base")
            .cloned()
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        let access_token = field(fields, "access_token")?.to_string();
        let root_folder = fields.get("root_folder").filter(|f| !f.is_empty()).cloned();

        Ok(Self {
            client: Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            access_token,
            root_folder,
        })
    }
}

#[async_trait]
impl BackendAdapter for SharedDriveAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::SharedDrive
    }

    async fn probe(&self) -> Result<()> {
        let resp = self
            .client
            .get(format!("{}/drive/v3/about", self.api_base))
            .bearer_auth(&self.access_token)
            .query(&[("fields", "user")])
            .send()
            .await
            .map_err(|e| send_err("shared drive probe failed", e))?;

        if !resp.status().is_success() {
            return Err(status_err("shared drive probe failed", resp).await);
        }

        Ok(())
    }

    async fn pull(&self, params: &TransferParams) -> Result<Vec<u8>> {
        let file_id = require(params, "file_id")?;

        let resp = self
            .client
            .get(format!("{}/drive/v3/files/{file_id}", self.api_base))
            .bearer_auth(&self.access_token)
            .query(&[("alt", "media")])
            .send()
            .await
            .map_err(|e| send_err("shared drive download failed", e))?;

        if !resp.status().is_success() {
            return Err(status_err("shared drive download failed", resp).await);
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| send_err("shared drive body read failed", e))?;

        Ok(bytes.to_vec())
    }

    async fn push(&self, data: &[u8], params: &TransferParams) -> Result<String> {
        let name = require(params, "name")?;

        let mut metadata = serde_json::json!({ "name": name });
        if let Some(folder) = &self.root_folder {
            metadata["parents"] = serde_json::json!([folder]);
        }

        let metadata_part = multipart::Part::text(metadata.to_string())
            .mime_str("application/json")
            .map_err(|e| GatewayError::Serialization(format!("upload metadata: {e}")))?;
        let media_part = multipart::Part::bytes(data.to_vec()).file_name(name.to_string());
        let form = multipart::Form::new()
            .part("metadata", metadata_part)
            .part("file", media_part);

        let resp = self
            .client
            .post(format!("{}/upload/drive/v3/files", self.api_base))
            .bearer_auth(&self.access_token)
            .query(&[("uploadType", "multipart"), ("fields", "id")])
            .multipart(form)
            .send()
            .await
            .map_err(|e| send_err("shared drive upload failed", e))?;

        if !resp.status().is_success() {
            return Err(status_err("shared drive upload failed", resp).await);
        }

        let file: DriveFileResponse = resp
            .json()
            .await
            .map_err(|e| GatewayError::Serialization(format!("upload response parse error: {e}")))?;

        Ok(file.id)
    }
}
