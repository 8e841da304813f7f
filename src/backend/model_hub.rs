/// Model hub adapter (HuggingFace-style HTTP API).
///
/// Pulls individual files out of a model or dataset repository via the
/// hub's `resolve` URLs, which follow redirects to the storage tier.
/// Hubs are a distribution channel, not a drop box: `push` is a permanent
/// capability error rather than a half-working upload.
///
/// Transfer parameters: `repo` (e.g. "org/model"), `path` (file within the
/// repo), optional `revision` (branch, tag, or commit; defaults to "main").
use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::Client;

use super::{require, send_err, status_err, BackendAdapter, TransferParams};
use crate::error::{GatewayError, Result};
use crate::schema::BackendKind;

const DEFAULT_ENDPOINT: &str = "https://huggingface.co";

pub struct ModelHubAdapter {
    client: Client,
    endpoint: String,
    token: Option<String>,
}

impl ModelHubAdapter {
    pub fn from_fields(fields: &BTreeMap<String, String>) -> Result<Self> {
        let endpoint = fields
            .get("endpoint")
            .cloned()
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        let token = fields.get("token").filter(|t| !t.is_empty()).cloned();

        Ok(Self {
            client: Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

#[async_trait]
impl BackendAdapter for ModelHubAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::ModelHub
    }

    async fn probe(&self) -> Result<()> {
        let resp = self
            .authed(self.client.get(format!("{}/api/models", self.endpoint)))
            .query(&[("limit", "1")])
            .send()
            .await
            .map_err(|e| send_err("model hub probe failed", e))?;

        if !resp.status().is_success() {
            return Err(status_err("model hub probe failed", resp).await);
        }

        Ok(())
    }

    async fn pull(&self, params: &TransferParams) -> Result<Vec<u8>> {
        let repo = require(params, "repo")?;
        let path = require(params, "path")?;
        let revision = params
            .get("revision")
            .map(String::as_str)
            .unwrap_or("main");

        let url = format!("{}/{repo}/resolve/{revision}/{path}", self.endpoint);
        let resp = self
            .authed(self.client.get(url))
            .send()
            .await
            .map_err(|e| send_err("model hub download failed", e))?;

        if !resp.status().is_success() {
            return Err(status_err("model hub download failed", resp).await);
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| send_err("model hub body read failed", e))?;

        Ok(bytes.to_vec())
    }

    async fn push(&self, _data: &[u8], _params: &TransferParams) -> Result<String> {
        Err(GatewayError::backend_permanent(
            "model hub backend is read-only: push is not supported",
        ))
    }
}
