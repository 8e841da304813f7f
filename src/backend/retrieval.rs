/// Decentralized retrieval network adapter.
///
/// Reads go through a trustless HTTP gateway (`/ipfs/{cid}` path
/// convention); writes go through an optional bridge endpoint that accepts
/// raw bytes and answers with the CID it pinned. Without a bridge the
/// backend is retrieval-only.
///
/// Transfer parameters: `cid` for pull; push takes none (the network names
/// content by its hash).
use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{field, require, send_err, status_err, BackendAdapter, TransferParams};
use crate::error::{GatewayError, Result};
use crate::schema::BackendKind;

pub struct RetrievalAdapter {
    client: Client,
    gateway_url: String,
    api_url: Option<String>,
    auth_token: Option<String>,
}

/// Bridge upload response.
#[derive(Debug, Deserialize)]
struct UploadResponse {
    cid: String,
}

impl RetrievalAdapter {
    pub fn from_fields(fields: &BTreeMap<String, String>) -> Result<Self> {
        let gateway_url = field(fields, "gateway_url")?;
        let api_url = fields
            .get("api_url")
            .filter(|u| !u.is_empty())
            .map(|u| u.trim_end_matches('/').to_string());
        let auth_token = fields.get("auth_token").filter(|t| !t.is_empty()).cloned();

        Ok(Self {
            client: Client::new(),
            gateway_url: gateway_url.trim_end_matches('/').to_string(),
            api_url,
            auth_token,
        })
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

#[async_trait]
impl BackendAdapter for RetrievalAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::DecentralizedRetrieval
    }

    async fn probe(&self) -> Result<()> {
        let resp = self
            .client
            .head(&self.gateway_url)
            .send()
            .await
            .map_err(|e| send_err("retrieval gateway probe failed", e))?;

        if resp.status().is_server_error() {
            return Err(status_err("retrieval gateway probe failed", resp).await);
        }

        Ok(())
    }

    async fn pull(&self, params: &TransferParams) -> Result<Vec<u8>> {
        let cid = require(params, "cid")?;

        let resp = self
            .client
            .get(format!("{}/ipfs/{cid}", self.gateway_url))
            .send()
            .await
            .map_err(|e| send_err("retrieval download failed", e))?;

        if !resp.status().is_success() {
            return Err(status_err("retrieval download failed", resp).await);
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| send_err("retrieval body read failed", e))?;

        Ok(bytes.to_vec())
    }

    async fn push(&self, data: &[u8], _params: &TransferParams) -> Result<String> {
        let Some(api_url) = &self.api_url else {
            return Err(GatewayError::backend_permanent(
                "retrieval backend has no upload bridge configured: push is not supported",
            ));
        };

        let resp = self
            .authed(self.client.post(format!("{api_url}/upload")))
            .header("Content-Type", "application/octet-stream")
            .body(data.to_vec())
            .send()
            .await
            .map_err(|e| send_err("retrieval upload failed", e))?;

        if !resp.status().is_success() {
            return Err(status_err("retrieval upload failed", resp).await);
        }

        let upload: UploadResponse = resp
            .json()
            .await
            .map_err(|e| GatewayError::Serialization(format!("upload response parse error: {e}")))?;

        Ok(upload.cid)
    }
}
