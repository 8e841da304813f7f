/// Generic HTTP object gateway adapter.
///
/// Objects are addressed by path under a base URL: GET to pull, PUT to
/// push. Covers plain blob gateways, WebDAV-ish stores, and internal
/// services that expose content at stable paths.
///
/// Transfer parameters: `path` (object path relative to the base URL).
use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::Client;

use super::{field, require, send_err, status_err, BackendAdapter, TransferParams};
use crate::error::Result;
use crate::schema::BackendKind;

pub struct GatewayAdapter {
    client: Client,
    base_url: String,
    auth_token: Option<String>,
}

impl GatewayAdapter {
    pub fn from_fields(fields: &BTreeMap<String, String>) -> Result<Self> {
        let base_url = field(fields, "base_url")?;
        let auth_token = fields.get("auth_token").filter(|t| !t.is_empty()).cloned();

        Ok(Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token,
        })
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    fn object_url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl BackendAdapter for GatewayAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Gateway
    }

    async fn probe(&self) -> Result<()> {
        let resp = self
            .authed(self.client.head(&self.base_url))
            .send()
            .await
            .map_err(|e| send_err("gateway probe failed", e))?;

        // Any response proves reachability; the root may well 404.
        if resp.status().is_server_error() {
            return Err(status_err("gateway probe failed", resp).await);
        }

        Ok(())
    }

    async fn pull(&self, params: &TransferParams) -> Result<Vec<u8>> {
        let path = require(params, "path")?;

        let resp = self
            .authed(self.client.get(self.object_url(path)))
            .send()
            .await
            .map_err(|e| send_err("gateway download failed", e))?;

        if !resp.status().is_success() {
            return Err(status_err("gateway download failed", resp).await);
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| send_err("gateway body read failed", e))?;

        Ok(bytes.to_vec())
    }

    async fn push(&self, data: &[u8], params: &TransferParams) -> Result<String> {
        let path = require(params, "path")?;

        let resp = self
            .authed(self.client.put(self.object_url(path)))
            .header("Content-Type", "application/octet-stream")
            .body(data.to_vec())
            .send()
            .await
            .map_err(|e| send_err("gateway upload failed", e))?;

        if !resp.status().is_success() {
            return Err(status_err("gateway upload failed", resp).await);
        }

        Ok(path.to_string())
    }
}
