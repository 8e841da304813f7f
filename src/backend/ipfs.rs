/// IPFS node adapter via the Kubo HTTP RPC API.
///
/// Unlike the retrieval adapter, this speaks to a node you run: `add` pins
/// content locally and returns its CID, `cat` streams it back. The node
/// does not guarantee persistence beyond its own pinset.
///
/// Transfer parameters: `cid` for pull; push takes none.
use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::multipart;
use reqwest::Client;
use serde::Deserialize;

use super::{field, require, send_err, status_err, BackendAdapter, TransferParams};
use crate::error::{GatewayError, Result};
use crate::schema::BackendKind;

pub struct IpfsAdapter {
    client: Client,
    api_url: String,
}

/// Response from /api/v0/add.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AddResponse {
    hash: String,
}

impl IpfsAdapter {
    pub fn from_fields(fields: &BTreeMap<String, String>) -> Result<Self> {
        let api_url = field(fields, "api_url")?;

        Ok(Self {
            client: Client::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl BackendAdapter for IpfsAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::GenericIpfs
    }

    async fn probe(&self) -> Result<()> {
        let resp = self
            .client
            .post(format!("{}/api/v0/version", self.api_url))
            .send()
            .await
            .map_err(|e| send_err("ipfs probe failed", e))?;

        if !resp.status().is_success() {
            return Err(status_err("ipfs probe failed", resp).await);
        }

        Ok(())
    }

    /// Fetch content by CID via /api/v0/cat.
    async fn pull(&self, params: &TransferParams) -> Result<Vec<u8>> {
        let cid = require(params, "cid")?;

        let resp = self
            .client
            .post(format!("{}/api/v0/cat", self.api_url))
            .query(&[("arg", cid)])
            .send()
            .await
            .map_err(|e| send_err("ipfs cat failed", e))?;

        if !resp.status().is_success() {
            return Err(status_err("ipfs cat failed", resp).await);
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| send_err("ipfs body read failed", e))?;

        Ok(bytes.to_vec())
    }

    /// Add and pin content via /api/v0/add. The returned CID is the locator.
    async fn push(&self, data: &[u8], _params: &TransferParams) -> Result<String> {
        let part = multipart::Part::bytes(data.to_vec()).file_name("data");
        let form = multipart::Form::new().part("file", part);

        let resp = self
            .client
            .post(format!("{}/api/v0/add", self.api_url))
            .query(&[("pin", "true"), ("cid-version", "1")])
            .multipart(form)
            .send()
            .await
            .map_err(|e| send_err("ipfs add failed", e))?;

        if !resp.status().is_success() {
            return Err(status_err("ipfs add failed", resp).await);
        }

        let add: AddResponse = resp
            .json()
            .await
            .map_err(|e| GatewayError::Serialization(format!("ipfs response parse error: {e}")))?;

        Ok(add.hash)
    }
}
