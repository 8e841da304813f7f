/// S3-compatible object store adapter.
///
/// Covers AWS S3 itself and the long tail of S3-compatible services
/// (MinIO, Storj gateways, Ceph RGW). Path-style addressing is forced so
/// custom endpoints work without wildcard DNS.
///
/// Transfer parameters: `key` (object key within the configured bucket).
use std::collections::BTreeMap;

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder as S3ConfigBuilder, Region};
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;

use super::{field, require, BackendAdapter, TransferParams};
use crate::error::{GatewayError, Result};
use crate::schema::BackendKind;

pub struct ObjectStoreAdapter {
    client: S3Client,
    bucket: String,
}

impl ObjectStoreAdapter {
    pub fn from_fields(fields: &BTreeMap<String, String>) -> Result<Self> {
        let endpoint = field(fields, "endpoint")?;
        let bucket = field(fields, "bucket")?;
        let access_key = field(fields, "access_key")?;
        let secret_key = fields.get("secret_key").map(String::as_str).unwrap_or("");
        let region = fields
            .get("region")
            .cloned()
            .unwrap_or_else(|| "us-east-1".to_string());

        let credentials = Credentials::new(access_key, secret_key, None, None, "cidgate");

        let config = S3ConfigBuilder::new()
            .endpoint_url(endpoint)
            .region(Region::new(region))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Ok(Self {
            client: S3Client::from_conf(config),
            bucket: bucket.to_string(),
        })
    }
}

/// Classify an SDK failure: transport-level problems are transient, service
/// responses are judged by their status class.
fn s3_err<E>(context: &str, e: SdkError<E>) -> GatewayError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let transient = match &e {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            true
        }
        SdkError::ServiceError(ctx) => {
            let status = ctx.raw().status().as_u16();
            status == 429 || status >= 500
        }
        _ => false,
    };
    let message = format!("{context}: {e}");
    GatewayError::Backend { message, transient }
}

#[async_trait]
impl BackendAdapter for ObjectStoreAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::ObjectStore
    }

    async fn probe(&self) -> Result<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| s3_err("object store probe failed", e))?;

        Ok(())
    }

    async fn pull(&self, params: &TransferParams) -> Result<Vec<u8>> {
        let key = require(params, "key")?;

        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| s3_err("object store get failed", e))?;

        let bytes = resp
            .body
            .collect()
            .await
            .map_err(|e| GatewayError::backend_transient(format!("object body read failed: {e}")))?
            .into_bytes();

        Ok(bytes.to_vec())
    }

    async fn push(&self, data: &[u8], params: &TransferParams) -> Result<String> {
        let key = require(params, "key")?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data.to_vec()))
            .content_length(data.len() as i64)
            .send()
            .await
            .map_err(|e| s3_err("object store put failed", e))?;

        Ok(format!("s3://{}/{key}", self.bucket))
    }
}
