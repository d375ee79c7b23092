//! HTTP client for the bucket gateway multipart routes

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::{CompletedObject, ObjectStore};
use crate::config::Config;
use crate::error::{UploadError, UploadResult};
use crate::ledger::CompletedPart;

/// User-Agent header value
const USER_AGENT: &str = concat!("partwise/", env!("CARGO_PKG_VERSION"));

/// Encode an object key the way the gateway expects it: base64 of the UTF-8
/// key, without a leading slash
pub fn encode_key(key: &str) -> String {
    let key = if key != "/" {
        key.strip_prefix('/').unwrap_or(key)
    } else {
        key
    };
    general_purpose::STANDARD.encode(key.as_bytes())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HttpMetadata<'a> {
    content_type: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateUploadResponse {
    upload_id: String,
}

#[derive(Debug, Deserialize)]
struct UploadPartResponse {
    #[serde(default)]
    etag: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CompleteUploadRequest<'a> {
    key: String,
    upload_id: &'a str,
    parts: &'a [CompletedPart],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AbortUploadRequest<'a> {
    key: String,
    upload_id: &'a str,
}

/// Object store reached through `{base_url}/buckets/{bucket}/multipart/*`
#[derive(Debug, Clone)]
pub struct HttpObjectStore {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpObjectStore {
    pub fn new(config: &Config) -> UploadResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self::with_client(
            client,
            config.base_url.clone(),
            config.token.clone(),
        ))
    }

    pub fn with_client(client: Client, base_url: String, token: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, bucket: &str, action: &str) -> String {
        format!("{}/buckets/{}/multipart/{}", self.base_url, bucket, action)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("User-Agent", USER_AGENT)
            .header("x-request-id", Uuid::new_v4().to_string())
            .header("Authorization", format!("Bearer {}", self.token))
    }

    async fn send(&self, request: RequestBuilder) -> UploadResult<Response> {
        let response = self.authorized(request).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(UploadError::http(status.as_u16(), body))
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn create_multipart(
        &self,
        namespace: &str,
        key: &str,
        content_type: &str,
    ) -> UploadResult<String> {
        let metadata = serde_json::to_string(&HttpMetadata { content_type })
            .map_err(|e| UploadError::InvalidResponse(e.to_string()))?;
        let request = self.client.post(self.endpoint(namespace, "create")).query(&[
            ("key", encode_key(key)),
            ("httpMetadata", general_purpose::STANDARD.encode(metadata)),
        ]);

        let response: CreateUploadResponse = self.send(request).await?.json().await?;
        if response.upload_id.is_empty() {
            return Err(UploadError::InvalidResponse(
                "create returned an empty upload id".to_string(),
            ));
        }

        debug!("Created multipart upload {} for {}", response.upload_id, key);
        Ok(response.upload_id)
    }

    async fn upload_part(
        &self,
        upload_id: &str,
        namespace: &str,
        key: &str,
        part_number: u32,
        body: Bytes,
    ) -> UploadResult<String> {
        let request = self
            .client
            .post(self.endpoint(namespace, "upload"))
            .query(&[
                ("key", encode_key(key)),
                ("uploadId", upload_id.to_string()),
                ("partNumber", part_number.to_string()),
            ])
            .header("Content-Type", "application/octet-stream")
            .body(body);

        let response: UploadPartResponse = self.send(request).await?.json().await?;
        if response.etag.is_empty() {
            return Err(UploadError::InvalidResponse(format!(
                "part {} returned no etag",
                part_number
            )));
        }
        Ok(response.etag)
    }

    async fn complete_multipart(
        &self,
        upload_id: &str,
        namespace: &str,
        key: &str,
        parts: &[CompletedPart],
    ) -> UploadResult<CompletedObject> {
        let payload = CompleteUploadRequest {
            key: encode_key(key),
            upload_id,
            parts,
        };
        let request = self
            .client
            .post(self.endpoint(namespace, "complete"))
            .json(&payload);

        let mut object: CompletedObject = self.send(request).await?.json().await?;
        if object.key.is_empty() {
            object.key = key.to_string();
        }
        Ok(object)
    }

    async fn abort_multipart(
        &self,
        upload_id: &str,
        namespace: &str,
        key: &str,
    ) -> UploadResult<()> {
        let payload = AbortUploadRequest {
            key: encode_key(key),
            upload_id,
        };
        self.send(self.client.post(self.endpoint(namespace, "abort")).json(&payload))
            .await?;
        Ok(())
    }
}
