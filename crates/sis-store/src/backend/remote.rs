//! RemoteBackend: originals held by another SIS instance.
//!
//! Writes go to the peer's relay upload route as a one-part multipart form
//! (field name = content key, file name = filename). Reads use the peer's
//! raw download routes.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};

use super::{Backend, StoredObject};
use crate::error::{Result, StoreError};
use crate::key::ContentKey;

/// Relay upload route on the peer.
pub const UPLOAD_PATH: &str = "/derect_up";
/// Download of the first object under a key.
pub const SIMPLE_DOWN_PATH: &str = "/simple_down";
/// Download of a named object.
pub const FULL_DOWN_PATH: &str = "/full_down";
/// Response header carrying the resolved filename of a simple download.
pub const FILENAME_HEADER: &str = "x-sis-filename";

/// Encode a filename for [`FILENAME_HEADER`]. Filenames may be non-ASCII.
pub fn encode_filename_header(filename: &str) -> String {
    URL_SAFE_NO_PAD.encode(filename.as_bytes())
}

/// Decode a [`FILENAME_HEADER`] value.
pub fn decode_filename_header(value: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(value).ok()?;
    String::from_utf8(bytes).ok()
}

/// HTTP client for a peer SIS instance.
#[derive(Debug, Clone)]
pub struct RemoteBackend {
    client: Client,
    base_url: String,
}

impl RemoteBackend {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl Backend for RemoteBackend {
    #[tracing::instrument(skip(self, data), fields(size = data.len(), peer = %self.base_url))]
    async fn write(&self, data: &[u8], key: &ContentKey, filename: &str) -> Result<()> {
        let part = Part::bytes(data.to_vec()).file_name(filename.to_string());
        let form = Form::new().part(key.to_string(), part);

        let url = self.url(UPLOAD_PATH);
        let response = self.client.post(&url).multipart(form).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(StoreError::RemoteStatus { status, url });
        }

        tracing::debug!("relayed original to peer");
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(peer = %self.base_url))]
    async fn read(&self, key: &ContentKey, filename: &str) -> Result<StoredObject> {
        let request = if filename.is_empty() {
            self.client
                .get(self.url(SIMPLE_DOWN_PATH))
                .query(&[("md5", key.as_str())])
        } else {
            self.client
                .get(self.url(FULL_DOWN_PATH))
                .query(&[("md5", key.as_str()), ("file_name", filename)])
        };

        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(StoreError::not_found(key.as_str(), filename));
        }
        if !status.is_success() {
            return Err(StoreError::RemoteStatus {
                status,
                url: response.url().to_string(),
            });
        }

        let resolved = if filename.is_empty() {
            response
                .headers()
                .get(FILENAME_HEADER)
                .and_then(|v| v.to_str().ok())
                .and_then(decode_filename_header)
                .unwrap_or_default()
        } else {
            filename.to_string()
        };

        let data = response.bytes().await?;
        Ok(StoredObject {
            key: key.clone(),
            filename: resolved,
            data,
        })
    }

    fn kind(&self) -> &'static str {
        "remote"
    }
}
