//! Proof image references
//!
//! Uploads go straight to object storage; the hub only hands out a key and
//! stores the resulting public reference on the proof. It never sees the
//! bytes.

use serde::Serialize;
use url::Url;
use uuid::Uuid;

use crate::config::Config;
use crate::error::HubError;

/// A freshly issued upload slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadRef {
    /// Object key inside the proof bucket
    pub key: String,
    /// Reference to store on `Proof.image_url`
    pub public_url: String,
}

#[derive(Debug, Clone)]
pub struct BlobRefs {
    endpoint: String,
    bucket: String,
}

impl BlobRefs {
    pub fn new(endpoint: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            bucket: bucket.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.blob_public_endpoint, &config.proof_bucket)
    }

    /// Issue a unique key (`{uuid}.{ext}`) keeping the file's extension
    pub fn issue_upload(&self, filename: &str) -> Result<UploadRef, HubError> {
        let ext = filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
            .ok_or_else(|| HubError::InvalidInput(format!("'{}' has no usable file extension", filename)))?;

        let key = format!("{}.{}", Uuid::new_v4(), ext);
        let public_url = self.public_url(&key);
        Ok(UploadRef { key, public_url })
    }

    pub fn public_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint, self.bucket, key)
    }

    /// Object key behind a stored reference. Bare keys are returned as is.
    pub fn key_from_url(&self, reference: &str) -> Option<String> {
        match Url::parse(reference) {
            Ok(url) => url
                .path_segments()
                .and_then(|mut segments| segments.next_back())
                .filter(|key| !key.is_empty())
                .map(String::from),
            Err(_) => reference
                .rsplit('/')
                .next()
                .filter(|key| !key.is_empty())
                .map(String::from),
        }
    }
}
