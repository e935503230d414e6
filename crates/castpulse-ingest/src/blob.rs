use azure_storage::StorageCredentials;
use azure_storage_blobs::prelude::*;
use serde_json::Value;
use tracing::debug;

use castpulse_core::config::BlobConfig;

/// Raw-payload archive on blob storage.
///
/// Keys follow `{raw_prefix}/reddit/{subreddit}/{reddit_id}/{timestamp}.json`.
/// Archival is best-effort: the ingestion path logs failures and
/// carries on.
pub struct BlobArchive {
    container: ContainerClient,
    raw_prefix: String,
}

impl BlobArchive {
    pub fn from_config(config: &BlobConfig) -> Self {
        let credentials =
            StorageCredentials::access_key(config.account.clone(), config.access_key.clone());
        let service = BlobServiceClient::new(config.account.clone(), credentials);
        Self {
            container: service.container_client(config.container.clone()),
            raw_prefix: config.raw_prefix.trim_matches('/').to_string(),
        }
    }

    /// Serialize and upload; returns the object key written.
    pub async fn put_json(&self, key: &str, payload: &Value) -> Result<String, String> {
        let object_key = self.normalized_key(key);
        let body = serde_json::to_vec(payload).map_err(|e| e.to_string())?;

        self.container
            .blob_client(object_key.clone())
            .put_block_blob(body)
            .content_type("application/json")
            .await
            .map_err(|e| e.to_string())?;

        debug!("archived raw payload to {object_key}");
        Ok(object_key)
    }

    fn normalized_key(&self, key: &str) -> String {
        let key = key.trim_matches('/');
        if self.raw_prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", self.raw_prefix, key)
        }
    }
}

/// Build the archive key for one ingest call.
pub fn raw_payload_key(subreddit: &str, reddit_id: &str, timestamp: &str) -> String {
    let safe_subreddit = subreddit.trim().to_lowercase();
    let safe_subreddit = if safe_subreddit.is_empty() {
        "unknown".to_string()
    } else {
        safe_subreddit
    };
    format!("reddit/{safe_subreddit}/{reddit_id}/{timestamp}.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_layout_is_lowercased_and_defaulted() {
        assert_eq!(
            raw_payload_key("RealityTV", "abc123", "20240101T010203Z"),
            "reddit/realitytv/abc123/20240101T010203Z.json"
        );
        assert_eq!(
            raw_payload_key("  ", "abc123", "20240101T010203Z"),
            "reddit/unknown/abc123/20240101T010203Z.json"
        );
    }
}
