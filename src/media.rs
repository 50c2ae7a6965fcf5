use async_trait::async_trait;
use log::{error, info, warn};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("not_found")]
    NotFound,
    #[error("other: {0}")]
    Other(String),
}

/// A stored media asset: the public URL plus the host-side id needed to
/// delete it later.
#[derive(Debug, Clone)]
pub struct MediaAsset {
    pub url: String,
    pub asset_id: String,
}

/// Boundary contract with the media host. Upload failures surface to the
/// caller; deletions of replaced assets are best-effort at the call sites.
#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn upload(&self, bytes: &[u8], mime: &str) -> Result<MediaAsset, MediaError>;
    async fn delete(&self, asset_id: &str) -> Result<(), MediaError>;
}

// ---------------- S3 implementation (MinIO compatible) ----------------
pub struct S3MediaStore {
    bucket: String,
    client: aws_sdk_s3::Client,
    public_base: String,
    prefix: String,
}

impl S3MediaStore {
    pub async fn new() -> anyhow::Result<Self> {
        use aws_credential_types::provider::SharedCredentialsProvider;
        use aws_credential_types::Credentials;

        let bucket = std::env::var("S3_BUCKET").unwrap_or_else(|_| "flock-media".into());
        let endpoint = std::env::var("S3_ENDPOINT")
            .map_err(|_| anyhow::anyhow!("S3_ENDPOINT must be set (MinIO / S3 endpoint)"))?;
        let region = std::env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".into());
        let access = std::env::var("S3_ACCESS_KEY").unwrap_or_default();
        let secret = std::env::var("S3_SECRET_KEY").unwrap_or_default();
        // URL prefix under which uploaded objects are reachable by clients
        let public_base = std::env::var("S3_PUBLIC_BASE_URL")
            .unwrap_or_else(|_| format!("{}/{}", endpoint.trim_end_matches('/'), bucket));

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(region));
        loader = loader.endpoint_url(endpoint);
        if !access.is_empty() && !secret.is_empty() {
            let creds = Credentials::new(access, secret, None, None, "static");
            loader = loader.credentials_provider(SharedCredentialsProvider::new(creds));
        }
        let conf = loader.load().await;
        // Path-style addressing (required for most MinIO/local endpoints without wildcard DNS)
        let s3_conf = aws_sdk_s3::config::Builder::from(&conf)
            .force_path_style(true)
            .build();
        let client = aws_sdk_s3::Client::from_conf(s3_conf);
        info!("Initialized S3/MinIO media client (path-style addressing enabled)");

        // Ensure bucket exists (create if missing)
        if let Err(e) = client.head_bucket().bucket(&bucket).send().await {
            warn!("head_bucket failed for '{bucket}' (will attempt create): {e:?}");
            let mut attempt = 0u32;
            let max_attempts = 8;
            loop {
                attempt += 1;
                match client.create_bucket().bucket(&bucket).send().await {
                    Ok(_) => {
                        info!("created bucket '{bucket}' (attempt {attempt})");
                        break;
                    }
                    Err(e2) => {
                        if attempt >= max_attempts {
                            error!("create_bucket failed for '{bucket}' after {attempt} attempts: {e2:?}");
                            return Err(anyhow::anyhow!("failed to ensure bucket '{bucket}': {e2}"));
                        }
                        let backoff_ms = 200 * attempt.pow(2); // quadratic backoff
                        warn!("create_bucket attempt {attempt} failed for '{bucket}': {e2:?} (retrying in {backoff_ms}ms)");
                        tokio::time::sleep(std::time::Duration::from_millis(backoff_ms as u64)).await;
                    }
                }
            }
        }

        Ok(Self {
            bucket,
            client,
            public_base,
            prefix: "profiles".into(),
        })
    }

    fn key_for(&self, asset_id: &str) -> String {
        format!("{}/{}", self.prefix, asset_id)
    }
}

#[async_trait]
impl MediaStore for S3MediaStore {
    async fn upload(&self, bytes: &[u8], mime: &str) -> Result<MediaAsset, MediaError> {
        use aws_sdk_s3::primitives::ByteStream;
        // Fresh id per upload: two users uploading identical bytes must not
        // share an asset, or deleting one profile image would break the other.
        let asset_id = uuid::Uuid::new_v4().to_string();
        let key = self.key_for(&asset_id);
        let put = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(bytes.to_vec()))
            .content_type(mime);
        if let Err(e) = put.send().await {
            error!(
                "put_object failed key={key} bucket={} err={:?}",
                self.bucket, e
            );
            let hint = if e.to_string().contains("AccessDenied") {
                " (check S3_ACCESS_KEY/S3_SECRET_KEY permissions)"
            } else {
                ""
            };
            return Err(MediaError::Other(format!("{e}{hint}")));
        }
        Ok(MediaAsset {
            url: format!("{}/{}", self.public_base, key),
            asset_id,
        })
    }

    async fn delete(&self, asset_id: &str) -> Result<(), MediaError> {
        let key = self.key_for(asset_id);
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| MediaError::Other(e.to_string()))?;
        Ok(())
    }
}

/// Best-effort deletion of a replaced or orphaned asset: log and move on.
pub async fn delete_asset_best_effort(store: &dyn MediaStore, asset_id: &str) {
    if let Err(e) = store.delete(asset_id).await {
        warn!("failed to delete media asset {asset_id}: {e}");
    }
}

// Factory helper used in main (panic early if misconfigured)
pub async fn build_media_store() -> Arc<dyn MediaStore> {
    match S3MediaStore::new().await {
        Ok(store) => Arc::new(store),
        Err(e) => panic!("Failed to initialize S3 media store: {e}"),
    }
}
