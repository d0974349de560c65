//! Artifact publishing to object storage.
//!
//! Uploads go through the AWS CLI so credentials stay with the host
//! environment; this process never sees a key pair.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use capture_engine::tokio_command;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::domain::Artifact;
use crate::retry::{RetryConfig, retry_async};

/// Errors from the storage backend.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The upload did not complete; the local file is left in place.
    #[error("upload failed: {0}")]
    UploadFailed(String),
}

/// Object storage seam.
#[async_trait]
pub trait ArtifactPublisher: Send + Sync {
    /// Upload the artifact, attach its retrievable URL, and return it.
    ///
    /// On failure `remote_url` stays `None`.
    async fn publish(&self, artifact: &mut Artifact) -> Result<String, PublishError>;
}

/// Publishes artifacts with `aws s3 cp`.
pub struct S3Publisher {
    bucket: String,
    region: String,
    /// CLI binary, overridable for tests.
    aws_binary: String,
    retry: RetryConfig,
    clock: Arc<dyn Clock>,
}

impl S3Publisher {
    pub fn new(
        bucket: impl Into<String>,
        region: impl Into<String>,
        retry: RetryConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            region: region.into(),
            aws_binary: "aws".to_string(),
            retry,
            clock,
        }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.aws_binary = binary.into();
        self
    }

    /// Virtual-hosted URL for an uploaded object.
    fn object_url(&self, key: &str) -> String {
        format!("https://{}.s3.{}.amazonaws.com/{}", self.bucket, self.region, key)
    }

    async fn upload_once(&self, local_path: &std::path::Path) -> Result<(), PublishError> {
        let destination = format!("s3://{}/", self.bucket);
        debug!(
            file = %local_path.display(),
            %destination,
            "running aws s3 cp"
        );

        let output = tokio_command(&self.aws_binary)
            .args(["s3", "cp"])
            .arg(local_path)
            .arg(&destination)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| PublishError::UploadFailed(format!("cannot run aws cli: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PublishError::UploadFailed(format!(
                "aws s3 cp exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ArtifactPublisher for S3Publisher {
    async fn publish(&self, artifact: &mut Artifact) -> Result<String, PublishError> {
        let key = artifact
            .local_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| {
                PublishError::UploadFailed(format!(
                    "artifact path has no file name: {}",
                    artifact.local_path.display()
                ))
            })?;

        let local_path = artifact.local_path.clone();
        retry_async(&self.retry, self.clock.as_ref(), "s3 upload", || {
            self.upload_once(&local_path)
        })
        .await?;

        let url = self.object_url(&key);
        artifact.remote_url = Some(url.clone());
        info!(
            timeslot_id = artifact.timeslot_id,
            show = %artifact.show_name,
            %url,
            "artifact uploaded"
        );

        // The remote copy is authoritative now; a leftover local file is
        // only worth a warning.
        if let Err(e) = tokio::fs::remove_file(&artifact.local_path).await {
            warn!(
                file = %artifact.local_path.display(),
                error = %e,
                "uploaded but could not delete local file"
            );
        }

        Ok(url)
    }
}
