use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

// Payloads above this size go through a multipart upload.
const MULTIPART_THRESHOLD: u64 = 100 * 1024 * 1024;
const MULTIPART_CHUNK: u64 = 50 * 1024 * 1024;

const NETWORK_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("blob store request failed: {0}")]
    Request(String),
    #[error("blob store request timed out after {0:?}")]
    Timeout(Duration),
    #[error("local file error for {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

impl StorageError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Client for the S3-compatible object store holding inbound archives and
/// processed clips. Signs requests with SigV4; path-style addressing is
/// required by Swift-style endpoints.
#[derive(Clone, Debug)]
pub struct BlobStore {
    client: Client,
    bucket: String,
}

impl BlobStore {
    pub async fn connect(
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
        bucket: &str,
    ) -> Self {
        let credentials = Credentials::new(access_key, secret_key, None, None, "pipeline");

        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .endpoint_url(endpoint)
            .region(Region::new("us-east-1"))
            .credentials_provider(credentials)
            .load()
            .await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(true)
            .build();

        Self {
            client: Client::from_conf(s3_config),
            bucket: bucket.to_string(),
        }
    }

    /// Verify the endpoint is reachable and the credentials are accepted.
    pub async fn check_connectivity(&self) -> Result<(), StorageError> {
        bounded(self.client.list_buckets().send()).await?;
        tracing::debug!("blob store reachable, bucket '{}'", self.bucket);
        Ok(())
    }

    /// Download an object into a local file, streaming the body.
    pub async fn get(&self, key: &str, local_path: &Path) -> Result<(), StorageError> {
        ap_app::retry::with_backoff("blob get", ap_app::retry::DEFAULT_ATTEMPTS, || {
            self.get_once(key, local_path)
        })
        .await
    }

    async fn get_once(&self, key: &str, local_path: &Path) -> Result<(), StorageError> {
        let transfer = async {
            let mut object = self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| StorageError::Request(e.to_string()))?;

            let mut file = tokio::fs::File::create(local_path)
                .await
                .map_err(|e| StorageError::io(local_path, e))?;

            while let Some(bytes) = object
                .body
                .try_next()
                .await
                .map_err(|e| StorageError::Request(e.to_string()))?
            {
                file.write_all(&bytes)
                    .await
                    .map_err(|e| StorageError::io(local_path, e))?;
            }

            file.flush()
                .await
                .map_err(|e| StorageError::io(local_path, e))?;

            Ok(())
        };

        match tokio::time::timeout(NETWORK_TIMEOUT, transfer).await {
            Ok(result) => result,
            Err(_) => Err(StorageError::Timeout(NETWORK_TIMEOUT)),
        }
    }

    /// Upload a local file, switching to a multipart upload above the
    /// threshold.
    pub async fn put(&self, key: &str, local_path: &Path) -> Result<(), StorageError> {
        let size = tokio::fs::metadata(local_path)
            .await
            .map_err(|e| StorageError::io(local_path, e))?
            .len();

        if size > MULTIPART_THRESHOLD {
            tracing::info!(
                "uploading {} ({:.1}MB) as multipart to {key}",
                local_path.display(),
                size as f64 / 1024.0 / 1024.0
            );
            self.put_multipart(key, local_path, size).await
        } else {
            ap_app::retry::with_backoff("blob put", ap_app::retry::DEFAULT_ATTEMPTS, || {
                self.put_once(key, local_path)
            })
            .await
        }
    }

    async fn put_once(&self, key: &str, local_path: &Path) -> Result<(), StorageError> {
        let body = ByteStream::from_path(local_path)
            .await
            .map_err(|e| StorageError::Request(e.to_string()))?;

        bounded(
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .body(body)
                .send(),
        )
        .await?;

        Ok(())
    }

    async fn put_multipart(
        &self,
        key: &str,
        local_path: &Path,
        size: u64,
    ) -> Result<(), StorageError> {
        let create = bounded(
            self.client
                .create_multipart_upload()
                .bucket(&self.bucket)
                .key(key)
                .send(),
        )
        .await?;

        let upload_id = create
            .upload_id()
            .ok_or_else(|| StorageError::Request("multipart upload id missing".to_string()))?
            .to_string();

        match self.upload_parts(key, local_path, size, &upload_id).await {
            Ok(parts) => {
                bounded(
                    self.client
                        .complete_multipart_upload()
                        .bucket(&self.bucket)
                        .key(key)
                        .upload_id(&upload_id)
                        .multipart_upload(
                            CompletedMultipartUpload::builder()
                                .set_parts(Some(parts))
                                .build(),
                        )
                        .send(),
                )
                .await?;
                Ok(())
            }
            Err(error) => {
                // Leave no orphaned parts behind on the failure path.
                let abort = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await;
                if let Err(abort_error) = abort {
                    tracing::warn!("failed to abort multipart upload for {key}: {abort_error}");
                }
                Err(error)
            }
        }
    }

    async fn upload_parts(
        &self,
        key: &str,
        local_path: &Path,
        size: u64,
        upload_id: &str,
    ) -> Result<Vec<CompletedPart>, StorageError> {
        let mut file = tokio::fs::File::open(local_path)
            .await
            .map_err(|e| StorageError::io(local_path, e))?;

        let mut parts = Vec::new();
        let mut remaining = size;
        let mut part_number = 1;

        while remaining > 0 {
            let chunk_len = remaining.min(MULTIPART_CHUNK) as usize;
            let mut buffer = vec![0u8; chunk_len];
            file.read_exact(&mut buffer)
                .await
                .map_err(|e| StorageError::io(local_path, e))?;

            let part = bounded(
                self.client
                    .upload_part()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(upload_id)
                    .part_number(part_number)
                    .body(ByteStream::from(buffer))
                    .send(),
            )
            .await?;

            parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(part.e_tag().unwrap_or_default())
                    .build(),
            );

            remaining -= chunk_len as u64;
            part_number += 1;
        }

        Ok(parts)
    }

    /// Delete an object. Missing keys are treated as already deleted.
    pub async fn delete(&self, key: &str) -> Result<(), StorageError> {
        ap_app::retry::with_backoff("blob delete", ap_app::retry::DEFAULT_ATTEMPTS, || async {
            bounded(
                self.client
                    .delete_object()
                    .bucket(&self.bucket)
                    .key(key)
                    .send(),
            )
            .await?;
            Ok(())
        })
        .await
    }

    /// Size of an object in bytes, or `None` when the key does not exist.
    pub async fn head(&self, key: &str) -> Result<Option<i64>, StorageError> {
        let result = tokio::time::timeout(
            NETWORK_TIMEOUT,
            self.client
                .head_object()
                .bucket(&self.bucket)
                .key(key)
                .send(),
        )
        .await;

        match result {
            Ok(Ok(output)) => Ok(output.content_length()),
            Ok(Err(error)) => {
                if error
                    .as_service_error()
                    .is_some_and(|service| service.is_not_found())
                {
                    Ok(None)
                } else {
                    Err(StorageError::Request(error.to_string()))
                }
            }
            Err(_) => Err(StorageError::Timeout(NETWORK_TIMEOUT)),
        }
    }
}

/// Await an SDK call under the shared network timeout, flattening its error
/// into a `StorageError`.
async fn bounded<T, E>(
    future: impl Future<Output = Result<T, E>>,
) -> Result<T, StorageError>
where
    E: std::fmt::Display,
{
    match tokio::time::timeout(NETWORK_TIMEOUT, future).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(error)) => Err(StorageError::Request(error.to_string())),
        Err(_) => Err(StorageError::Timeout(NETWORK_TIMEOUT)),
    }
}
