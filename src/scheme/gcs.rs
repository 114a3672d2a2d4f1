use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_core::Stream;
use futures_util::StreamExt;
use google_cloud_storage::client::{Client, ClientConfig};
use google_cloud_storage::http::buckets::{get::GetBucketRequest, insert::InsertBucketRequest, Bucket};
use google_cloud_storage::http::objects::{
    download::Range,
    get::GetObjectRequest,
    upload::{Media, UploadObjectRequest, UploadType},
};
use log::debug;

use super::{split_bucket_key, CacheError, CacheResult, Scheme, ScopedWriter};

const BUCKET_LOCATION: &str = "us-central1";
const BUCKET_STORAGE_CLASS: &str = "REGIONAL";

/// GCS-backed scheme, bound to one `(bucket, object)` pair per instance.
///
/// Size reporting is unsupported: this scheme never needs an object metadata
/// round trip for anything else, so it doesn't pay for one speculatively.
pub struct GcsScheme {
    bucket: String,
    object: String,
}

pub(crate) fn validate(url: &str) -> bool {
    url.starts_with("gs://")
}

pub(crate) async fn construct(url: &str) -> CacheResult<GcsScheme> {
    let rest = url
        .strip_prefix("gs://")
        .ok_or_else(|| CacheError::SchemeNotFound(url.to_string()))?;
    let (bucket, object) = split_bucket_key(rest);
    Ok(GcsScheme { bucket, object })
}

impl GcsScheme {
    async fn client_and_project(&self) -> CacheResult<(Client, Option<String>)> {
        let config = ClientConfig::default()
            .with_auth()
            .await
            .map_err(|e| CacheError::RemoteIO(anyhow::anyhow!("{e}")))?;
        let project_id = config.project_id.clone();
        Ok((Client::new(config), project_id))
    }

    /// Creates the bucket as REGIONAL in `us-central1` if it doesn't already
    /// exist. A bucket that already exists (whatever its class/location) is
    /// left alone.
    async fn ensure_bucket(&self, client: &Client, project_id: Option<&str>) -> CacheResult<()> {
        let exists = client
            .get_bucket(&GetBucketRequest {
                bucket: self.bucket.clone(),
                ..Default::default()
            })
            .await
            .is_ok();
        if exists {
            return Ok(());
        }

        debug!("bucket {} not found, creating it", self.bucket);
        let project = project_id
            .ok_or_else(|| {
                CacheError::RemoteIO(anyhow::anyhow!(
                    "no GCP project id available to create bucket {}",
                    self.bucket
                ))
            })?
            .to_string();

        client
            .insert_bucket(&InsertBucketRequest {
                name: project,
                bucket: Bucket {
                    name: self.bucket.clone(),
                    location: BUCKET_LOCATION.to_string(),
                    storage_class: Some(BUCKET_STORAGE_CLASS.to_string()),
                    ..Default::default()
                },
                ..Default::default()
            })
            .await
            .map_err(|e| CacheError::RemoteIO(anyhow::anyhow!("{e}")))?;
        Ok(())
    }
}

#[async_trait]
impl Scheme for GcsScheme {
    async fn open_read(&self) -> CacheResult<Bytes> {
        let (client, _) = self.client_and_project().await?;
        let mut stream = client
            .download_streamed_object(
                &GetObjectRequest {
                    bucket: self.bucket.clone(),
                    object: self.object.clone(),
                    ..Default::default()
                },
                &Range::default(),
            )
            .await
            .map_err(|e| CacheError::RemoteIO(anyhow::anyhow!("{e}")))?;

        let mut data = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| CacheError::RemoteIO(anyhow::anyhow!("{e}")))?;
            data.extend_from_slice(&chunk);
        }

        debug!(
            "downloaded gs://{}/{} ({} bytes)",
            self.bucket,
            self.object,
            data.len()
        );
        Ok(Bytes::from(data))
    }

    async fn open_write(&self) -> CacheResult<ScopedWriter> {
        let bucket = self.bucket.clone();
        let object = self.object.clone();
        Ok(ScopedWriter::new(Box::new(move |buffer| {
            Box::pin(async move {
                let scheme = GcsScheme {
                    bucket: bucket.clone(),
                    object: object.clone(),
                };
                let (client, project_id) = scheme.client_and_project().await?;
                scheme.ensure_bucket(&client, project_id.as_deref()).await?;

                let upload_type = UploadType::Simple(Media::new(object.clone()));
                let stream: Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>> =
                    Box::pin(futures_util::stream::once(
                        async move { Ok(Bytes::from(buffer)) },
                    ));

                client
                    .upload_streamed_object(
                        &UploadObjectRequest {
                            bucket: bucket.clone(),
                            ..Default::default()
                        },
                        stream,
                        &upload_type,
                    )
                    .await
                    .map_err(|e| CacheError::RemoteIO(anyhow::anyhow!("{e}")))?;

                debug!("uploaded gs://{bucket}/{object}");
                Ok(())
            })
        })))
    }

    async fn size(&self) -> CacheResult<u64> {
        Err(CacheError::Unsupported(
            "gs:// schemes do not report object size".to_string(),
        ))
    }
}
