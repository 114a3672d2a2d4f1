use async_trait::async_trait;
use aws_config::{meta::region::RegionProviderChain, BehaviorVersion, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use log::debug;

use super::{split_bucket_key, CacheError, CacheResult, Scheme, ScopedWriter};

/// S3-backed scheme, bound to one `(bucket, key)` pair per instance.
pub struct S3Scheme {
    bucket: String,
    key: String,
    region: Option<String>,
}

pub(crate) fn validate(url: &str) -> bool {
    url.starts_with("s3://")
}

pub(crate) async fn construct(url: &str, region: Option<String>) -> CacheResult<S3Scheme> {
    let rest = url
        .strip_prefix("s3://")
        .ok_or_else(|| CacheError::SchemeNotFound(url.to_string()))?;
    let (bucket, key) = split_bucket_key(rest);
    Ok(S3Scheme {
        bucket,
        key,
        region,
    })
}

impl S3Scheme {
    async fn client(&self) -> Client {
        let region_provider = match &self.region {
            Some(r) => RegionProviderChain::first_try(Region::new(r.clone())),
            None => RegionProviderChain::default_provider(),
        };
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(region_provider)
            .load()
            .await;
        Client::new(&config)
    }
}

#[async_trait]
impl Scheme for S3Scheme {
    async fn open_read(&self) -> CacheResult<Bytes> {
        let client = self.client().await;
        let response = client
            .get_object()
            .bucket(&self.bucket)
            .key(&self.key)
            .send()
            .await
            .map_err(|e| CacheError::RemoteIO(e.into()))?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| CacheError::RemoteIO(e.into()))?
            .into_bytes();

        debug!("downloaded s3://{}/{} ({} bytes)", self.bucket, self.key, data.len());
        Ok(data)
    }

    async fn open_write(&self) -> CacheResult<ScopedWriter> {
        let client = self.client().await;
        let bucket = self.bucket.clone();
        let key = self.key.clone();
        Ok(ScopedWriter::new(Box::new(move |buffer| {
            Box::pin(async move {
                client
                    .put_object()
                    .bucket(&bucket)
                    .key(&key)
                    .body(ByteStream::from(buffer))
                    .send()
                    .await
                    .map_err(|e| CacheError::RemoteIO(e.into()))?;
                debug!("uploaded s3://{bucket}/{key}");
                Ok(())
            })
        })))
    }

    async fn size(&self) -> CacheResult<u64> {
        let client = self.client().await;
        let output = client
            .head_object()
            .bucket(&self.bucket)
            .key(&self.key)
            .send()
            .await
            .map_err(|e| CacheError::RemoteIO(e.into()))?;

        output
            .content_length()
            .map(|s| s as u64)
            .ok_or_else(|| CacheError::RemoteIO(anyhow::anyhow!("missing content-length for s3://{}/{}", self.bucket, self.key)))
    }
}
