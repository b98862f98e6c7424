//! S3-compatible object store.
//!
//! Works against AWS S3 as well as MinIO, R2 and other compatible services via
//! a custom endpoint and optional path-style addressing.

use super::{
    ByteStream, GetOutput, ObjectStore, ObjectStoreError, ObjectStoreResult, PutOutput,
    collect_limited, join_url,
};
use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    config::{Credentials, Region},
    error::DisplayErrorContext,
    presigning::PresigningConfig,
    primitives::ByteStream as S3Body,
};
use futures::StreamExt;
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

#[derive(Clone, Debug, Default)]
pub struct S3Settings {
    pub bucket: String,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub path_style: bool,
    /// CDN or website prefix used to build `PutOutput::url`. When unset the
    /// bucket's own object URL is used.
    pub public_base_url: Option<String>,
}

pub struct S3ObjectStore {
    client: Client,
    bucket: String,
    object_base_url: String,
    max_bytes: u64,
}

/// Address of the bucket itself: `{endpoint}/{bucket}` with path-style
/// addressing, `{scheme}://{bucket}.{host}` otherwise.
fn bucket_url(
    bucket: &str,
    endpoint: Option<&str>,
    region: Option<&str>,
    path_style: bool,
) -> String {
    let endpoint = match endpoint {
        Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
        None => format!("https://s3.{}.amazonaws.com", region.unwrap_or("us-east-1")),
    };
    if path_style {
        return format!("{endpoint}/{bucket}");
    }
    match endpoint.split_once("://") {
        Some((scheme, host)) => format!("{scheme}://{bucket}.{host}"),
        None => format!("https://{bucket}.{endpoint}"),
    }
}

fn backend_error<E>(op: &str, err: E) -> ObjectStoreError
where
    E: std::error::Error,
{
    ObjectStoreError::Backend(format!("{op}: {}", DisplayErrorContext(err)))
}

impl S3ObjectStore {
    /// Build a client from `settings`, falling back to the default AWS
    /// credential chain when no static keys are given.
    pub async fn connect(settings: S3Settings, max_bytes: u64) -> ObjectStoreResult<Self> {
        if settings.bucket.trim().is_empty() {
            return Err(ObjectStoreError::Backend("S3 bucket not configured".into()));
        }

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = settings.region.clone().filter(|r| !r.is_empty()) {
            loader = loader.region(Region::new(region));
        }
        if let (Some(access_key), Some(secret_key)) = (&settings.access_key, &settings.secret_key)
        {
            let credentials = Credentials::new(access_key, secret_key, None, None, "relief_photos");
            loader = loader.credentials_provider(credentials);
        }
        let shared = loader.load().await;

        let endpoint = settings.endpoint.as_deref().filter(|e| !e.is_empty());
        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        if settings.path_style {
            builder = builder.force_path_style(true);
        }

        let public_base_url = settings
            .public_base_url
            .filter(|url| !url.trim().is_empty());
        let object_base_url = match public_base_url {
            Some(url) => url,
            None => bucket_url(
                &settings.bucket,
                endpoint,
                shared.region().map(|region| region.as_ref()),
                settings.path_style,
            ),
        };

        info!(
            "using S3 bucket {} (path style: {}, objects under {})",
            settings.bucket, settings.path_style, object_base_url
        );
        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: settings.bucket,
            object_base_url,
            max_bytes,
        })
    }

    fn ensure_key(key: &str) -> ObjectStoreResult<()> {
        if key.is_empty() {
            return Err(ObjectStoreError::InvalidKey);
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(
        &self,
        key: &str,
        body: ByteStream<'_>,
        content_type: &str,
    ) -> ObjectStoreResult<PutOutput> {
        Self::ensure_key(key)?;
        // PutObject needs a known length, so the body is buffered up to the ceiling.
        let data = collect_limited(body, self.max_bytes).await?;
        let size = data.len() as u64;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(S3Body::from(data))
            .send()
            .await
            .map_err(|err| backend_error("put_object", err))?;
        debug!("put {} ({} bytes) into {}", key, size, self.bucket);

        Ok(PutOutput {
            url: join_url(&self.object_base_url, key),
            key: key.to_string(),
            size,
        })
    }

    async fn get(&self, key: &str) -> ObjectStoreResult<GetOutput> {
        Self::ensure_key(key)?;
        let out = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(out) => out,
            Err(err) => {
                if err
                    .as_service_error()
                    .is_some_and(|service| service.is_no_such_key())
                {
                    return Err(ObjectStoreError::NotFound(key.to_string()));
                }
                return Err(backend_error("get_object", err));
            }
        };

        let content_type = out.content_type().map(str::to_string);
        let length = out.content_length().and_then(|len| u64::try_from(len).ok());
        Ok(GetOutput {
            body: ReaderStream::new(out.body.into_async_read()).boxed(),
            content_type,
            length,
        })
    }

    async fn presign_get(&self, key: &str, ttl: Duration) -> ObjectStoreResult<String> {
        Self::ensure_key(key)?;
        let config = PresigningConfig::expires_in(ttl)
            .map_err(|err| backend_error("presigning config", err))?;
        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(config)
            .await
            .map_err(|err| backend_error("presign get_object", err))?;
        Ok(request.uri().to_string())
    }

    fn max_bytes(&self) -> u64 {
        self.max_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_requires_bucket() {
        let err = S3ObjectStore::connect(S3Settings::default(), 1024)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ObjectStoreError::Backend(_)));
    }

    #[tokio::test]
    async fn presigned_urls_point_at_the_configured_endpoint() {
        let settings = S3Settings {
            bucket: "relief".into(),
            region: Some("us-east-1".into()),
            endpoint: Some("http://127.0.0.1:9000".into()),
            access_key: Some("minio".into()),
            secret_key: Some("minio-secret".into()),
            path_style: true,
            public_base_url: None,
        };
        let store = S3ObjectStore::connect(settings, 1024).await.unwrap();

        let url = store
            .presign_get("photos/a.jpg", Duration::from_secs(300))
            .await
            .unwrap();
        assert!(url.starts_with("http://127.0.0.1:9000/relief/photos/a.jpg?"), "{url}");
        assert!(url.contains("X-Amz-Expires=300"), "{url}");
    }

    #[test]
    fn bucket_urls_follow_the_addressing_style() {
        assert_eq!(
            bucket_url("relief", Some("http://127.0.0.1:9000/"), None, true),
            "http://127.0.0.1:9000/relief"
        );
        assert_eq!(
            bucket_url("relief", Some("https://r2.example.net"), None, false),
            "https://relief.r2.example.net"
        );
        assert_eq!(
            bucket_url("relief", None, Some("eu-west-1"), false),
            "https://relief.s3.eu-west-1.amazonaws.com"
        );
    }

    #[tokio::test]
    async fn object_urls_fall_back_to_the_bucket_address() {
        let settings = S3Settings {
            bucket: "relief".into(),
            region: Some("us-east-1".into()),
            endpoint: Some("http://127.0.0.1:9000".into()),
            access_key: Some("k".into()),
            secret_key: Some("s".into()),
            path_style: true,
            public_base_url: Some("  ".into()),
        };
        let store = S3ObjectStore::connect(settings, 1024).await.unwrap();
        assert_eq!(store.object_base_url, "http://127.0.0.1:9000/relief");
        assert_eq!(
            join_url(&store.object_base_url, "photos/a.jpg"),
            "http://127.0.0.1:9000/relief/photos/a.jpg"
        );

        let settings = S3Settings {
            bucket: "relief".into(),
            region: Some("us-east-1".into()),
            access_key: Some("k".into()),
            secret_key: Some("s".into()),
            public_base_url: Some("https://cdn.example.org/".into()),
            ..S3Settings::default()
        };
        let store = S3ObjectStore::connect(settings, 1024).await.unwrap();
        assert_eq!(store.object_base_url, "https://cdn.example.org/");
    }

    #[tokio::test]
    async fn empty_keys_are_rejected() {
        let settings = S3Settings {
            bucket: "relief".into(),
            region: Some("us-east-1".into()),
            access_key: Some("k".into()),
            secret_key: Some("s".into()),
            ..S3Settings::default()
        };
        let store = S3ObjectStore::connect(settings, 1024).await.unwrap();
        assert!(matches!(
            store.presign_get("", Duration::from_secs(60)).await,
            Err(ObjectStoreError::InvalidKey)
        ));
    }
}
