use std::env;
use std::sync::Arc;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::{primitives::ByteStream as AwsByteStream, Client};

use crate::transport::{join_url, sanitize_file_name, sanitize_key_segment};
use crate::{
    DefaultKeyStrategy, FileUpload, ProgressFn, SessionId, StagingError, StagingResult,
    TransportCapabilities, TransportReceipt, UploadKeyStrategy, UploadTransport,
};

/// S3-compatible storage configuration
#[derive(Debug, Clone)]
pub struct S3Config {
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub endpoint_url: String,
    pub bucket: String,
    /// Base of the durable URLs handed back to callers (CDN or bucket URL)
    pub public_url: String,
}

impl S3Config {
    /// Read `KEYSTONE_S3_*` environment variables
    pub fn from_env() -> StagingResult<Self> {
        fn get_env(key: &str) -> StagingResult<String> {
            env::var(key).map_err(|_| StagingError::invalid(format!("{} environment variable required", key)))
        }

        let endpoint_url = get_env("KEYSTONE_S3_ENDPOINT_URL")?;
        let bucket = get_env("KEYSTONE_S3_BUCKET")?;
        let public_url = env::var("KEYSTONE_S3_PUBLIC_URL")
            .unwrap_or_else(|_| join_url(&endpoint_url, &bucket));

        Ok(Self {
            region: get_env("KEYSTONE_S3_REGION")?,
            access_key_id: get_env("KEYSTONE_S3_ACCESS_KEY_ID")?,
            secret_access_key: get_env("KEYSTONE_S3_SECRET_ACCESS_KEY")?,
            endpoint_url,
            bucket,
            public_url,
        })
    }
}

/// Upload transport backed by an S3-compatible bucket
#[derive(Clone)]
pub struct S3Transport {
    client: Client,
    bucket: String,
    public_url: String,
    keys: Arc<dyn UploadKeyStrategy>,
}

impl S3Transport {
    pub async fn new(config: S3Config) -> Self {
        let bucket = config.bucket.clone();
        let public_url = config.public_url.clone();
        let client = Self::create_client(config).await;
        Self {
            client,
            bucket,
            public_url,
            keys: Arc::new(DefaultKeyStrategy),
        }
    }

    pub async fn from_env() -> StagingResult<Self> {
        Ok(Self::new(S3Config::from_env()?).await)
    }

    /// Use a custom key strategy
    pub fn with_key_strategy<K: UploadKeyStrategy + 'static>(mut self, keys: K) -> Self {
        self.keys = Arc::new(keys);
        self
    }

    async fn create_client(config: S3Config) -> Client {
        let credentials = Credentials::new(
            config.access_key_id,
            config.secret_access_key,
            None,
            None,
            "keystone",
        );

        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region))
            .credentials_provider(credentials)
            .endpoint_url(config.endpoint_url)
            .load()
            .await;

        Client::from_conf(
            aws_sdk_s3::config::Builder::from(&aws_config)
                .force_path_style(true)
                .build(),
        )
    }

    /// Map a durable URL back to its object key
    fn key_for_url<'a>(&self, url: &'a str) -> StagingResult<&'a str> {
        object_key_for(&self.public_url, url)
            .ok_or_else(|| StagingError::invalid(format!("{} is not stored in bucket {}", url, self.bucket)))
    }

    fn map_aws_error(err: impl std::error::Error + Send + Sync + 'static) -> StagingError {
        StagingError::backend(err)
    }
}

/// The object key of `url` when it lives under `public_url`
fn object_key_for<'a>(public_url: &str, url: &'a str) -> Option<&'a str> {
    let base = public_url.trim_end_matches('/');
    url.strip_prefix(base)
        .and_then(|rest| rest.strip_prefix('/'))
        .map(|key| key.trim_start_matches('/'))
        .filter(|key| !key.is_empty())
}

#[async_trait]
impl UploadTransport for S3Transport {
    async fn upload(
        &self,
        session_id: &SessionId,
        file: FileUpload,
        progress: ProgressFn,
    ) -> StagingResult<TransportReceipt> {
        progress(0);

        let key = self.keys.object_key(session_id, &file.name);
        let size_bytes = file.size_bytes();
        let content_type = crate::mime::resolve(file.content_type.as_deref(), &file.name);

        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(AwsByteStream::from(file.data))
            .metadata("filename", sanitize_file_name(&file.name))
            .metadata("session", sanitize_key_segment(session_id.as_str()));

        if let Some(ct) = &content_type {
            request = request.content_type(ct);
        }

        request.send().await.map_err(Self::map_aws_error)?;
        progress(100);

        Ok(TransportReceipt {
            url: join_url(&self.public_url, &key),
            name: file.name,
            size_bytes,
            content_type,
        })
    }

    async fn delete(&self, url: &str) -> StagingResult<()> {
        let key = self.key_for_url(url)?;
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(Self::map_aws_error)?;
        Ok(())
    }

    fn capabilities(&self) -> TransportCapabilities {
        // single PUT limit
        TransportCapabilities::basic().with_max_file_bytes(5 * 1024 * 1024 * 1024)
    }
}
