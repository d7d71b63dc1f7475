use crate::{ByteStream, Metadata, StorageError, StorageObject, StorageProvider};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::provider::SharedCredentialsProvider;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::primitives::ByteStream as S3ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use aws_smithy_types::DateTime;
use futures::StreamExt;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::time::{Duration, SystemTime};

/// S3 requires every part but the last to be at least 5 MB.
const PART_SIZE: usize = 5 * 1024 * 1024;

pub struct S3Provider {
    /// S3 client
    client: Client,
    /// Region
    region: String,
    /// Custom endpoint
    endpoint: Option<String>,
}

impl S3Provider {
    /// Creates a new S3 provider
    pub async fn new(
        region: Option<String>,
        endpoint: Option<String>,
        access_key: Option<String>,
        secret_key: Option<String>,
    ) -> Result<Self, StorageError> {
        let region_str = region.unwrap_or("us-east-1".to_string());
        let region = Region::new(region_str.clone());

        let mut config_builder = aws_config::defaults(BehaviorVersion::v2025_01_17())
            .region(region)
            .retry_config(aws_config::retry::RetryConfig::standard().with_max_attempts(3));

        if let (Some(access_key), Some(secret_key)) = (access_key, secret_key) {
            let credentials = aws_sdk_s3::config::Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                "static-credentials-provider",
            );
            config_builder =
                config_builder.credentials_provider(SharedCredentialsProvider::new(credentials));
        }

        if let Some(ref endpoint) = endpoint {
            info!("Using custom endpoint: {endpoint}");
            config_builder = config_builder.endpoint_url(endpoint);
        } else {
            let default_endpoint = format!("https://s3.{region_str}.amazonaws.com");
            info!("Using default AWS endpoint: {default_endpoint}");
            config_builder = config_builder.endpoint_url(default_endpoint);
        }

        let sdk_config = config_builder.load().await;

        // Custom endpoints (MinIO, R2, Wasabi...) generally want path-style addressing
        let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if endpoint.is_some() {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }
        let client = Client::from_conf(s3_config_builder.build());

        Ok(Self {
            client,
            region: region_str,
            endpoint,
        })
    }

    /// Helper: initiate a multipart upload and return the upload_id
    async fn initiate_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<&str>,
        metadata: Option<Metadata>,
    ) -> Result<String, StorageError> {
        let mut req = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key);
        if let Some(content_type) = content_type {
            req = req.content_type(content_type);
        }
        if let Some(metadata) = metadata {
            for (k, v) in metadata {
                req = req.metadata(k, v);
            }
        }
        let resp = req.send().await.map_err(|e| {
            error!("Failed to initiate multipart upload for {bucket}/{key}: {e}");
            StorageError::Aws(e.to_string())
        })?;
        resp.upload_id()
            .map(|s| s.to_string())
            .ok_or_else(|| StorageError::Unexpected("No upload_id returned from S3".to_string()))
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Vec<u8>,
    ) -> Result<CompletedPart, StorageError> {
        info!("Uploading part {part_number} ({} bytes) of {bucket}/{key}", body.len());
        let resp = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(S3ByteStream::from(body))
            .send()
            .await
            .map_err(|e| {
                error!("Failed to upload part {part_number} for {bucket}/{key}: {e:?}");
                report_s3_error_to_sentry("upload_stream:upload_part", &e, bucket, key);
                StorageError::Aws(e.to_string())
            })?;
        Ok(CompletedPart::builder()
            .set_part_number(Some(part_number))
            .set_e_tag(resp.e_tag().map(|s| s.to_string()))
            .build())
    }

    async fn stream_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        mut stream: ByteStream,
    ) -> Result<Vec<CompletedPart>, StorageError> {
        let mut parts = Vec::new();
        let mut part_number = 1;
        let mut buffer = Vec::with_capacity(PART_SIZE);
        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result.map_err(|e| {
                error!("Failed to read stream chunk: {e}");
                StorageError::Io(e)
            })?;
            buffer.extend_from_slice(&chunk);
            while buffer.len() >= PART_SIZE {
                let part = buffer.drain(..PART_SIZE).collect::<Vec<u8>>();
                parts.push(self.upload_part(bucket, key, upload_id, part_number, part).await?);
                part_number += 1;
            }
        }
        if !buffer.is_empty() || parts.is_empty() {
            parts.push(self.upload_part(bucket, key, upload_id, part_number, buffer).await?);
        }
        Ok(parts)
    }

    /// Converts an S3 object to a StorageObject
    fn convert_s3_object(&self, obj: &aws_sdk_s3::types::Object) -> StorageObject {
        StorageObject {
            key: obj.key().unwrap_or_default().to_string(),
            size: obj.size().and_then(|size| u64::try_from(size).ok()).unwrap_or(0),
            last_modified: obj.last_modified().map(to_system_time),
            etag: obj.e_tag().map(|s| s.to_string()),
        }
    }
}

fn to_system_time(dt: &DateTime) -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(dt.secs().max(0) as u64)
}

#[async_trait]
impl StorageProvider for S3Provider {
    fn name(&self) -> &str {
        "AWS S3"
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool, StorageError> {
        debug!("Checking if bucket {bucket} exists in region {}", self.region);
        if let Some(endpoint) = &self.endpoint {
            debug!("Using endpoint: {endpoint}");
        }

        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => {
                info!("Bucket {bucket} exists");
                Ok(true)
            }
            Err(e) => {
                let error_string = e.to_string();
                if error_string.contains("404") {
                    info!("Bucket {bucket} does not exist (404 Not Found)");
                    Ok(false)
                } else if error_string.contains("403") {
                    // A 403 means the bucket exists but this key may not head it
                    info!("Bucket {bucket} exists but access is forbidden (403 Forbidden)");
                    Ok(true)
                } else {
                    error!("Error checking if bucket exists: {e}");
                    Err(StorageError::Aws(error_string))
                }
            }
        }
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: Option<&str>,
    ) -> Result<Vec<StorageObject>, StorageError> {
        let mut objects = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .set_continuation_token(continuation_token.take());
            if let Some(prefix) = prefix {
                request = request.prefix(prefix);
            }

            let page = request.send().await.map_err(|e| {
                error!("Failed to list objects in bucket {bucket}: {e}");
                StorageError::Aws(e.to_string())
            })?;

            objects.extend(page.contents().iter().map(|obj| self.convert_s3_object(obj)));

            match (page.is_truncated(), page.next_continuation_token()) {
                (Some(true), Some(token)) => continuation_token = Some(token.to_string()),
                _ => break,
            }
        }

        Ok(objects)
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let msg = e.to_string();
                if msg.contains("NotFound") || msg.contains("404") {
                    StorageError::NotFound(format!("Object {bucket}/{key} not found"))
                } else {
                    StorageError::Aws(msg)
                }
            })?;
        Ok(())
    }

    async fn upload_stream(
        &self,
        bucket: &str,
        key: &str,
        stream: ByteStream,
        content_type: Option<&str>,
        metadata: Option<Metadata>,
    ) -> Result<(), StorageError> {
        let upload_id = self
            .initiate_multipart_upload(bucket, key, content_type, metadata)
            .await?;

        let parts = match self.stream_parts(bucket, key, &upload_id, stream).await {
            Ok(parts) => parts,
            Err(e) => {
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!("Failed to abort multipart upload for {bucket}/{key}: {abort_err}");
                }
                return Err(e);
            }
        };

        let completed_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(parts))
            .build();
        self.client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(&upload_id)
            .multipart_upload(completed_upload)
            .send()
            .await
            .map_err(|e| {
                error!("Failed to complete multipart upload for {bucket}/{key}: {e:?}");
                report_s3_error_to_sentry("upload_stream:complete_multipart_upload", &e, bucket, key);
                StorageError::Aws(e.to_string())
            })?;
        info!("Multipart upload completed: {}/{}", bucket, key);
        Ok(())
    }
}

fn report_s3_error_to_sentry(
    operation: &str,
    error: &dyn std::error::Error,
    bucket: &str,
    key: &str,
) {
    let mut extra = HashMap::new();
    extra.insert("bucket", bucket);
    extra.insert("key", key);

    let error_message = format!("{operation}: {error}");
    let extra_json = serde_json::to_string(&extra).unwrap_or_default();
    let sentry_message = format!("{error_message} | context: {extra_json}");
    sentry::capture_message(&sentry_message, sentry::Level::Error);
}
