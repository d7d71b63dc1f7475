//! Backup destinations.
//!
//! Artifacts produced on a remote host end up either in an S3-compatible
//! bucket or on another host reachable over SFTP. Both are exposed through
//! [`DestinationSink`], which streams the artifact without holding it in
//! memory. The S3 side goes through [`StorageProvider`] so it can be swapped
//! for an in-memory provider in tests.

mod error;
pub mod providers;
pub mod sink;
mod types;

pub use error::StorageError;
pub use providers::*;
pub use sink::{full_path, DestinationSink, ObjectStorageSink, SftpSink, StoredArtifact};
pub use types::*;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// Core storage provider interface for S3-compatible storage services.
#[async_trait]
pub trait StorageProvider: Send + Sync + 'static {
    /// Returns the name of the storage provider.
    fn name(&self) -> &str;

    /// Checks if a bucket exists.
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, StorageError>;

    /// Lists objects in a bucket with an optional prefix.
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: Option<&str>,
    ) -> Result<Vec<StorageObject>, StorageError>;

    /// Deletes an object.
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StorageError>;

    /// Uploads everything `stream` yields under `key`.
    async fn upload_stream(
        &self,
        bucket: &str,
        key: &str,
        stream: ByteStream,
        content_type: Option<&str>,
        metadata: Option<Metadata>,
    ) -> Result<(), StorageError>;
}
