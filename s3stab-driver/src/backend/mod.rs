//! The S3 operations consumed by the workloads.
//!
//! Workloads talk to the object store through the [`S3Backend`] trait. [`AwsBackend`] implements
//! it with the AWS SDK against a live endpoint, [`InMemoryBackend`] keeps everything in a
//! `HashMap` for tests.

use std::fmt::{self, Debug};

use anyhow::Result;
use bytes::Bytes;
use futures::stream::BoxStream;

mod aws;
mod in_memory;

pub use aws::AwsBackend;
pub use in_memory::InMemoryBackend;

/// A type-erased [`S3Backend`] instance.
pub type BoxedBackend = Box<dyn S3Backend>;
/// Streamed contents of a downloaded object.
pub type BackendStream = BoxStream<'static, Result<Bytes>>;

/// A part that has been uploaded as part of a multipart upload.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UploadedPart {
    /// The 1-based part number.
    pub part_number: u32,
    /// The ETag returned for the part.
    pub etag: String,
}

/// A part as reported by `ListParts`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ListedPart {
    /// The 1-based part number.
    pub part_number: u32,
    /// The ETag of the part.
    pub etag: String,
    /// The size of the part in bytes.
    pub size: u64,
}

/// An in-progress multipart upload as reported by `ListMultipartUploads`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PendingUpload {
    /// The object key of the upload.
    pub key: String,
    /// The upload id.
    pub upload_id: String,
}

/// An object as reported by `ListObjectsV2`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ListedObject {
    /// The object key.
    pub key: String,
    /// The size of the object in bytes.
    pub size: u64,
}

/// Object attributes returned by `HeadObject`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ObjectHead {
    /// Size of the object in bytes.
    pub content_length: u64,
    /// The ETag of the object, if the store returned one.
    pub etag: Option<String>,
}

/// An inclusive byte range, rendered as an HTTP `Range` header value.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ReadRange {
    /// First byte offset.
    pub start: u64,
    /// Last byte offset.
    pub end: u64,
}

impl fmt::Display for ReadRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bytes={}-{}", self.start, self.end)
    }
}

/// The S3 API surface needed by the stability workloads.
///
/// All methods fail if the store rejects the request or returns an incomplete response.
#[async_trait::async_trait]
pub trait S3Backend: Debug + Send + Sync + 'static {
    /// The backend name, used for diagnostics.
    fn name(&self) -> &'static str;

    /// Creates a new bucket.
    async fn create_bucket(&self, bucket: &str) -> Result<()>;

    /// Deletes a bucket. With `force`, all objects and pending uploads are removed first.
    async fn delete_bucket(&self, bucket: &str, force: bool) -> Result<()>;

    /// Checks that a bucket exists and is accessible.
    async fn head_bucket(&self, bucket: &str) -> Result<()>;

    /// Lists the names of all buckets owned by the credentials.
    async fn list_buckets(&self) -> Result<Vec<String>>;

    /// Lists all objects in a bucket.
    async fn list_objects(&self, bucket: &str) -> Result<Vec<ListedObject>>;

    /// Uploads a complete object and returns its ETag.
    async fn put_object(&self, bucket: &str, key: &str, body: Bytes) -> Result<String>;

    /// Downloads an object, or the given range of it.
    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<ReadRange>,
    ) -> Result<BackendStream>;

    /// Fetches the attributes of an object.
    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectHead>;

    /// Initiates a multipart upload and returns its upload id.
    async fn create_multipart_upload(&self, bucket: &str, key: &str) -> Result<String>;

    /// Uploads one part and returns its ETag.
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> Result<String>;

    /// Copies an existing object into a part and returns the ETag of the part.
    async fn upload_part_copy(
        &self,
        source_bucket: &str,
        source_key: &str,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
    ) -> Result<String>;

    /// Lists all parts uploaded so far.
    async fn list_parts(&self, bucket: &str, key: &str, upload_id: &str)
    -> Result<Vec<ListedPart>>;

    /// Lists all in-progress multipart uploads in a bucket.
    async fn list_multipart_uploads(&self, bucket: &str) -> Result<Vec<PendingUpload>>;

    /// Completes a multipart upload from the given parts.
    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> Result<()>;
}
