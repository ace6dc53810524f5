use std::fmt;

use anyhow::{Context, Result};
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{
    BehaviorVersion, Credentials, Region, RequestChecksumCalculation,
    ResponseChecksumValidation,
};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    BucketLocationConstraint, CompletedMultipartUpload, CompletedPart, CreateBucketConfiguration,
};
use bytes::Bytes;
use futures::StreamExt;

use super::{
    BackendStream, ListedObject, ListedPart, ObjectHead, PendingUpload, ReadRange, S3Backend,
    UploadedPart,
};

const DEFAULT_REGION: &str = "us-east-1";

/// An [`S3Backend`] talking to a live S3-compatible endpoint through the AWS SDK.
pub struct AwsBackend {
    client: Client,
    endpoint: String,
    region: String,
}

impl AwsBackend {
    /// Creates a path-style client for the given endpoint URL and static credentials.
    pub fn new(endpoint: &str, region: &str, access_key: &str, secret_key: &str) -> Self {
        let credentials = Credentials::new(access_key, secret_key, None, None, "s3stab");

        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(endpoint)
            .region(Region::new(region.to_owned()))
            .credentials_provider(credentials)
            .force_path_style(true)
            // S3-compatible stores frequently reject the flexible checksum trailers.
            .request_checksum_calculation(RequestChecksumCalculation::WhenRequired)
            .response_checksum_validation(ResponseChecksumValidation::WhenRequired)
            .build();

        Self {
            client: Client::from_conf(config),
            endpoint: endpoint.to_owned(),
            region: region.to_owned(),
        }
    }

    async fn delete_all_objects(&self, bucket: &str) -> Result<()> {
        for object in self.list_objects(bucket).await? {
            tracing::debug!(bucket, key = %object.key, "deleting object");
            self.client
                .delete_object()
                .bucket(bucket)
                .key(&object.key)
                .send()
                .await
                .with_context(|| format!("failed to delete s3://{bucket}/{}", object.key))?;
        }
        Ok(())
    }

    async fn abort_all_uploads(&self, bucket: &str) -> Result<()> {
        for upload in self.list_multipart_uploads(bucket).await? {
            tracing::debug!(bucket, key = %upload.key, "aborting multipart upload");
            self.client
                .abort_multipart_upload()
                .bucket(bucket)
                .key(&upload.key)
                .upload_id(&upload.upload_id)
                .send()
                .await
                .with_context(|| format!("failed to abort upload {}", upload.upload_id))?;
        }
        Ok(())
    }
}

impl fmt::Debug for AwsBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsBackend")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

fn sdk_part_number(part_number: u32) -> Result<i32> {
    i32::try_from(part_number).with_context(|| format!("part number {part_number} out of range"))
}

#[async_trait::async_trait]
impl S3Backend for AwsBackend {
    fn name(&self) -> &'static str {
        "aws-sdk"
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn create_bucket(&self, bucket: &str) -> Result<()> {
        let mut request = self.client.create_bucket().bucket(bucket);
        if self.region != DEFAULT_REGION {
            let constraint = CreateBucketConfiguration::builder()
                .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                .build();
            request = request.create_bucket_configuration(constraint);
        }

        request
            .send()
            .await
            .with_context(|| format!("failed to create bucket {bucket}"))?;
        Ok(())
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn delete_bucket(&self, bucket: &str, force: bool) -> Result<()> {
        if force {
            self.abort_all_uploads(bucket).await?;
            self.delete_all_objects(bucket).await?;
        }

        self.client
            .delete_bucket()
            .bucket(bucket)
            .send()
            .await
            .with_context(|| format!("failed to delete s3 bucket {bucket}"))?;
        Ok(())
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn head_bucket(&self, bucket: &str) -> Result<()> {
        self.client
            .head_bucket()
            .bucket(bucket)
            .send()
            .await
            .with_context(|| format!("failed to do head bucket on {bucket}"))?;
        Ok(())
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn list_buckets(&self) -> Result<Vec<String>> {
        let mut buckets = Vec::new();
        let mut continuation = None;
        loop {
            let page = self
                .client
                .list_buckets()
                .set_continuation_token(continuation)
                .send()
                .await
                .context("failed to list buckets")?;

            buckets.extend(
                page.buckets()
                    .iter()
                    .filter_map(|bucket| bucket.name().map(str::to_owned)),
            );

            continuation = page.continuation_token().map(str::to_owned);
            if continuation.is_none() {
                return Ok(buckets);
            }
        }
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn list_objects(&self, bucket: &str) -> Result<Vec<ListedObject>> {
        let mut objects = Vec::new();
        let mut continuation = None;
        loop {
            let page = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .set_continuation_token(continuation)
                .send()
                .await
                .with_context(|| format!("failed to list objects of {bucket}"))?;

            objects.extend(page.contents().iter().filter_map(|object| {
                Some(ListedObject {
                    key: object.key()?.to_owned(),
                    size: object
                        .size()
                        .and_then(|size| u64::try_from(size).ok())
                        .unwrap_or_default(),
                })
            }));

            continuation = page.next_continuation_token().map(str::to_owned);
            if !page.is_truncated().unwrap_or(false) || continuation.is_none() {
                return Ok(objects);
            }
        }
    }

    #[tracing::instrument(level = "trace", skip(self, body))]
    async fn put_object(&self, bucket: &str, key: &str, body: Bytes) -> Result<String> {
        let response = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .with_context(|| format!("failed to upload s3://{bucket}/{key}"))?;

        response
            .e_tag()
            .map(str::to_owned)
            .with_context(|| format!("no ETag returned for s3://{bucket}/{key}"))
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<ReadRange>,
    ) -> Result<BackendStream> {
        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .set_range(range.map(|range| range.to_string()))
            .send()
            .await
            .with_context(|| format!("failed to get s3://{bucket}/{key}"))?;

        let stream = futures::stream::try_unfold(response.body, |mut body| async move {
            let chunk = body.try_next().await?;
            Ok::<_, anyhow::Error>(chunk.map(|chunk| (chunk, body)))
        });

        Ok(stream.boxed())
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectHead> {
        let response = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("failed to do head object on s3://{bucket}/{key}"))?;

        let content_length = response
            .content_length()
            .and_then(|len| u64::try_from(len).ok())
            .with_context(|| format!("no content length for s3://{bucket}/{key}"))?;

        Ok(ObjectHead {
            content_length,
            etag: response.e_tag().map(str::to_owned),
        })
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn create_multipart_upload(&self, bucket: &str, key: &str) -> Result<String> {
        let response = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("failed to initiate multipart upload of {key}"))?;

        response
            .upload_id()
            .map(str::to_owned)
            .with_context(|| format!("no upload id returned for s3://{bucket}/{key}"))
    }

    #[tracing::instrument(level = "trace", skip(self, body))]
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> Result<String> {
        let response = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(sdk_part_number(part_number)?)
            .body(ByteStream::from(body))
            .send()
            .await
            .with_context(|| format!("failed to upload part {part_number} of {key}"))?;

        response
            .e_tag()
            .map(str::to_owned)
            .with_context(|| format!("no ETag returned for part {part_number} of {key}"))
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn upload_part_copy(
        &self,
        source_bucket: &str,
        source_key: &str,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
    ) -> Result<String> {
        let response = self
            .client
            .upload_part_copy()
            .copy_source(format!("{source_bucket}/{source_key}"))
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(sdk_part_number(part_number)?)
            .send()
            .await
            .with_context(|| format!("failed to copy part {part_number} of {key}"))?;

        response
            .copy_part_result()
            .and_then(|result| result.e_tag())
            .map(str::to_owned)
            .with_context(|| format!("no ETag returned for copied part {part_number} of {key}"))
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn list_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<Vec<ListedPart>> {
        let mut parts = Vec::new();
        let mut marker = None;
        loop {
            let page = self
                .client
                .list_parts()
                .bucket(bucket)
                .key(key)
                .upload_id(upload_id)
                .set_part_number_marker(marker)
                .send()
                .await
                .with_context(|| format!("failed to list parts of {key}"))?;

            for part in page.parts() {
                parts.push(ListedPart {
                    part_number: part
                        .part_number()
                        .and_then(|n| u32::try_from(n).ok())
                        .context("listed part without part number")?,
                    etag: part.e_tag().unwrap_or_default().to_owned(),
                    size: part
                        .size()
                        .and_then(|s| u64::try_from(s).ok())
                        .unwrap_or_default(),
                });
            }

            marker = page.next_part_number_marker().map(str::to_owned);
            if !page.is_truncated().unwrap_or(false) || marker.is_none() {
                return Ok(parts);
            }
        }
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn list_multipart_uploads(&self, bucket: &str) -> Result<Vec<PendingUpload>> {
        let mut uploads = Vec::new();
        let mut key_marker = None;
        let mut upload_id_marker = None;
        loop {
            let page = self
                .client
                .list_multipart_uploads()
                .bucket(bucket)
                .set_key_marker(key_marker)
                .set_upload_id_marker(upload_id_marker)
                .send()
                .await
                .with_context(|| format!("failed to list multipart uploads of {bucket}"))?;

            uploads.extend(page.uploads().iter().filter_map(|upload| {
                Some(PendingUpload {
                    key: upload.key()?.to_owned(),
                    upload_id: upload.upload_id()?.to_owned(),
                })
            }));

            key_marker = page.next_key_marker().map(str::to_owned);
            upload_id_marker = page.next_upload_id_marker().map(str::to_owned);
            if !page.is_truncated().unwrap_or(false) || key_marker.is_none() {
                return Ok(uploads);
            }
        }
    }

    #[tracing::instrument(level = "trace", skip(self, parts))]
    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> Result<()> {
        let completed_parts = parts
            .iter()
            .map(|part| {
                Ok(CompletedPart::builder()
                    .part_number(sdk_part_number(part.part_number)?)
                    .e_tag(&part.etag)
                    .build())
            })
            .collect::<Result<Vec<_>>>()?;

        let upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(upload)
            .send()
            .await
            .with_context(|| format!("failed to complete multipart upload of {key}"))?;
        Ok(())
    }
}
