//! Execution of [`MultipartWorkload`]s against an [`S3Backend`].

use std::time::Duration;

use anyhow::{Context, Result, ensure};
use bytesize::ByteSize;
use futures::StreamExt;
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::backend::{BackendStream, S3Backend, UploadedPart};
use crate::workload::{MultipartWorkload, monotonic_ns};

/// Counters collected while a workload runs.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct WorkloadSummary {
    /// Number of completed iterations.
    pub iterations: u64,
    /// Bytes uploaded as parts or part-copy sources.
    pub bytes_written: u64,
    /// Bytes downloaded for checksum verification and ranged reads.
    pub bytes_read: u64,
    /// Wall-clock time the workload ran.
    pub elapsed: Duration,
}

/// Hashes a downloaded object, returning the hex digest and the number of bytes read.
async fn checksum(mut stream: BackendStream) -> Result<(String, u64)> {
    let mut hasher = Sha256::new();
    let mut len = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        len += chunk.len() as u64;
        hasher.update(&chunk);
    }
    Ok((hex::encode(hasher.finalize()), len))
}

impl MultipartWorkload {
    /// Runs multipart iterations until the deadline is reached.
    ///
    /// A fresh bucket is created up front and force-deleted once fewer than
    /// [`MIN_DURATION`](crate::workload::MIN_DURATION) remain. The first failing operation or
    /// verification aborts the run; the bucket is left in place for inspection.
    pub async fn execute_multipart_workload(
        &mut self,
        backend: &dyn S3Backend,
    ) -> Result<WorkloadSummary> {
        let start = tokio::time::Instant::now();
        let bucket = format!("s3mpart-bkt-{}-{}", self.test_id, monotonic_ns());
        backend
            .create_bucket(&bucket)
            .await
            .with_context(|| format!("Failed to create bucket: {bucket}"))?;
        tracing::info!(%bucket, backend = backend.name(), "created multipart bucket");

        let mut summary = WorkloadSummary::default();
        loop {
            tracing::info!(iteration = self.iteration, "Iteration is started");
            let key = format!("s3mpart-obj-{}-{}", self.test_id, monotonic_ns());
            tracing::info!(%bucket, %key, "multipart object");

            if let Err(err) = self.run_iteration(backend, &bucket, &key, &mut summary).await {
                tracing::error!(
                    error = ?err,
                    url = %format!("s3://{bucket}/{key}"),
                    iteration = self.iteration,
                    "multipart iteration failed"
                );
                return Err(err.context(format!("iteration {} failed", self.iteration)));
            }
            summary.iterations += 1;

            let remaining = self
                .finish_time
                .saturating_duration_since(tokio::time::Instant::now());
            if remaining < self.min_duration {
                backend
                    .delete_bucket(&bucket, true)
                    .await
                    .with_context(|| format!("Failed to delete bucket: {bucket}"))?;
                summary.elapsed = start.elapsed();
                tracing::info!(
                    %bucket,
                    iterations = summary.iterations,
                    "Multipart execution completed successfully."
                );
                return Ok(summary);
            }

            tracing::info!(iteration = self.iteration, "Iteration is completed");
            self.iteration += 1;
        }
    }

    async fn run_iteration(
        &mut self,
        backend: &dyn S3Backend,
        bucket: &str,
        key: &str,
        summary: &mut WorkloadSummary,
    ) -> Result<()> {
        let object_size = self.sample_object_size();
        let parts = self.sample_part_count(object_size)?;
        let part_size = (object_size + parts / 2) / parts;
        tracing::info!(
            object_size = %ByteSize::b(object_size),
            parts,
            part_size = %ByteSize::b(part_size),
            "multipart layout"
        );

        let upload_id = backend.create_multipart_upload(bucket, key).await?;
        ensure!(
            !upload_id.is_empty(),
            "Failed to initiate multipart upload of {key}"
        );

        let copy_part = self.rng.random_range(1..=parts) as u32;
        let mut uploaded = Vec::with_capacity(parts as usize);
        let mut hasher = Sha256::new();

        for part_number in 1..=parts as u32 {
            let body = self.next_payload(part_size).into_bytes();
            hasher.update(&body);
            summary.bytes_written += body.len() as u64;

            let etag = if self.part_copy && part_number == copy_part {
                let source = format!("s3-obj-{}-{}", self.test_id, monotonic_ns());
                let source_etag = backend.put_object(bucket, &source, body).await?;
                ensure!(!source_etag.is_empty(), "Failed upload object: {source}");
                tracing::debug!(part_number, %source, "copying part from object");
                backend
                    .upload_part_copy(bucket, &source, bucket, key, &upload_id, part_number)
                    .await?
            } else {
                backend
                    .upload_part(bucket, key, &upload_id, part_number, body)
                    .await?
            };
            ensure!(!etag.is_empty(), "Failed upload part {part_number}");
            uploaded.push(UploadedPart { part_number, etag });
        }

        let upload_checksum = hex::encode(hasher.finalize());
        tracing::info!(checksum = %upload_checksum, "Checksum of uploaded object");

        let listed = backend.list_parts(bucket, key, &upload_id).await?;
        ensure!(
            listed.len() == uploaded.len(),
            "Failed to list parts: expected {}, listed {}",
            uploaded.len(),
            listed.len()
        );

        let pending = backend.list_multipart_uploads(bucket).await?;
        ensure!(
            pending.iter().any(|upload| upload.upload_id == upload_id),
            "Failed to list multipart uploads: {upload_id} is missing"
        );

        backend
            .complete_multipart_upload(bucket, key, &upload_id, &uploaded)
            .await?;

        let expected_len = part_size * parts;
        let head = backend.head_object(bucket, key).await?;
        ensure!(
            head.content_length == expected_len,
            "Failed to do head object on {key}: expected {expected_len} bytes, found {}",
            head.content_length
        );

        let (download_checksum, downloaded) = checksum(backend.get_object(bucket, key, None).await?)
            .await
            .context("Failed to download object")?;
        summary.bytes_read += downloaded;
        tracing::info!(checksum = %download_checksum, "Checksum of s3 object");
        ensure!(
            upload_checksum == download_checksum,
            "Failed to match checksum: {upload_checksum}, {download_checksum}"
        );

        if let Some(range) = self.sample_read_range(expected_len) {
            tracing::info!(%range, "Get object using suggested range read");
            let (_, read) = checksum(backend.get_object(bucket, key, Some(range)).await?).await?;
            ensure!(
                read > 0,
                "Failed to read {range} from s3://{bucket}/{key}"
            );
            summary.bytes_read += read;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use s3stab_plan::{ByteRange, SizeSpec};

    use super::*;
    use crate::backend::InMemoryBackend;

    #[tokio::test]
    async fn iterates_until_deadline() {
        let backend = InMemoryBackend::new();
        let mut workload = MultipartWorkload::builder(SizeSpec::Range(ByteRange::fixed(256)))
            .seed(5)
            .build();
        workload.finish_time = tokio::time::Instant::now() + Duration::from_millis(50);
        workload.min_duration = Duration::from_millis(1);

        let summary = workload.execute_multipart_workload(&backend).await.unwrap();

        assert!(summary.iterations > 1);
        assert_eq!(workload.iteration, summary.iterations);
        assert!(backend.bucket_names().is_empty());
    }
}
