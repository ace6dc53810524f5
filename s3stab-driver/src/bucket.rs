//! A [`BucketWorkload`] that churns through buckets filled with small objects.

use std::time::Duration;

use anyhow::{Context, Result, bail, ensure};
use bytesize::ByteSize;
use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};
use s3stab_plan::{SizeSpec, TestCase};

use crate::backend::S3Backend;
use crate::multipart::WorkloadSummary;
use crate::workload::{
    DEFAULT_DURATION, MIN_DURATION, Payload, monotonic_ns, sample_size, workload_id,
};

/// Objects uploaded per iteration if a test does not set `number_of_objects`.
pub const DEFAULT_NUMBER_OF_OBJECTS: u64 = 500;

/// A builder for creating a [`BucketWorkload`].
#[derive(Debug)]
pub struct BucketWorkloadBuilder {
    test_id: Option<String>,
    session: Option<u64>,
    seed: u64,

    object_size: SizeSpec,
    number_of_objects: u64,

    duration: Option<Duration>,
}

impl BucketWorkloadBuilder {
    /// Identifies the workload in bucket names.
    pub fn test_id(mut self, test_id: impl Into<String>) -> Self {
        self.test_id = Some(test_id.into());
        self
    }

    /// Marks the workload as one of several concurrent sessions of a test.
    pub fn session(mut self, session: u64) -> Self {
        self.session = Some(session);
        self
    }

    /// Seed for the RNG driving object sizes and payloads.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Objects uploaded into every bucket.
    pub fn number_of_objects(mut self, number_of_objects: u64) -> Self {
        self.number_of_objects = number_of_objects;
        self
    }

    /// How long the workload keeps iterating.
    pub fn duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Creates the workload instance. The deadline starts counting now.
    pub fn build(self) -> BucketWorkload {
        let mut rng = SmallRng::seed_from_u64(self.seed);
        let test_id = workload_id(self.test_id.as_deref(), self.session, &mut rng);
        let duration = self.duration.unwrap_or(DEFAULT_DURATION);

        BucketWorkload {
            test_id,
            rng,
            object_size: self.object_size,
            number_of_objects: self.number_of_objects,
            finish_time: tokio::time::Instant::now() + duration,
            min_duration: MIN_DURATION,
            iteration: 1,
        }
    }
}

/// A long-running workload of bucket lifecycles.
///
/// Every iteration creates a fresh bucket, uploads objects into it, checks that the bucket and
/// its objects show up in the listings, heads the bucket and force-deletes it again.
#[derive(Debug)]
pub struct BucketWorkload {
    pub(crate) test_id: String,
    pub(crate) rng: SmallRng,
    pub(crate) object_size: SizeSpec,
    pub(crate) number_of_objects: u64,

    pub(crate) finish_time: tokio::time::Instant,
    pub(crate) min_duration: Duration,
    /// The current, 1-based iteration.
    pub(crate) iteration: u64,
}

impl BucketWorkload {
    /// Constructs a new workload builder uploading objects of the given sizes.
    pub fn builder(object_size: SizeSpec) -> BucketWorkloadBuilder {
        BucketWorkloadBuilder {
            test_id: None,
            session: None,
            seed: rand::random(),

            object_size,
            number_of_objects: DEFAULT_NUMBER_OF_OBJECTS,

            duration: None,
        }
    }

    /// Constructs a builder configured from a test of a plan.
    pub fn for_test(test: &TestCase) -> BucketWorkloadBuilder {
        Self::builder(test.object_size.clone())
            .test_id(test.name.as_str())
            .number_of_objects(test.number_of_objects.unwrap_or(DEFAULT_NUMBER_OF_OBJECTS))
            .duration(test.min_runtime)
    }

    /// The sanitized test id used in bucket names.
    pub fn test_id(&self) -> &str {
        &self.test_id
    }

    /// Runs bucket iterations until the deadline is reached.
    ///
    /// The first failing operation aborts the run and leaves the bucket of that iteration in
    /// place for inspection.
    pub async fn execute_bucket_workload(
        &mut self,
        backend: &dyn S3Backend,
    ) -> Result<WorkloadSummary> {
        let start = tokio::time::Instant::now();
        let mut summary = WorkloadSummary::default();

        loop {
            tracing::info!(iteration = self.iteration, "Iteration is started");
            let bucket = format!(
                "bucket-op-{}-i{}-{}",
                self.test_id,
                self.iteration,
                monotonic_ns()
            );

            if let Err(err) = self.run_iteration(backend, &bucket, &mut summary).await {
                tracing::error!(
                    error = ?err,
                    url = %format!("s3://{bucket}"),
                    iteration = self.iteration,
                    "bucket iteration failed"
                );
                return Err(err.context(format!("iteration {} failed", self.iteration)));
            }
            summary.iterations += 1;
            tracing::info!(iteration = self.iteration, "Iteration is completed");

            let remaining = self
                .finish_time
                .saturating_duration_since(tokio::time::Instant::now());
            if remaining < self.min_duration {
                summary.elapsed = start.elapsed();
                tracing::info!(
                    iterations = summary.iterations,
                    "Bucket operation execution completed successfully."
                );
                return Ok(summary);
            }

            self.iteration += 1;
        }
    }

    async fn run_iteration(
        &mut self,
        backend: &dyn S3Backend,
        bucket: &str,
        summary: &mut WorkloadSummary,
    ) -> Result<()> {
        let object_size = sample_size(&self.object_size, &mut self.rng);

        tracing::info!(%bucket, "Create bucket");
        backend
            .create_bucket(bucket)
            .await
            .with_context(|| format!("Failed to create bucket: {bucket}"))?;

        tracing::info!(
            %bucket,
            objects = self.number_of_objects,
            object_size = %ByteSize::b(object_size),
            "Upload objects"
        );
        let mut keys = Vec::with_capacity(self.number_of_objects as usize);
        for index in 1..=self.number_of_objects {
            let key = format!("object-{index}-{}", monotonic_ns());
            let payload = Payload {
                len: object_size,
                rng: SmallRng::seed_from_u64(self.rng.next_u64()),
            };
            let etag = backend
                .put_object(bucket, &key, payload.into_bytes())
                .await
                .with_context(|| format!("Failed to upload s3://{bucket}/{key}"))?;
            ensure!(!etag.is_empty(), "Failed upload object: {key}");
            summary.bytes_written += object_size;
            keys.push(key);
        }

        tracing::info!("List all buckets");
        let buckets = backend
            .list_buckets()
            .await
            .context("Failed to list buckets")?;
        ensure!(
            buckets.iter().any(|name| name == bucket),
            "Failed to list buckets: {bucket} is missing"
        );

        tracing::info!(%bucket, "List objects of created bucket");
        let objects = backend
            .list_objects(bucket)
            .await
            .with_context(|| format!("Failed to list objects of {bucket}"))?;
        let mut listed: Vec<_> = objects.iter().map(|object| object.key.as_str()).collect();
        listed.sort_unstable();
        keys.sort_unstable();
        ensure!(
            listed == keys,
            "Failed to list objects of {bucket}: expected {}, listed {}",
            keys.len(),
            listed.len()
        );
        if let Some(object) = objects.iter().find(|object| object.size != object_size) {
            bail!(
                "Failed to list objects of {bucket}: {} has {} bytes, expected {object_size}",
                object.key,
                object.size
            );
        }

        tracing::info!(%bucket, "Perform head bucket");
        backend
            .head_bucket(bucket)
            .await
            .with_context(|| format!("Failed to do head bucket on {bucket}"))?;

        tracing::info!(%bucket, "Delete bucket with all objects in it");
        backend
            .delete_bucket(bucket, true)
            .await
            .with_context(|| format!("Failed to delete bucket: {bucket}"))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use s3stab_plan::ByteRange;

    use super::*;
    use crate::backend::InMemoryBackend;

    #[tokio::test]
    async fn iterates_until_deadline() {
        let backend = InMemoryBackend::new();
        let mut workload = BucketWorkload::builder(SizeSpec::Range(ByteRange::fixed(64)))
            .number_of_objects(3)
            .seed(5)
            .build();
        workload.finish_time = tokio::time::Instant::now() + Duration::from_millis(50);
        workload.min_duration = Duration::from_millis(1);

        let summary = workload.execute_bucket_workload(&backend).await.unwrap();

        assert!(summary.iterations > 1);
        assert_eq!(workload.iteration, summary.iterations);
        assert_eq!(summary.bytes_written, summary.iterations * 3 * 64);
        assert_eq!(summary.bytes_read, 0);
        assert!(backend.bucket_names().is_empty());
    }

    #[test]
    fn builder_from_test() {
        let plan = s3stab_plan::parse_plan(
            "plan",
            "Bucket_Test:\n  workload: bucket\n  object_size: 1KB\n  min_runtime: 0s\n",
            1,
        )
        .unwrap();

        let workload = BucketWorkload::for_test(&plan.tests[0]).session(2).build();
        assert_eq!(workload.test_id(), "bucket-test-s2");
        assert_eq!(workload.number_of_objects, DEFAULT_NUMBER_OF_OBJECTS);
    }
}
