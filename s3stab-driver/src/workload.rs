//! A module for defining a [`MultipartWorkload`] that exercises S3 multipart uploads.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

use anyhow::{Result, ensure};
use bytes::Bytes;
use rand::rngs::SmallRng;
use rand::{Rng, RngCore, SeedableRng};
use s3stab_plan::{ByteRange, CountRange, MAX_PARTS, RangeRead, SizeSpec, TestCase};

use crate::backend::ReadRange;

/// Iterations stop once less than this much time is left before the deadline.
pub const MIN_DURATION: Duration = Duration::from_secs(10);

/// How long a workload runs if no duration is configured.
pub const DEFAULT_DURATION: Duration = Duration::from_secs(100 * 24 * 60 * 60);

/// Part counts used when a test defines neither `part_range` nor `part_size`.
pub const DEFAULT_PART_RANGE: CountRange = CountRange { start: 1, end: 10 };

const MAX_TEST_ID_LEN: usize = 24;

/// Nanoseconds elapsed on a process-wide monotonic clock, used to make resource names unique.
pub(crate) fn monotonic_ns() -> u128 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_nanos()
}

/// Normalizes a test id so it can be embedded in bucket names, keeping at most `max_len` chars.
fn sanitize_test_id(test_id: &str, max_len: usize) -> String {
    let id: String = test_id
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .take(max_len)
        .collect();
    id.trim_matches('-').to_owned()
}

/// Builds the id a workload uses in resource names.
///
/// The session suffix is appended after truncation, so sessions of the same test never share an
/// id. Without a usable test id, a random number stands in.
pub(crate) fn workload_id(
    test_id: Option<&str>,
    session: Option<u64>,
    rng: &mut SmallRng,
) -> String {
    let suffix = session.map(|session| format!("-s{session}")).unwrap_or_default();
    let max_len = MAX_TEST_ID_LEN.saturating_sub(suffix.len()).max(1);

    let mut id = test_id
        .map(|id| sanitize_test_id(id, max_len))
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| rng.random_range(24..240u32).to_string());
    id.push_str(&suffix);
    id
}

/// A builder for creating a [`MultipartWorkload`].
#[derive(Debug)]
pub struct MultipartWorkloadBuilder {
    test_id: Option<String>,
    session: Option<u64>,
    seed: u64,

    object_size: SizeSpec,
    part_size: SizeSpec,
    part_range: Option<CountRange>,
    part_copy: bool,
    range_read: Option<RangeRead>,

    duration: Option<Duration>,
}

impl MultipartWorkloadBuilder {
    /// Identifies the workload in bucket and object names.
    pub fn test_id(mut self, test_id: impl Into<String>) -> Self {
        self.test_id = Some(test_id.into());
        self
    }

    /// Marks the workload as one of several concurrent sessions of a test.
    pub fn session(mut self, session: u64) -> Self {
        self.session = Some(session);
        self
    }

    /// Seed for the RNG driving sizes, part choices and payloads.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Number of parts per upload.
    pub fn part_range(mut self, part_range: CountRange) -> Self {
        self.part_range = Some(part_range);
        self
    }

    /// Size of each part, used to derive the part count if no part range is set.
    pub fn part_size(mut self, part_size: SizeSpec) -> Self {
        self.part_size = part_size;
        self
    }

    /// Replace one randomly chosen part of every upload with an `UploadPartCopy`.
    pub fn part_copy(mut self, part_copy: bool) -> Self {
        self.part_copy = part_copy;
        self
    }

    /// Issue a ranged read after every completed upload.
    pub fn range_read(mut self, range_read: Option<RangeRead>) -> Self {
        self.range_read = range_read;
        self
    }

    /// How long the workload keeps iterating.
    pub fn duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Creates the workload instance. The deadline starts counting now.
    pub fn build(self) -> MultipartWorkload {
        let mut rng = SmallRng::seed_from_u64(self.seed);

        let test_id = workload_id(self.test_id.as_deref(), self.session, &mut rng);

        let duration = self.duration.unwrap_or(DEFAULT_DURATION);

        MultipartWorkload {
            test_id,
            rng,
            object_size: self.object_size,
            part_size: self.part_size,
            part_range: self.part_range,
            part_copy: self.part_copy,
            range_read: self.range_read,
            finish_time: tokio::time::Instant::now() + duration,
            min_duration: MIN_DURATION,
            iteration: 1,
        }
    }
}

/// A long-running multipart upload workload against a single bucket.
///
/// Every iteration uploads one object in parts, verifies it and optionally reads a range back.
/// See [`execute_multipart_workload`](Self::execute_multipart_workload).
#[derive(Debug)]
pub struct MultipartWorkload {
    /// Identifies the workload in bucket and object names.
    pub(crate) test_id: String,

    /// The RNG driving all our random choices.
    pub(crate) rng: SmallRng,
    pub(crate) object_size: SizeSpec,
    pub(crate) part_size: SizeSpec,
    pub(crate) part_range: Option<CountRange>,
    pub(crate) part_copy: bool,
    pub(crate) range_read: Option<RangeRead>,

    /// Wall-clock deadline of the workload.
    pub(crate) finish_time: tokio::time::Instant,
    pub(crate) min_duration: Duration,
    /// The current, 1-based iteration.
    pub(crate) iteration: u64,
}

impl MultipartWorkload {
    /// Constructs a new workload builder uploading objects of the given sizes.
    pub fn builder(object_size: SizeSpec) -> MultipartWorkloadBuilder {
        MultipartWorkloadBuilder {
            test_id: None,
            session: None,
            seed: rand::random(),

            object_size,
            part_size: SizeSpec::zero(),
            part_range: None,
            part_copy: false,
            range_read: None,

            duration: None,
        }
    }

    /// Constructs a builder configured from a test of a plan.
    pub fn for_test(test: &TestCase) -> MultipartWorkloadBuilder {
        let mut builder = Self::builder(test.object_size.clone())
            .test_id(test.name.as_str())
            .part_size(test.part_size.clone())
            .part_copy(test.part_copy)
            .range_read(test.range_read)
            .duration(test.min_runtime);
        if let Some(part_range) = test.part_range {
            builder = builder.part_range(part_range);
        }
        builder
    }

    /// The sanitized test id used in resource names.
    pub fn test_id(&self) -> &str {
        &self.test_id
    }

    pub(crate) fn sample_object_size(&mut self) -> u64 {
        sample_size(&self.object_size, &mut self.rng)
    }

    /// Picks the number of parts for an object, never more than [`MAX_PARTS`].
    pub(crate) fn sample_part_count(&mut self, object_size: u64) -> Result<u64> {
        let parts = match self.part_range {
            Some(range) => sample_count(range, &mut self.rng),
            None if !self.part_size.is_zero() => {
                let part_size = sample_size(&self.part_size, &mut self.rng).max(1);
                object_size.div_ceil(part_size).max(1)
            }
            None => sample_count(DEFAULT_PART_RANGE, &mut self.rng),
        };

        ensure!(parts >= 1, "Number of parts should be at least 1");
        ensure!(
            parts <= MAX_PARTS,
            "Number of parts should be equal/less than 10k, got {parts}"
        );
        Ok(parts)
    }

    /// Picks the byte range to read back from an object of the given length.
    pub(crate) fn sample_read_range(&mut self, object_len: u64) -> Option<ReadRange> {
        let (start, end) = match self.range_read? {
            RangeRead::UpTo(end) if end > 1 => (self.rng.random_range(1..end), end),
            RangeRead::UpTo(end) => (0, end),
            RangeRead::Fixed { start, end } => (start, end),
        };

        if object_len == 0 {
            return None;
        }
        let end = end.min(object_len - 1);
        Some(ReadRange {
            start: start.min(end),
            end,
        })
    }

    pub(crate) fn next_payload(&mut self, len: u64) -> Payload {
        Payload {
            len,
            rng: SmallRng::seed_from_u64(self.rng.next_u64()),
        }
    }
}

pub(crate) fn sample_size(spec: &SizeSpec, rng: &mut SmallRng) -> u64 {
    match spec {
        SizeSpec::Range(ByteRange { start, end }) if end > start => rng.random_range(*start..*end),
        SizeSpec::Range(range) => range.start,
        SizeSpec::Choices(choices) if choices.is_empty() => 0,
        SizeSpec::Choices(choices) => choices[rng.random_range(0..choices.len())],
    }
}

fn sample_count(range: CountRange, rng: &mut SmallRng) -> u64 {
    if range.end > range.start {
        rng.random_range(range.start..range.end)
    } else {
        range.start
    }
}

/// Randomized contents of a part or object.
#[derive(Debug, Clone)]
pub struct Payload {
    /// The length of the payload in bytes.
    pub len: u64,
    /// The RNG used to fill the payload with random bytes.
    pub rng: SmallRng,
}

impl Payload {
    /// Materializes the payload.
    pub fn into_bytes(mut self) -> Bytes {
        let mut buf = vec![0; self.len as usize];
        self.rng.fill_bytes(&mut buf);
        Bytes::from(buf)
    }
}
