use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_yaml::Value;

use crate::duration::convert_to_duration;
use crate::error::{PlanError, Result};
use crate::size::{ByteRange, convert_to_bytes};

/// The maximum number of parts in a single S3 multipart upload.
pub const MAX_PARTS: u64 = 10_000;

/// A normalized size field of a test, such as `object_size` or `part_size`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SizeSpec {
    /// Draw uniformly from a half-open range. Fixed sizes are single-value ranges.
    Range(ByteRange),
    /// Pick one of the listed sizes.
    Choices(Vec<u64>),
}

impl SizeSpec {
    /// The size used when a test omits `part_size`.
    pub fn zero() -> Self {
        Self::Range(ByteRange { start: 0, end: 0 })
    }

    /// Returns `true` if every size this spec can produce is zero.
    pub fn is_zero(&self) -> bool {
        match self {
            Self::Range(range) => range.end <= 1,
            Self::Choices(choices) => choices.iter().all(|c| *c == 0),
        }
    }
}

/// A half-open range `[start, end)` of multipart part counts.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CountRange {
    /// Inclusive lower bound, at least 1.
    pub start: u64,
    /// Exclusive upper bound.
    pub end: u64,
}

impl CountRange {
    /// The largest part count that can be drawn from this range.
    pub fn max(&self) -> u64 {
        self.end.saturating_sub(1).max(self.start)
    }
}

/// The ranged read performed after each upload.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RangeRead {
    /// Read `bytes=<random start>-<end>` where the start is drawn from `[1, end)`.
    UpTo(u64),
    /// Read exactly `bytes=<start>-<end>` (inclusive, as in the HTTP `Range` header).
    Fixed {
        /// First byte offset.
        start: u64,
        /// Last byte offset.
        end: u64,
    },
}

/// The workload a test runs in each of its sessions.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum WorkloadKind {
    /// Upload objects in parts and verify them. Selected by `workload: multipart`, the default.
    #[default]
    Multipart,
    /// Create a bucket, fill it with objects, list and head it, then force-delete it.
    /// Selected by `workload: bucket`.
    Bucket,
}

/// A single normalized test of a [`TestPlan`].
#[derive(Clone, Debug, PartialEq)]
pub struct TestCase {
    /// The key of the test in the plan, used as the test id.
    pub name: String,
    /// The workload run by every session.
    pub workload: WorkloadKind,
    /// Sizes of the objects uploaded by the workload.
    pub object_size: SizeSpec,
    /// Sizes of individual parts. Zero if the plan does not define them.
    pub part_size: SizeSpec,
    /// Number of parts per multipart upload.
    pub part_range: Option<CountRange>,
    /// Substitute one part of every upload with an `UploadPartCopy`.
    pub part_copy: bool,
    /// Optional ranged read after every upload.
    pub range_read: Option<RangeRead>,
    /// Objects uploaded per iteration of a bucket workload.
    pub number_of_objects: Option<u64>,
    /// How long the test runs.
    pub min_runtime: Duration,
    /// Offset from the start of the plan at which this test begins.
    pub start_time: Duration,
    /// Sessions to run on each node, as written in the plan.
    pub sessions_per_node: Option<u64>,
    /// Total concurrent sessions, `sessions_per_node * number_of_nodes`.
    pub sessions: Option<u64>,
}

/// An ordered collection of tests parsed from one YAML document.
#[derive(Clone, Debug, PartialEq)]
pub struct TestPlan {
    /// The name of the plan, usually the file stem.
    pub name: String,
    /// The tests in document order.
    pub tests: Vec<TestCase>,
}

impl TestPlan {
    /// The time from the start of the plan until its last test is done.
    pub fn total_runtime(&self) -> Duration {
        self.tests
            .iter()
            .map(|test| test.start_time + test.min_runtime)
            .max()
            .unwrap_or_default()
    }
}

/// Parses a test plan YAML file.
///
/// `number_of_nodes` multiplies `sessions_per_node` into [`TestCase::sessions`].
pub fn test_parser(yaml_file: &Path, number_of_nodes: u64) -> Result<TestPlan> {
    tracing::debug!(path = %yaml_file.display(), "YAML file selected for parse");
    let contents = std::fs::read_to_string(yaml_file).map_err(|cause| PlanError::Io {
        path: yaml_file.to_owned(),
        cause,
    })?;

    let name = yaml_file
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();

    parse_plan(&name, &contents, number_of_nodes)
}

/// Loads one plan from a file, or every `.yaml`/`.yml` plan in a directory sorted by file name.
pub fn load_plans(path: &Path, number_of_nodes: u64) -> Result<Vec<TestPlan>> {
    if !path.is_dir() {
        return Ok(vec![test_parser(path, number_of_nodes)?]);
    }

    let io_error = |cause| PlanError::Io {
        path: path.to_owned(),
        cause,
    };
    let mut files = Vec::new();
    for entry in std::fs::read_dir(path).map_err(io_error)? {
        let file = entry.map_err(io_error)?.path();
        let is_yaml = file
            .extension()
            .is_some_and(|ext| ext == "yaml" || ext == "yml");
        if file.is_file() && is_yaml {
            files.push(file);
        }
    }
    files.sort();

    files
        .iter()
        .map(|file: &PathBuf| test_parser(file, number_of_nodes))
        .collect()
}

/// Parses and normalizes a test plan from a YAML string.
pub fn parse_plan(name: &str, yaml: &str, number_of_nodes: u64) -> Result<TestPlan> {
    let document: Value = serde_yaml::from_str(yaml)?;
    let Value::Mapping(mapping) = document else {
        return Err(PlanError::NotAMapping);
    };

    let mut tests = Vec::with_capacity(mapping.len());
    let mut next_start = Duration::ZERO;
    for (key, data) in &mapping {
        let test = key.as_str().ok_or(PlanError::NotAMapping)?;
        let mut case = parse_test(test, data, number_of_nodes)?;

        case.start_time = next_start;
        next_start += case.min_runtime;
        tests.push(case);
    }

    let plan = TestPlan {
        name: name.to_owned(),
        tests,
    };
    tracing::debug!(?plan, "parsed test plan");
    Ok(plan)
}

fn parse_test(test: &str, data: &Value, number_of_nodes: u64) -> Result<TestCase> {
    if !data.is_mapping() {
        return Err(PlanError::InvalidValue {
            test: test.to_owned(),
            field: "test",
            expected: "a mapping of test settings",
        });
    }

    let workload = match data.get("workload") {
        None => WorkloadKind::default(),
        Some(Value::String(kind)) if kind == "multipart" => WorkloadKind::Multipart,
        Some(Value::String(kind)) if kind == "bucket" => WorkloadKind::Bucket,
        Some(_) => {
            return Err(PlanError::InvalidValue {
                test: test.to_owned(),
                field: "workload",
                expected: "either `multipart` or `bucket`",
            });
        }
    };

    let object_size = match data.get("object_size") {
        Some(value) => parse_size(test, "object_size", value)?,
        None => {
            tracing::error!(test, "Object size is compulsory");
            return Err(PlanError::MissingObjectSize {
                test: test.to_owned(),
            });
        }
    };

    let part_size = match data.get("part_size") {
        Some(value) => parse_size(test, "part_size", value)?,
        None => SizeSpec::zero(),
    };

    let part_range = data
        .get("part_range")
        .map(|value| parse_part_range(test, value))
        .transpose()?;

    let part_copy = match data.get("part_copy") {
        None => false,
        Some(Value::Bool(part_copy)) => *part_copy,
        Some(_) => {
            return Err(PlanError::InvalidValue {
                test: test.to_owned(),
                field: "part_copy",
                expected: "a boolean",
            });
        }
    };

    let range_read = data
        .get("range_read")
        .map(|value| parse_range_read(test, value))
        .transpose()?;

    let number_of_objects = data
        .get("number_of_objects")
        .map(|value| positive_integer(test, "number_of_objects", value))
        .transpose()?;

    let min_runtime = match data.get("min_runtime") {
        Some(Value::String(runtime)) => convert_to_duration(runtime)?,
        Some(_) => {
            return Err(PlanError::InvalidValue {
                test: test.to_owned(),
                field: "min_runtime",
                expected: "a duration such as `1d2h3m4s`",
            });
        }
        None => {
            return Err(PlanError::MissingField {
                test: test.to_owned(),
                field: "min_runtime",
            });
        }
    };

    let sessions_per_node = data
        .get("sessions_per_node")
        .map(|value| positive_integer(test, "sessions_per_node", value))
        .transpose()?;
    let sessions = sessions_per_node
        .map(|per_node| {
            per_node
                .checked_mul(number_of_nodes)
                .ok_or_else(|| PlanError::InvalidValue {
                    test: test.to_owned(),
                    field: "sessions_per_node",
                    expected: "small enough to multiply by the number of nodes",
                })
        })
        .transpose()?;

    Ok(TestCase {
        name: test.to_owned(),
        workload,
        object_size,
        part_size,
        part_range,
        part_copy,
        range_read,
        number_of_objects,
        min_runtime,
        start_time: Duration::ZERO,
        sessions_per_node,
        sessions,
    })
}

fn positive_integer(test: &str, field: &'static str, value: &Value) -> Result<u64> {
    match value.as_u64() {
        Some(number) if number > 0 => Ok(number),
        _ => Err(PlanError::InvalidValue {
            test: test.to_owned(),
            field,
            expected: "a positive integer",
        }),
    }
}

fn scalar_bytes(value: &Value) -> Result<u64> {
    match value {
        Value::String(size) => convert_to_bytes(size),
        Value::Number(number) => number
            .as_u64()
            .ok_or_else(|| PlanError::InvalidSize(number.to_string())),
        other => Err(PlanError::InvalidSize(format!("{other:?}"))),
    }
}

fn range_bounds(test: &str, field: &'static str, value: &Value) -> Result<(u64, u64)> {
    match (value.get("start"), value.get("end")) {
        (Some(start), Some(end)) => {
            let (start, end) = (scalar_bytes(start)?, scalar_bytes(end)?);
            if end < start {
                return Err(PlanError::InvalidValue {
                    test: test.to_owned(),
                    field,
                    expected: "a range whose end is not below its start",
                });
            }
            Ok((start, end))
        }
        _ => {
            tracing::error!(test, field, "Please define range using start and end keys");
            Err(PlanError::IncompleteRange {
                test: test.to_owned(),
                field,
            })
        }
    }
}

fn parse_size(test: &str, field: &'static str, value: &Value) -> Result<SizeSpec> {
    match value {
        Value::Mapping(_) => {
            let (start, end) = range_bounds(test, field, value)?;
            Ok(SizeSpec::Range(ByteRange { start, end }))
        }
        Value::Sequence(items) => items
            .iter()
            .map(scalar_bytes)
            .collect::<Result<Vec<_>>>()
            .map(SizeSpec::Choices),
        Value::String(_) | Value::Number(_) => Ok(SizeSpec::Range(ByteRange::fixed(
            scalar_bytes(value)?,
        ))),
        _ => Err(PlanError::InvalidValue {
            test: test.to_owned(),
            field,
            expected: "a size, a list of sizes, or a start/end range",
        }),
    }
}

fn parse_part_range(test: &str, value: &Value) -> Result<CountRange> {
    let range = match value {
        Value::Number(number) => {
            let parts = number.as_u64().unwrap_or_default();
            CountRange {
                start: parts,
                end: parts.saturating_add(1),
            }
        }
        Value::Mapping(_) => {
            let (start, end) = range_bounds(test, "part_range", value)?;
            CountRange { start, end }
        }
        _ => {
            return Err(PlanError::InvalidValue {
                test: test.to_owned(),
                field: "part_range",
                expected: "a part count or a start/end range",
            });
        }
    };

    if range.start == 0 {
        return Err(PlanError::InvalidValue {
            test: test.to_owned(),
            field: "part_range",
            expected: "a range starting at 1 or above",
        });
    }
    if range.max() > MAX_PARTS {
        return Err(PlanError::TooManyParts {
            test: test.to_owned(),
            parts: range.max(),
        });
    }

    Ok(range)
}

fn parse_range_read(test: &str, value: &Value) -> Result<RangeRead> {
    match value {
        Value::Mapping(_) => {
            let (start, end) = range_bounds(test, "range_read", value)?;
            Ok(RangeRead::Fixed { start, end })
        }
        Value::String(_) | Value::Number(_) => match scalar_bytes(value)? {
            end if end > 1 => Ok(RangeRead::UpTo(end)),
            _ => Err(PlanError::InvalidValue {
                test: test.to_owned(),
                field: "range_read",
                expected: "an offset of at least 2 bytes",
            }),
        },
        _ => Err(PlanError::InvalidValue {
            test: test.to_owned(),
            field: "range_read",
            expected: "an offset or a start/end range",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_sizes_become_single_value_ranges() {
        let plan = parse_plan(
            "plan",
            "test_1:\n  object_size: 1KB\n  min_runtime: 1m\n",
            1,
        )
        .unwrap();

        let test = &plan.tests[0];
        assert_eq!(
            test.object_size,
            SizeSpec::Range(ByteRange {
                start: 1024,
                end: 1025
            })
        );
        assert_eq!(test.part_size, SizeSpec::zero());
        assert!(test.part_size.is_zero());
        assert_eq!(test.part_range, None);
        assert!(!test.part_copy);
        assert_eq!(test.sessions, None);
    }

    #[test]
    fn size_lists_and_ranges() {
        let yaml = r#"
test_1:
  object_size: [1KB, 2KB, 512]
  part_size:
    start: 5MiB
    end: 10MiB
  range_read:
    start: 10bytes
    end: 1KB
  min_runtime: 10s
"#;
        let test = parse_plan("plan", yaml, 1).unwrap().tests.remove(0);

        assert_eq!(test.object_size, SizeSpec::Choices(vec![1024, 2048, 512]));
        assert_eq!(
            test.part_size,
            SizeSpec::Range(ByteRange {
                start: 5 << 20,
                end: 10 << 20
            })
        );
        assert_eq!(test.range_read, Some(RangeRead::Fixed { start: 10, end: 1024 }));
    }

    #[test]
    fn range_read_offset() {
        let yaml = "t:\n  object_size: 1MB\n  range_read: 4KB\n  min_runtime: 1s\n";
        let test = parse_plan("plan", yaml, 1).unwrap().tests.remove(0);
        assert_eq!(test.range_read, Some(RangeRead::UpTo(4096)));
    }

    #[test]
    fn missing_object_size_is_rejected() {
        let err = parse_plan("plan", "test_1:\n  min_runtime: 1m\n", 1).unwrap_err();
        assert!(matches!(err, PlanError::MissingObjectSize { test } if test == "test_1"));
    }

    #[test]
    fn missing_min_runtime_is_rejected() {
        let err = parse_plan("plan", "test_1:\n  object_size: 1KB\n", 1).unwrap_err();
        assert!(matches!(
            err,
            PlanError::MissingField {
                field: "min_runtime",
                ..
            }
        ));
    }

    #[test]
    fn incomplete_range_is_rejected() {
        let yaml = "test_1:\n  object_size:\n    start: 1KB\n  min_runtime: 1m\n";
        let err = parse_plan("plan", yaml, 1).unwrap_err();
        assert!(matches!(
            err,
            PlanError::IncompleteRange {
                field: "object_size",
                ..
            }
        ));
    }

    #[test]
    fn part_range_limits() {
        let yaml = "t:\n  object_size: 1GB\n  part_range:\n    start: 1\n    end: 10001\n  min_runtime: 1m\n";
        let test = parse_plan("plan", yaml, 1).unwrap().tests.remove(0);
        assert_eq!(test.part_range.unwrap().max(), MAX_PARTS);

        let yaml = "t:\n  object_size: 1GB\n  part_range:\n    start: 1\n    end: 10002\n  min_runtime: 1m\n";
        let err = parse_plan("plan", yaml, 1).unwrap_err();
        assert!(matches!(err, PlanError::TooManyParts { parts: 10001, .. }));

        let yaml = "t:\n  object_size: 1GB\n  part_range: 0\n  min_runtime: 1m\n";
        assert!(parse_plan("plan", yaml, 1).is_err());
    }

    #[test]
    fn sessions_scale_with_nodes() {
        let yaml = "t:\n  object_size: 1KB\n  min_runtime: 1m\n  sessions_per_node: 3\n";
        let test = parse_plan("plan", yaml, 4).unwrap().tests.remove(0);
        assert_eq!(test.sessions_per_node, Some(3));
        assert_eq!(test.sessions, Some(12));
    }

    #[test]
    fn sessions_overflow_is_rejected() {
        let yaml = "t:\n  object_size: 1KB\n  min_runtime: 1m\n  sessions_per_node: 18446744073709551615\n";
        assert_eq!(
            parse_plan("plan", yaml, 1).unwrap().tests[0].sessions,
            Some(u64::MAX)
        );

        let err = parse_plan("plan", yaml, 2).unwrap_err();
        assert!(matches!(
            err,
            PlanError::InvalidValue {
                field: "sessions_per_node",
                ..
            }
        ));
    }

    #[test]
    fn zero_sessions_are_rejected() {
        let yaml = "t:\n  object_size: 1KB\n  min_runtime: 1m\n  sessions_per_node: 0\n";
        let err = parse_plan("plan", yaml, 3).unwrap_err();
        assert!(matches!(
            err,
            PlanError::InvalidValue {
                field: "sessions_per_node",
                ..
            }
        ));
    }

    #[test]
    fn reversed_ranges_are_rejected() {
        let yaml = "t:\n  object_size:\n    start: 10MB\n    end: 1MB\n  min_runtime: 1m\n";
        let err = parse_plan("plan", yaml, 1).unwrap_err();
        assert!(matches!(
            err,
            PlanError::InvalidValue {
                field: "object_size",
                ..
            }
        ));

        let yaml = "t:\n  object_size: 1MB\n  part_range:\n    start: 8\n    end: 2\n  min_runtime: 1m\n";
        let err = parse_plan("plan", yaml, 1).unwrap_err();
        assert!(matches!(
            err,
            PlanError::InvalidValue {
                field: "part_range",
                ..
            }
        ));

        let yaml = "t:\n  object_size:\n    start: 1MB\n    end: 1MB\n  min_runtime: 1m\n";
        let test = parse_plan("plan", yaml, 1).unwrap().tests.remove(0);
        assert_eq!(
            test.object_size,
            SizeSpec::Range(ByteRange {
                start: 1 << 20,
                end: 1 << 20
            })
        );
    }

    #[test]
    fn tiny_range_read_offsets_are_rejected() {
        for offset in ["0", "1", "1bytes"] {
            let yaml =
                format!("t:\n  object_size: 1MB\n  range_read: {offset}\n  min_runtime: 1s\n");
            let err = parse_plan("plan", &yaml, 1).unwrap_err();
            assert!(
                matches!(
                    err,
                    PlanError::InvalidValue {
                        field: "range_read",
                        ..
                    }
                ),
                "{offset}"
            );
        }

        let yaml = "t:\n  object_size: 1MB\n  range_read: 2\n  min_runtime: 1s\n";
        let test = parse_plan("plan", yaml, 1).unwrap().tests.remove(0);
        assert_eq!(test.range_read, Some(RangeRead::UpTo(2)));
    }

    #[test]
    fn bucket_workloads() {
        let yaml = "t:\n  workload: bucket\n  object_size: 4KB\n  number_of_objects: 20\n  min_runtime: 1m\n";
        let test = parse_plan("plan", yaml, 1).unwrap().tests.remove(0);
        assert_eq!(test.workload, WorkloadKind::Bucket);
        assert_eq!(test.number_of_objects, Some(20));

        let yaml = "t:\n  object_size: 4KB\n  min_runtime: 1m\n";
        let test = parse_plan("plan", yaml, 1).unwrap().tests.remove(0);
        assert_eq!(test.workload, WorkloadKind::Multipart);
        assert_eq!(test.number_of_objects, None);

        let yaml = "t:\n  workload: lifecycle\n  object_size: 4KB\n  min_runtime: 1m\n";
        assert!(matches!(
            parse_plan("plan", yaml, 1),
            Err(PlanError::InvalidValue {
                field: "workload",
                ..
            })
        ));
    }

    #[test]
    fn top_level_must_be_a_mapping() {
        assert!(matches!(
            parse_plan("plan", "- a\n- b\n", 1),
            Err(PlanError::NotAMapping)
        ));
    }
}
