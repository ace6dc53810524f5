//! Blackbox tests for reading test plans from disk.

use std::fs;
use std::time::Duration;

use s3stab_plan::{ByteRange, CountRange, PlanError, SizeSpec, load_plans, test_parser};

const PLAN: &str = r#"
test_1:
  object_size:
    start: 10MiB
    end: 20MiB
  part_range:
    start: 2
    end: 8
  min_runtime: 1h
  sessions_per_node: 2

test_2:
  object_size: 5KB
  part_copy: true
  min_runtime: 1d2h3m4s

test_3:
  object_size: 1GiB
  range_read: 1MiB
  min_runtime: 30m
"#;

#[test]
fn start_times_are_cumulative_runtimes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("multipart.yaml");
    fs::write(&path, PLAN).unwrap();

    let plan = test_parser(&path, 3).unwrap();
    assert_eq!(plan.name, "multipart");

    let names: Vec<_> = plan.tests.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, ["test_1", "test_2", "test_3"]);

    let hour = Duration::from_secs(3600);
    let second_runtime = Duration::from_secs(24 * 3600 + 2 * 3600 + 3 * 60 + 4);
    assert_eq!(plan.tests[0].start_time, Duration::ZERO);
    assert_eq!(plan.tests[1].start_time, hour);
    assert_eq!(plan.tests[1].min_runtime, second_runtime);
    assert_eq!(plan.tests[2].start_time, hour + second_runtime);
    assert_eq!(
        plan.total_runtime(),
        hour + second_runtime + Duration::from_secs(1800)
    );

    let first = &plan.tests[0];
    assert_eq!(
        first.object_size,
        SizeSpec::Range(ByteRange {
            start: 10 << 20,
            end: 20 << 20
        })
    );
    assert_eq!(first.part_range, Some(CountRange { start: 2, end: 8 }));
    assert_eq!(first.sessions, Some(6));
    assert!(plan.tests[1].part_copy);
}

#[test]
fn directory_plans_load_sorted() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("b.yml"),
        "t:\n  object_size: 1KB\n  min_runtime: 1s\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("a.yaml"),
        "t:\n  object_size: 2KB\n  min_runtime: 2s\n",
    )
    .unwrap();
    fs::write(dir.path().join("notes.txt"), "not a plan").unwrap();

    let plans = load_plans(dir.path(), 1).unwrap();
    let names: Vec<_> = plans.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, ["a", "b"]);
}

#[test]
fn missing_file_reports_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing.yaml");

    let err = test_parser(&path, 1).unwrap_err();
    assert!(matches!(err, PlanError::Io { path: p, .. } if p == path));
}
