//! Blackbox tests running bucket workloads against the in-memory backend.

use std::time::Duration;

use s3stab_driver::backend::InMemoryBackend;
use s3stab_driver::bucket::BucketWorkload;
use s3stab_plan::{ByteRange, SizeSpec};

#[tokio::test]
async fn completes_and_removes_bucket() {
    let backend = InMemoryBackend::new();
    let mut workload = BucketWorkload::builder(SizeSpec::Range(ByteRange::fixed(512)))
        .test_id("Bucket_Ops")
        .seed(1)
        .number_of_objects(5)
        .duration(Duration::ZERO)
        .build();
    assert_eq!(workload.test_id(), "bucket-ops");

    let summary = workload.execute_bucket_workload(&backend).await.unwrap();

    assert_eq!(summary.iterations, 1);
    assert_eq!(summary.bytes_written, 5 * 512);
    assert!(backend.bucket_names().is_empty());
}

#[tokio::test]
async fn sizes_are_drawn_per_iteration() {
    let backend = InMemoryBackend::new();
    let mut workload = BucketWorkload::builder(SizeSpec::Choices(vec![100, 300]))
        .seed(8)
        .number_of_objects(4)
        .duration(Duration::ZERO)
        .build();

    let summary = workload.execute_bucket_workload(&backend).await.unwrap();

    assert!([400, 1200].contains(&summary.bytes_written));
}

#[tokio::test]
async fn failed_teardown_keeps_the_bucket() {
    let backend = InMemoryBackend::new();
    backend.reject_bucket_deletes(true);

    let mut workload = BucketWorkload::builder(SizeSpec::Range(ByteRange::fixed(16)))
        .test_id("teardown")
        .number_of_objects(3)
        .duration(Duration::ZERO)
        .build();

    let error = workload.execute_bucket_workload(&backend).await.unwrap_err();

    let buckets = backend.bucket_names();
    assert_eq!(buckets.len(), 1);
    assert!(buckets[0].starts_with("bucket-op-teardown-i1-"));
    assert_eq!(backend.object_count(&buckets[0]), Some(3));

    let message = format!("{error:#}");
    assert!(message.contains("iteration 1 failed"));
    assert!(message.contains(&format!("Failed to delete bucket: {}", buckets[0])));
}
