//! Runs the tests of parsed [`TestPlan`]s as concurrent workload sessions.

use std::time::Duration;

use anyhow::{Context, Result};
use bytesize::ByteSize;
use futures::future::try_join_all;
use s3stab_plan::{TestCase, TestPlan, WorkloadKind};
use tokio::time::Instant;
use tracing::Instrument;
use yansi::Paint;

use crate::backend::S3Backend;
use crate::bucket::BucketWorkload;
use crate::multipart::WorkloadSummary;
use crate::workload::MultipartWorkload;

/// Settings shared by every test of a run.
#[derive(Clone, Copy, Debug)]
pub struct ScheduleOptions {
    /// Base seed. Each session derives its own seed from it.
    pub seed: u64,
    /// Run plans and tests strictly one after another, ignoring start time offsets.
    pub sequential_run: bool,
}

/// The result of one test, with one summary per session.
#[derive(Clone, Debug)]
pub struct TestOutcome {
    /// Name of the plan the test belongs to.
    pub plan: String,
    /// Name of the test.
    pub test: String,
    /// Summaries of all sessions, in session order.
    pub sessions: Vec<WorkloadSummary>,
}

impl TestOutcome {
    fn total(&self) -> WorkloadSummary {
        let mut total = WorkloadSummary::default();
        for session in &self.sessions {
            total.iterations += session.iterations;
            total.bytes_written += session.bytes_written;
            total.bytes_read += session.bytes_read;
            total.elapsed = total.elapsed.max(session.elapsed);
        }
        total
    }
}

fn session_seed(seed: u64, test_index: usize, session: u64) -> u64 {
    seed.wrapping_add((test_index as u64) << 32)
        .wrapping_add(session)
}

async fn run_test(
    backend: &dyn S3Backend,
    plan: &TestPlan,
    test_index: usize,
    test: &TestCase,
    options: ScheduleOptions,
) -> Result<TestOutcome> {
    let sessions = test.sessions.unwrap_or(1);
    tracing::info!(
        sessions,
        workload = ?test.workload,
        min_runtime = %humantime::format_duration(test.min_runtime),
        "starting test"
    );

    let runs = (1..=sessions).map(|session| {
        let seed = session_seed(options.seed, test_index, session);
        async move {
            match test.workload {
                WorkloadKind::Multipart => {
                    let mut workload = MultipartWorkload::for_test(test)
                        .session(session)
                        .seed(seed)
                        .build();
                    workload.execute_multipart_workload(backend).await
                }
                WorkloadKind::Bucket => {
                    let mut workload = BucketWorkload::for_test(test)
                        .session(session)
                        .seed(seed)
                        .build();
                    workload.execute_bucket_workload(backend).await
                }
            }
        }
        .instrument(tracing::info_span!("session", session))
    });

    let summaries = try_join_all(runs)
        .await
        .with_context(|| format!("test {} of plan {} failed", test.name, plan.name))?;

    tracing::info!("test completed");
    Ok(TestOutcome {
        plan: plan.name.clone(),
        test: test.name.clone(),
        sessions: summaries,
    })
}

/// Runs every test of a plan.
///
/// Each test starts once its `start_time` offset from the start of the plan has elapsed, unless
/// `sequential_run` is set. The first failing session aborts the plan.
pub async fn run_plan(
    backend: &dyn S3Backend,
    plan: &TestPlan,
    options: ScheduleOptions,
) -> Result<Vec<TestOutcome>> {
    tracing::info!(
        plan = %plan.name,
        tests = plan.tests.len(),
        total_runtime = %humantime::format_duration(plan.total_runtime()),
        "starting test plan"
    );

    if options.sequential_run {
        let mut outcomes = Vec::with_capacity(plan.tests.len());
        for (index, test) in plan.tests.iter().enumerate() {
            let span = tracing::info_span!("test", plan = %plan.name, test = %test.name);
            outcomes.push(
                run_test(backend, plan, index, test, options)
                    .instrument(span)
                    .await?,
            );
        }
        return Ok(outcomes);
    }

    let plan_start = Instant::now();
    let tests = plan.tests.iter().enumerate().map(|(index, test)| {
        let span = tracing::info_span!("test", plan = %plan.name, test = %test.name);
        async move {
            if !test.start_time.is_zero() {
                tracing::info!(
                    start_time = %humantime::format_duration(test.start_time),
                    "waiting for scheduled start"
                );
            }
            tokio::time::sleep_until(plan_start + test.start_time).await;
            run_test(backend, plan, index, test, options).await
        }
        .instrument(span)
    });

    try_join_all(tests).await
}

/// Runs all plans, concurrently unless `sequential_run` is set.
pub async fn run_plans(
    backend: &dyn S3Backend,
    plans: &[TestPlan],
    options: ScheduleOptions,
) -> Result<Vec<TestOutcome>> {
    let outcomes = if options.sequential_run {
        let mut outcomes = Vec::new();
        for plan in plans {
            outcomes.extend(run_plan(backend, plan, options).await?);
        }
        outcomes
    } else {
        try_join_all(plans.iter().map(|plan| run_plan(backend, plan, options)))
            .await?
            .into_iter()
            .flatten()
            .collect()
    };

    Ok(outcomes)
}

/// Prints per-test and total counters to stdout.
pub fn print_summary(outcomes: &[TestOutcome], elapsed: Duration) {
    let mut total = WorkloadSummary::default();

    for outcome in outcomes {
        let summary = outcome.total();
        println!();
        println!(
            "{} {} (plan: {}, sessions: {})",
            "## Test".bold(),
            outcome.test.bold().blue(),
            outcome.plan,
            outcome.sessions.len().bold()
        );
        print_counters(&summary);

        total.iterations += summary.iterations;
        total.bytes_written += summary.bytes_written;
        total.bytes_read += summary.bytes_read;
    }

    println!();
    println!("{}", "## TOTALS".bold());
    total.elapsed = elapsed;
    print_counters(&total);
}

fn print_counters(summary: &WorkloadSummary) {
    println!(
        "{} {} iterations in {}",
        "PASSED:".bold().green(),
        summary.iterations.bold(),
        humantime::format_duration(Duration::from_secs(summary.elapsed.as_secs()))
    );

    let secs = summary.elapsed.as_secs_f64();
    let throughput = |bytes: u64| {
        if secs > 0.0 {
            ByteSize::b((bytes as f64 / secs) as u64)
        } else {
            ByteSize::b(0)
        }
    };
    println!(
        "  written: {} ({}/s); read: {} ({}/s)",
        ByteSize::b(summary.bytes_written).bold(),
        throughput(summary.bytes_written),
        ByteSize::b(summary.bytes_read).bold(),
        throughput(summary.bytes_read),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_seeds_are_distinct() {
        let mut seeds: Vec<_> = (0..4)
            .flat_map(|test| (1..=4).map(move |session| session_seed(42, test, session)))
            .collect();
        seeds.sort();
        seeds.dedup();
        assert_eq!(seeds.len(), 16);
    }

    #[test]
    fn outcome_totals() {
        let session = |iterations, bytes| WorkloadSummary {
            iterations,
            bytes_written: bytes,
            bytes_read: bytes * 2,
            elapsed: Duration::from_secs(iterations),
        };
        let outcome = TestOutcome {
            plan: "plan".into(),
            test: "test".into(),
            sessions: vec![session(2, 10), session(3, 20)],
        };

        let total = outcome.total();
        assert_eq!(total.iterations, 5);
        assert_eq!(total.bytes_written, 30);
        assert_eq!(total.bytes_read, 60);
        assert_eq!(total.elapsed, Duration::from_secs(3));
    }
}
