//! Test plans for the S3 I/O stability harness.
//!
//! A test plan is a YAML mapping of named tests. Each test describes the shape of a multipart or
//! bucket workload using human-readable sizes and durations:
//!
//! ```yaml
//! test_1:
//!   object_size:
//!     start: 10MiB
//!     end: 1GiB
//!   part_range:
//!     start: 2
//!     end: 100
//!   range_read: 5MiB
//!   min_runtime: 2h30m
//!   sessions_per_node: 2
//!
//! test_2:
//!   object_size: 5GB
//!   part_copy: true
//!   min_runtime: 1d
//!
//! test_3:
//!   workload: bucket
//!   object_size: 1MiB
//!   number_of_objects: 100
//!   min_runtime: 6h
//! ```
//!
//! [`test_parser`] normalizes such a file into a [`TestPlan`], converting sizes with
//! [`convert_to_bytes`] and durations with [`convert_to_duration`], and computes the
//! [`TestCase::start_time`] of every test so that the tests of one plan can be sequenced.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

mod duration;
mod error;
mod plan;
mod size;

pub use crate::duration::convert_to_duration;
pub use crate::error::{PlanError, Result};
pub use crate::plan::{
    CountRange, MAX_PARTS, RangeRead, SizeSpec, TestCase, TestPlan, WorkloadKind, load_plans,
    parse_plan, test_parser,
};
pub use crate::size::{ByteRange, KB, KIB, convert_to_bytes};
