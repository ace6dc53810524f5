//! Long-running I/O stability workloads for S3-compatible object stores.
//!
//! The driver reads test plans through [`s3stab_plan`], turns every test into one or more
//! workload sessions and runs them against an [`S3Backend`](backend::S3Backend) until their
//! deadline. Every iteration of a [`MultipartWorkload`](workload::MultipartWorkload) uploads an
//! object in parts, validates the upload through the listing APIs and compares the SHA-256 of the
//! downloaded object with the data that was sent. A [`BucketWorkload`](bucket::BucketWorkload)
//! instead cycles through buckets, filling, listing and force-deleting one per iteration.
//!
//! While a run is in progress, the [`notify`] module emails periodic status reports and a final
//! verdict once the run ends.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod backend;
pub mod bucket;
pub mod cli;
pub mod config;
pub mod multipart;
pub mod notify;
pub mod observability;
pub mod schedule;
pub mod workload;
