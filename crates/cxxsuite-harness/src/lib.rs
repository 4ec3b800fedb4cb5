//! Conformance test harness for a C++ standard library.
//!
//! This crate provides:
//! - Test discovery: walk a test tree collecting `*.pass.cpp`, `*.fail.cpp`,
//!   and `*.sh.cpp` files
//! - Test format: classify each file, check its feature requirements, build
//!   and run the compiler invocations its kind implies
//! - Reporting: per-test rows, summary counters, markdown + JSON rendering,
//!   and a hashed artifact index
//! - Structured logging: one JSONL record per test with schema validation

#![forbid(unsafe_code)]

pub mod discovery;
pub mod error;
pub mod format;
pub mod report;
pub mod runner;
pub mod structured_log;

pub use discovery::{DiscoveryOptions, discover_tests};
pub use error::HarnessError;
pub use format::{Outcome, TestCase, TestFormat, TestKind};
pub use report::{SuiteReport, TestRow};
pub use runner::TestRunner;
