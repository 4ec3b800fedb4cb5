//! Compiler wrapper and configuration layer for the cxxsuite conformance harness.
//!
//! This crate provides:
//! - Parameter resolution: `--param` pairs, a JSON site configuration, and
//!   environment overrides with fixed precedence
//! - A compiler-under-test wrapper: flag roles, command assembly, synchronous
//!   invocation, and macro-dump parsing
//! - Capability probes: compile-flag checks, warning-flag checks, verify and
//!   modules support detection
//! - Feature computation: the available-feature set tests are gated on
//! - Configuration assembly: the full flag matrix for a standard library
//!   under test (exceptions, RTTI, ABI, sanitizers, modules, coroutines)

#![forbid(unsafe_code)]

pub mod compiler;
pub mod config;
pub mod diag;
pub mod error;
pub mod features;
pub mod invoke;
pub mod params;
pub mod probes;
pub mod target;

pub use compiler::{CompileMode, CompilerInvocation, CompilerKind, CompilerVersion, CxxCompiler};
pub use config::{Configuration, StdlibUnderTest, SuitePaths, SystemCxxLib};
pub use diag::Diag;
pub use error::ConfigError;
pub use features::FeatureSet;
pub use params::{ParamResolver, SiteConfig};
pub use target::{Deployment, TargetInfo};
