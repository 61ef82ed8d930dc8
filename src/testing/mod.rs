//! Test harness for running accelerator calls against reference results.
//!
//! This module provides:
//! - Reference operators evaluated directly on host slices
//! - TOML manifests describing a call, its input buffers and the expected output
//! - A runner that executes manifests and reports per-word mismatches
//!
//! # Usage
//!
//! ```bash
//! cargo run -- tests/manifests/*.toml
//! ```

pub mod manifest;
pub mod reference;
pub mod runner;

pub use manifest::{BufferDef, ElementType, ExpectedDef, MemoryKind, PatternDef, TestManifest};
pub use runner::{ManifestRunner, MismatchInfo, TestResult};
