//! Shared test utilities for driftwatch integration tests.
//!
//! This module provides:
//! - `TestHarness` for reconciling layers against an in-memory store at a
//!   fixed time
//! - Builders for layers, repositories and runs

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;
