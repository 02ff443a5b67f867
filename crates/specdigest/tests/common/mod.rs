//! Shared utilities for specdigest integration tests.

pub mod harness;

pub use harness::{Response, TestHarness, PETSTORE_YAML};
