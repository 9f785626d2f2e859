//! Test utilities and fixtures for zigdoc
//!
//! Shared by unit tests (#[cfg(test)]) and integration tests (tests/
//! directory) of the zigdoc crates.

pub mod fixtures;
#[cfg(unix)]
pub mod stubs;

pub use fixtures::SampleTree;
#[cfg(unix)]
pub use stubs::StubTool;
