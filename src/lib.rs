//! switchyard - model routing and resource lifecycle engine
//!
//! Routes chat requests across a local OpenAI-compatible inference server and
//! cloud providers, keeps at most one local model resident, and recovers from
//! backend failures with a bounded ladder of fallbacks.

// deny, not forbid: the logging tests set env vars under #[allow(unsafe_code)].
#![deny(unsafe_code)]
#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod core;
pub mod error;
pub mod render;
pub mod storage;

/// Fixtures shared with integration tests (`test-utils` feature).
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use error::{ExitCode, Result, SwitchyardError};
