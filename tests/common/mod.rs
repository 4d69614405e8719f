//! Shared helpers for integration tests.
//!
//! - `fixtures`: mock local/cloud servers and request inspection
//! - `logger`: per-test structured logging
//! - `log_capture`: assertions on engine `tracing` output

#![allow(dead_code)]

pub mod fixtures;
pub mod log_capture;
pub mod logger;
