//! Usage telemetry sink.

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::completion::TokenUsage;
use super::models::Backend;

/// One successful completion's telemetry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    pub conversation_id: String,
    pub model_id: String,
    pub backend: Backend,
    pub attempts: u32,
    pub usage: Option<TokenUsage>,
    pub recorded_at: DateTime<Utc>,
}

/// Receives usage records from the orchestrator.
pub trait UsageLedger: Send + Sync {
    fn record(&self, record: &UsageRecord);
}

/// Emits each record as a structured `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLedger;

impl UsageLedger for TracingLedger {
    fn record(&self, record: &UsageRecord) {
        let usage = record.usage.unwrap_or_default();
        tracing::info!(
            target: "switchyard::usage",
            conversation = %record.conversation_id,
            model = %record.model_id,
            backend = %record.backend,
            attempts = record.attempts,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            total_tokens = usage.total_tokens,
            "Completion usage"
        );
    }
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    records: Mutex<Vec<UsageRecord>>,
}

impl MemoryLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn records(&self) -> Vec<UsageRecord> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Sum of reported total tokens.
    #[must_use]
    pub fn total_tokens(&self) -> u64 {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(|r| r.usage)
            .map(|u| u.total_tokens)
            .sum()
    }
}

impl UsageLedger for MemoryLedger {
    fn record(&self, record: &UsageRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
    }
}
