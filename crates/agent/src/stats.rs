use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use concierge_core::domain::response::ResponseResult;

use crate::confidence::round_confidence;

#[derive(Debug, Default)]
struct Counters {
    total: u64,
    successful: u64,
    failed: u64,
    escalated: u64,
    fallback_responses: u64,
    filtered_responses: u64,
    confidence_sum: f64,
    processing_time_sum_ms: u64,
}

/// Point-in-time copy of the aggregate counters.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub escalated_responses: u64,
    pub fallback_responses: u64,
    pub filtered_responses: u64,
    pub average_confidence: f64,
    pub average_processing_time_ms: f64,
    pub escalation_rate: f64,
    /// Failed requests over all requests.
    pub fallback_rate: f64,
}

/// Process-lifetime counters owned by one orchestrator.
#[derive(Debug, Default)]
pub struct PipelineStats {
    counters: Mutex<Counters>,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, result: &ResponseResult) {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        let metadata = result.metadata();
        counters.total += 1;
        counters.processing_time_sum_ms += metadata.processing_time_ms;

        match result.response() {
            Some(response) => {
                counters.successful += 1;
                counters.confidence_sum += response.confidence;
                if response.should_escalate {
                    counters.escalated += 1;
                }
                if metadata.fallback_used {
                    counters.fallback_responses += 1;
                }
                if metadata.content_filtered {
                    counters.filtered_responses += 1;
                }
            }
            None => counters.failed += 1,
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        let ratio = |part: f64, whole: u64| if whole == 0 { 0.0 } else { part / whole as f64 };

        StatsSnapshot {
            total_requests: counters.total,
            successful_requests: counters.successful,
            failed_requests: counters.failed,
            escalated_responses: counters.escalated,
            fallback_responses: counters.fallback_responses,
            filtered_responses: counters.filtered_responses,
            average_confidence: round_confidence(ratio(counters.confidence_sum, counters.successful)),
            average_processing_time_ms: ratio(counters.processing_time_sum_ms as f64, counters.total),
            escalation_rate: ratio(counters.escalated as f64, counters.total),
            fallback_rate: ratio(counters.failed as f64, counters.total),
        }
    }
}
