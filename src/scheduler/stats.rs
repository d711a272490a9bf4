// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Aggregate statistics over a list of execution results.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::ExecutionResult;

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStats {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    /// Percentage, rounded to two decimals.
    pub success_rate: f64,
    /// Mean gap between consecutive results, in whole seconds.
    pub average_interval: u64,
    pub first_execution: Option<DateTime<Utc>>,
    pub last_execution: Option<DateTime<Utc>>,
}

/// Summarize `results`. An empty slice yields all-zero statistics.
///
/// The average interval is measured from the recorded timestamps, so it
/// reflects request latency and retries on top of the configured wait.
pub fn get_execution_stats(results: &[ExecutionResult]) -> ExecutionStats {
    let (Some(first), Some(last)) = (results.first(), results.last()) else {
        return ExecutionStats::default();
    };

    let total = results.len();
    let successful = results.iter().filter(|r| r.success).count();
    let failed = total - successful;
    let success_rate = round_to_hundredths(successful as f64 / total as f64 * 100.0);

    let average_interval = if total < 2 {
        0
    } else {
        let gaps_ms: i64 = results
            .windows(2)
            .map(|pair| (pair[1].timestamp - pair[0].timestamp).num_milliseconds())
            .sum();
        let mean_ms = gaps_ms as f64 / (total - 1) as f64;
        (mean_ms / 1000.0).round().max(0.0) as u64
    };

    ExecutionStats {
        total,
        successful,
        failed,
        success_rate,
        average_interval,
        first_execution: Some(first.timestamp),
        last_execution: Some(last.timestamp),
    }
}

fn round_to_hundredths(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
