//! KB status derivation from run history and graph counts.

use crate::runs::{Run, RunState};
use crate::types::{KbId, RunId, SourceId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Derived health of a knowledge base
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KbHealth {
    Healthy,
    Warning,
    Error,
    Stale,
}

impl std::fmt::Display for KbHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KbHealth::Healthy => write!(f, "healthy"),
            KbHealth::Warning => write!(f, "warning"),
            KbHealth::Error => write!(f, "error"),
            KbHealth::Stale => write!(f, "stale"),
        }
    }
}

/// Latest run outcome of one source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceStatus {
    pub source_id: SourceId,
    pub run_id: RunId,
    pub state: RunState,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Aggregate status of a knowledge base
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KbStatus {
    pub kb_id: KbId,
    pub total_nodes: u64,
    pub total_relationships: u64,
    pub last_successful_sync: Option<DateTime<Utc>>,
    pub data_freshness_hours: Option<f64>,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
    /// Mean duration of the last 10 completed runs
    pub avg_ingestion_time_ms: Option<f64>,
    pub sources: Vec<SourceStatus>,
    pub health: KbHealth,
}

const ERROR_WINDOW_MINUTES: i64 = 15;
const STALE_AFTER_HOURS: f64 = 24.0;
const AVG_WINDOW: usize = 10;

/// Derive a KB's status from its runs and current graph counts
pub fn derive_status(
    kb_id: &KbId,
    runs: &[Run],
    total_nodes: u64,
    total_relationships: u64,
    now: DateTime<Utc>,
) -> KbStatus {
    let mut completed: Vec<&Run> = runs
        .iter()
        .filter(|r| r.state == RunState::Completed)
        .collect();
    completed.sort_by_key(|r| r.finished_at);

    let last_successful_sync = completed.iter().filter_map(|r| r.finished_at).max();
    let data_freshness_hours = last_successful_sync
        .map(|sync| (now - sync).num_milliseconds() as f64 / 3_600_000.0);

    let (last_error, last_error_at) = runs
        .iter()
        .flat_map(|r| r.errors.iter())
        .max_by_key(|e| e.at)
        .map(|e| (Some(e.message.clone()), Some(e.at)))
        .unwrap_or((None, None));

    let durations: Vec<i64> = completed
        .iter()
        .rev()
        .take(AVG_WINDOW)
        .filter_map(|r| r.duration_ms())
        .collect();
    let avg_ingestion_time_ms = if durations.is_empty() {
        None
    } else {
        Some(durations.iter().sum::<i64>() as f64 / durations.len() as f64)
    };

    // Latest run per source, by run id (monotonic)
    let mut latest: HashMap<&SourceId, &Run> = HashMap::new();
    for run in runs {
        match latest.get(&run.source_id) {
            Some(current) if current.run_id >= run.run_id => {}
            _ => {
                latest.insert(&run.source_id, run);
            }
        }
    }
    let mut sources: Vec<SourceStatus> = latest
        .values()
        .map(|r| SourceStatus {
            source_id: r.source_id.clone(),
            run_id: r.run_id.clone(),
            state: r.state,
            finished_at: r.finished_at,
        })
        .collect();
    sources.sort_by(|a, b| a.source_id.0.cmp(&b.source_id.0));

    let health = derive_health(
        &sources,
        data_freshness_hours,
        last_error_at,
        runs,
        now,
    );

    KbStatus {
        kb_id: kb_id.clone(),
        total_nodes,
        total_relationships,
        last_successful_sync,
        data_freshness_hours,
        last_error,
        last_error_at,
        avg_ingestion_time_ms,
        sources,
        health,
    }
}

fn derive_health(
    sources: &[SourceStatus],
    freshness_hours: Option<f64>,
    last_error_at: Option<DateTime<Utc>>,
    runs: &[Run],
    now: DateTime<Utc>,
) -> KbHealth {
    let recent_error = last_error_at
        .map(|at| now - at <= Duration::minutes(ERROR_WINDOW_MINUTES))
        .unwrap_or(false);
    if recent_error || sources.iter().any(|s| s.state == RunState::Failed) {
        return KbHealth::Error;
    }

    match freshness_hours {
        Some(hours) if hours > STALE_AFTER_HOURS => KbHealth::Stale,
        Some(_) => KbHealth::Healthy,
        None => {
            // Never synced successfully
            let any_active = sources.iter().any(|s| s.state == RunState::Running);
            if any_active {
                KbHealth::Warning
            } else if runs.iter().any(|r| r.state.is_terminal()) {
                KbHealth::Stale
            } else {
                KbHealth::Healthy
            }
        }
    }
}
