//! Run lifecycle management.
//!
//! At most one `running` run per `(kb_id, source_id)`; terminal runs are
//! append-only and retained in a bounded per-KB history. The active-run map
//! sits behind a single mutex with constant-time critical sections; the run
//! loop never holds it across I/O.

use crate::errors::OrchestratorError;
use crate::types::{KbId, MergeCounts, RunError, RunId, SourceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Lifecycle state of an ingestion run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunState::Running)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Running => write!(f, "running"),
            RunState::Completed => write!(f, "completed"),
            RunState::Failed => write!(f, "failed"),
            RunState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Aggregate counters of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub documents_processed: u64,
    pub nodes_created: u64,
    pub nodes_updated: u64,
    pub relationships_created: u64,
    pub relationships_updated: u64,
}

/// One ingestion run for a `(kb_id, source_id)`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub run_id: RunId,
    pub kb_id: KbId,
    pub source_id: SourceId,
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stats: RunStats,
    pub errors: Vec<RunError>,
    /// Non-fatal degradations (e.g. fallback embedding vectors)
    pub warnings: Vec<RunError>,
}

impl Run {
    pub fn duration_ms(&self) -> Option<i64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }
}

/// Handle given to the ingest loop for one accepted run
pub struct RunHandle {
    pub run_id: RunId,
    /// Flips to `true` when the run is cancelled
    pub cancelled: watch::Receiver<bool>,
}

struct ActiveRun {
    run: Run,
    cancel_tx: watch::Sender<bool>,
}

/// Owner of all run state
pub struct RunManager {
    active: Mutex<HashMap<(KbId, SourceId), ActiveRun>>,
    history: Mutex<HashMap<KbId, VecDeque<Run>>>,
    sequence: AtomicU64,
    history_max: usize,
}

impl RunManager {
    pub fn new(history_max: usize) -> Self {
        Self {
            active: Mutex::new(HashMap::new()),
            history: Mutex::new(HashMap::new()),
            sequence: AtomicU64::new(0),
            history_max: history_max.max(1),
        }
    }

    fn next_run_id(&self) -> RunId {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        RunId::new(format!("run-{:013}-{:06}", Utc::now().timestamp_millis(), seq))
    }

    /// Begin a run, enforcing per-source exclusivity
    pub fn start(&self, kb_id: &KbId, source_id: &SourceId) -> Result<RunHandle, OrchestratorError> {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        let slot = (kb_id.clone(), source_id.clone());
        if let Some(current) = active.get(&slot) {
            return Err(OrchestratorError::Conflict {
                current_run_id: current.run.run_id.clone(),
            });
        }

        let run_id = self.next_run_id();
        let (cancel_tx, cancelled) = watch::channel(false);
        let run = Run {
            run_id: run_id.clone(),
            kb_id: kb_id.clone(),
            source_id: source_id.clone(),
            state: RunState::Running,
            started_at: Utc::now(),
            finished_at: None,
            stats: RunStats::default(),
            errors: Vec::new(),
            warnings: Vec::new(),
        };
        info!(%kb_id, %source_id, %run_id, "run started");
        active.insert(slot, ActiveRun { run, cancel_tx });
        Ok(RunHandle { run_id, cancelled })
    }

    fn with_active_run<T>(&self, run_id: &RunId, f: impl FnOnce(&mut Run) -> T) -> Option<T> {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active
            .values_mut()
            .find(|a| a.run.run_id == *run_id)
            .map(|a| f(&mut a.run))
    }

    /// Record one processed document's merge counters on a running run
    pub fn record_document(&self, run_id: &RunId, counts: MergeCounts) {
        self.with_active_run(run_id, |run| {
            run.stats.documents_processed += 1;
            run.stats.nodes_created += counts.nodes_created;
            run.stats.nodes_updated += counts.nodes_updated;
            run.stats.relationships_created += counts.relationships_created;
            run.stats.relationships_updated += counts.relationships_updated;
        });
    }

    /// Record an error on a running run
    pub fn add_error(&self, run_id: &RunId, message: impl Into<String>) {
        let message = message.into();
        warn!(%run_id, "run error: {}", message);
        self.with_active_run(run_id, |run| run.errors.push(RunError::now(message)));
    }

    /// Record a non-fatal warning on a running run
    pub fn add_warning(&self, run_id: &RunId, message: impl Into<String>) {
        self.with_active_run(run_id, |run| run.warnings.push(RunError::now(message.into())));
    }

    /// Finish a running run. A run that already reached a terminal state
    /// (e.g. cancelled mid-flight) is left untouched; the terminal run is
    /// returned either way when known.
    pub fn complete(&self, run_id: &RunId, ok: bool) -> Option<Run> {
        let finished = {
            let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            let slot = active
                .iter()
                .find(|(_, a)| a.run.run_id == *run_id)
                .map(|(slot, _)| slot.clone())?;
            let mut entry = match active.remove(&slot) {
                Some(entry) => entry,
                None => return None,
            };
            entry.run.state = if ok { RunState::Completed } else { RunState::Failed };
            entry.run.finished_at = Some(Utc::now());
            entry.run
        };

        info!(
            run_id = %finished.run_id,
            state = %finished.state,
            documents = finished.stats.documents_processed,
            nodes_created = finished.stats.nodes_created,
            relationships_created = finished.stats.relationships_created,
            errors = finished.errors.len(),
            "run finished"
        );
        self.archive(finished.clone());
        Some(finished)
    }

    /// Cancel a run by id. Cancelling a terminal (or already archived) run is
    /// a no-op returning its state; unknown run ids return `None`.
    pub fn cancel(&self, run_id: &RunId) -> Option<RunState> {
        let cancelled = {
            let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            let slot = active
                .iter()
                .find(|(_, a)| a.run.run_id == *run_id)
                .map(|(slot, _)| slot.clone());
            slot.and_then(|slot| active.remove(&slot)).map(|mut entry| {
                entry.run.state = RunState::Cancelled;
                entry.run.finished_at = Some(Utc::now());
                let _ = entry.cancel_tx.send(true);
                entry.run
            })
        };

        if let Some(run) = cancelled {
            info!(%run_id, "run cancelled");
            let state = run.state;
            self.archive(run);
            return Some(state);
        }

        debug!(%run_id, "cancel on non-active run");
        self.find_archived(run_id).map(|run| run.state)
    }

    fn archive(&self, run: Run) {
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        let entry = history.entry(run.kb_id.clone()).or_default();
        entry.push_back(run);
        while entry.len() > self.history_max {
            entry.pop_front();
        }
    }

    fn find_archived(&self, run_id: &RunId) -> Option<Run> {
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        history
            .values()
            .flat_map(|runs| runs.iter())
            .find(|run| run.run_id == *run_id)
            .cloned()
    }

    /// Snapshot of a run, active or archived
    pub fn run(&self, run_id: &RunId) -> Option<Run> {
        self.with_active_run(run_id, |run| run.clone())
            .or_else(|| self.find_archived(run_id))
    }

    /// All runs of a KB: archived history plus any active ones
    pub fn runs_for_kb(&self, kb_id: &KbId) -> Vec<Run> {
        let mut runs: Vec<Run> = {
            let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
            history.get(kb_id).map(|r| r.iter().cloned().collect()).unwrap_or_default()
        };
        {
            let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            runs.extend(
                active
                    .iter()
                    .filter(|((kb, _), _)| kb == kb_id)
                    .map(|(_, a)| a.run.clone()),
            );
        }
        runs.sort_by(|a, b| a.run_id.cmp(&b.run_id));
        runs
    }
}
