//! Progress reporting and the single-run guard for the bulk download.
//!
//! The downloader receives a `ProgressReporter` (single writer); pollers
//! read thread-safe snapshots through the same shared state. The run
//! lifecycle is an explicit state machine: Idle -> Running -> Idle, with
//! the terminal summary or error retained for later retrieval.

use serde::Serialize;
use std::sync::{Arc, Mutex};
use tracing::info;

use crate::download::DownloadSummary;

/// Point-in-time view of the download progress, safe to hand to pollers.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProgressSnapshot {
    pub current_step: u32,
    pub total_steps: u32,
    pub step_name: String,
    pub details: String,
    pub percentage: u32,
}

impl ProgressSnapshot {
    pub fn idle(total_steps: u32) -> Self {
        ProgressSnapshot {
            current_step: 0,
            total_steps,
            step_name: String::new(),
            details: String::new(),
            percentage: 0,
        }
    }
}

/// Single-writer handle passed into the downloader.
#[derive(Clone)]
pub struct ProgressReporter {
    shared: Arc<Mutex<ProgressSnapshot>>,
}

impl ProgressReporter {
    pub fn new(total_steps: u32) -> Self {
        ProgressReporter {
            shared: Arc::new(Mutex::new(ProgressSnapshot::idle(total_steps))),
        }
    }

    /// Record a step transition; exposed to pollers immediately.
    pub fn update(&self, step: u32, step_name: &str, details: &str) {
        let mut state = self.shared.lock().unwrap_or_else(|e| e.into_inner());
        state.current_step = step;
        state.step_name = step_name.to_string();
        state.details = details.to_string();
        state.percentage = if state.total_steps == 0 {
            0
        } else {
            step * 100 / state.total_steps
        };
        info!(
            step,
            total_steps = state.total_steps,
            percentage = state.percentage,
            step_name,
            details,
            "Download progress"
        );
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.shared
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// Lifecycle of the at-most-one concurrent download run.
#[derive(Debug, Clone)]
pub enum RunState {
    Idle,
    Running,
    Finished(DownloadSummary),
    Failed(String),
}

/// Outcome of asking the coordinator to start a run.
#[derive(Debug, Clone, PartialEq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

/// Guards the Idle -> Running -> Idle transition and retains the last
/// terminal outcome.
#[derive(Clone)]
pub struct DownloadCoordinator {
    state: Arc<Mutex<RunState>>,
    pub progress: ProgressReporter,
}

impl DownloadCoordinator {
    pub fn new(total_steps: u32) -> Self {
        DownloadCoordinator {
            state: Arc::new(Mutex::new(RunState::Idle)),
            progress: ProgressReporter::new(total_steps),
        }
    }

    /// Attempt to claim the run slot. Returns `AlreadyRunning` without
    /// side effects when a run is in flight.
    pub fn try_start(&self) -> StartOutcome {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if matches!(*state, RunState::Running) {
            return StartOutcome::AlreadyRunning;
        }
        *state = RunState::Running;
        StartOutcome::Started
    }

    /// Record the terminal outcome of a run, releasing the run slot.
    pub fn finish(&self, outcome: Result<DownloadSummary, String>) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        *state = match outcome {
            Ok(summary) => RunState::Finished(summary),
            Err(message) => RunState::Failed(message),
        };
    }

    pub fn run_state(&self) -> RunState {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_running(&self) -> bool {
        matches!(self.run_state(), RunState::Running)
    }
}
