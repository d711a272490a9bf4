// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Execution Scheduler
//!
//! Repeatedly calls one endpoint through the [`RequestDispatcher`] at a
//! fixed cadence, recording the outcome of every iteration.
//!
//! ## Lifecycle
//!
//! ```text
//! Idle -> Running -> Completed
//! ```
//!
//! [`ExecutionScheduler::start`] spawns the loop and returns a
//! [`ScheduleHandle`] immediately. A failed iteration is recorded and the
//! loop carries on unless `stop_on_error` is set.
//!
//! ## Shutdown
//!
//! Uses `tokio_util::sync::CancellationToken`. The token is checked before
//! each iteration and raced against the inter-iteration wait; a network
//! call or retry backoff already in flight is not interrupted, so a stop
//! only prevents the next iteration from starting.

pub mod stats;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::dispatcher::{DispatchOptions, RequestDispatcher};
use crate::error::DispatchError;
use crate::models::Envelope;

pub use stats::{get_execution_stats, ExecutionStats};

/// Field added to every scheduled request unless overridden.
pub const DEFAULT_IDEMPOTENCY_FIELD: &str = "requestId";

pub type ResultCallback = Arc<dyn Fn(&ExecutionResult) + Send + Sync>;
pub type CompleteCallback = Arc<dyn Fn(&ScheduleSummary) + Send + Sync>;

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("invalid schedule configuration: {0}")]
    InvalidConfig(String),

    #[error("a schedule is already running")]
    AlreadyRunning,

    #[error("schedule task failed: {0}")]
    Join(String),
}

// =============================================================================
// Configuration
// =============================================================================

/// One schedule run. Immutable once started.
#[derive(Clone)]
pub struct ScheduleConfig {
    pub endpoint: String,
    pub params: Map<String, Value>,
    /// Number of iterations, at least 1.
    pub iterations: u32,
    /// Wait between iterations. Fractions are allowed.
    pub interval_minutes: f64,
    /// `None` disables the per-iteration idempotency token.
    pub idempotency_field: Option<String>,
    pub stop_on_error: bool,
    /// Log in again when an iteration finds no valid token.
    pub reauthenticate: bool,
    pub dispatch: DispatchOptions,
    pub on_success: Option<ResultCallback>,
    pub on_error: Option<ResultCallback>,
    pub on_complete: Option<CompleteCallback>,
}

impl std::fmt::Debug for ScheduleConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduleConfig")
            .field("endpoint", &self.endpoint)
            .field("iterations", &self.iterations)
            .field("interval_minutes", &self.interval_minutes)
            .field("idempotency_field", &self.idempotency_field)
            .field("stop_on_error", &self.stop_on_error)
            .field("reauthenticate", &self.reauthenticate)
            .finish_non_exhaustive()
    }
}

impl ScheduleConfig {
    pub fn new(endpoint: impl Into<String>, iterations: u32) -> Self {
        Self {
            endpoint: endpoint.into(),
            params: Map::new(),
            iterations,
            interval_minutes: 0.0,
            idempotency_field: Some(DEFAULT_IDEMPOTENCY_FIELD.to_string()),
            stop_on_error: false,
            reauthenticate: true,
            dispatch: DispatchOptions::default(),
            on_success: None,
            on_error: None,
            on_complete: None,
        }
    }

    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.params = params;
        self
    }

    pub fn with_interval_minutes(mut self, minutes: f64) -> Self {
        self.interval_minutes = minutes;
        self
    }

    pub fn with_stop_on_error(mut self, stop: bool) -> Self {
        self.stop_on_error = stop;
        self
    }

    pub fn on_success(
        mut self,
        callback: impl Fn(&ExecutionResult) + Send + Sync + 'static,
    ) -> Self {
        self.on_success = Some(Arc::new(callback));
        self
    }

    pub fn on_error(
        mut self,
        callback: impl Fn(&ExecutionResult) + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }

    pub fn on_complete(
        mut self,
        callback: impl Fn(&ScheduleSummary) + Send + Sync + 'static,
    ) -> Self {
        self.on_complete = Some(Arc::new(callback));
        self
    }

    pub fn validate(&self) -> Result<(), ScheduleError> {
        if self.iterations == 0 {
            return Err(ScheduleError::InvalidConfig(
                "iterations must be at least 1".into(),
            ));
        }
        if self.endpoint.trim().is_empty() {
            return Err(ScheduleError::InvalidConfig("endpoint is empty".into()));
        }
        self.interval()?;
        Ok(())
    }

    /// The inter-iteration wait as a `Duration`.
    pub fn interval(&self) -> Result<Duration, ScheduleError> {
        if self.interval_minutes.is_nan() || self.interval_minutes < 0.0 {
            return Err(ScheduleError::InvalidConfig(format!(
                "interval_minutes must be a non-negative number, got {}",
                self.interval_minutes
            )));
        }
        Duration::try_from_secs_f64(self.interval_minutes * 60.0).map_err(|e| {
            ScheduleError::InvalidConfig(format!("interval_minutes out of range: {e}"))
        })
    }
}

// =============================================================================
// Results
// =============================================================================

/// Outcome of one iteration. Never mutated after it is recorded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub iteration: u32,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Envelope>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn succeeded(iteration: u32, timestamp: DateTime<Utc>, envelope: Envelope) -> Self {
        Self {
            iteration,
            timestamp,
            success: true,
            result: Some(envelope),
            error: None,
        }
    }

    pub fn failed(iteration: u32, timestamp: DateTime<Utc>, error: String) -> Self {
        Self {
            iteration,
            timestamp,
            success: false,
            result: None,
            error: Some(error),
        }
    }
}

/// Handed to `on_complete` and returned from [`ScheduleHandle::join`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleSummary {
    pub total_iterations: u32,
    pub completed_iterations: usize,
    pub successful: usize,
    pub failed: usize,
    /// True when the run ended before exhausting its iterations.
    pub stopped: bool,
    pub results: Vec<ExecutionResult>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulePhase {
    #[default]
    Idle,
    Running,
    Completed,
}

#[derive(Debug, Default)]
struct Progress {
    phase: SchedulePhase,
    current_iteration: Option<u32>,
    results: Vec<ExecutionResult>,
}

type SharedProgress = Arc<Mutex<Progress>>;

fn lock(progress: &SharedProgress) -> MutexGuard<'_, Progress> {
    progress.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Marks the run completed however the task ends, including when it is
/// aborted before its first poll.
struct CompletionGuard(SharedProgress);

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        let mut progress = lock(&self.0);
        progress.phase = SchedulePhase::Completed;
        progress.current_iteration = None;
    }
}

/// Run a user callback; a panic is logged and swallowed.
fn invoke_callback(run_id: Uuid, name: &'static str, callback: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(callback)).is_err() {
        warn!(run_id = %run_id, callback = name, "Schedule callback panicked");
    }
}

/// Idempotency token for one iteration of one run.
pub fn idempotency_key(run_id: Uuid, iteration: u32) -> Uuid {
    Uuid::new_v5(&run_id, iteration.to_string().as_bytes())
}

// =============================================================================
// Scheduler
// =============================================================================

/// Starts schedule runs against one dispatcher, one run at a time.
pub struct ExecutionScheduler {
    dispatcher: Arc<RequestDispatcher>,
    progress: SharedProgress,
}

impl ExecutionScheduler {
    pub fn new(dispatcher: Arc<RequestDispatcher>) -> Self {
        Self {
            dispatcher,
            progress: Arc::new(Mutex::new(Progress::default())),
        }
    }

    pub fn phase(&self) -> SchedulePhase {
        lock(&self.progress).phase
    }

    /// Spawn a run and return its handle without waiting for it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, config: ScheduleConfig) -> Result<ScheduleHandle, ScheduleError> {
        config.validate()?;
        let interval = config.interval()?;

        {
            let mut progress = lock(&self.progress);
            if progress.phase == SchedulePhase::Running {
                return Err(ScheduleError::AlreadyRunning);
            }
            *progress = Progress {
                phase: SchedulePhase::Running,
                current_iteration: None,
                results: Vec::new(),
            };
        }

        let run_id = Uuid::new_v4();
        let shutdown = CancellationToken::new();
        let run = ScheduleRun {
            run_id,
            config,
            interval,
            dispatcher: self.dispatcher.clone(),
            progress: self.progress.clone(),
            shutdown: shutdown.clone(),
            _completion: CompletionGuard(self.progress.clone()),
        };
        let task = tokio::spawn(run.run());

        Ok(ScheduleHandle {
            run_id,
            progress: self.progress.clone(),
            shutdown,
            task,
        })
    }
}

/// Control and observation of a running schedule.
pub struct ScheduleHandle {
    run_id: Uuid,
    progress: SharedProgress,
    shutdown: CancellationToken,
    task: JoinHandle<ScheduleSummary>,
}

impl ScheduleHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Prevent the next iteration from starting.
    pub fn stop(&self) {
        if !self.shutdown.is_cancelled() {
            info!(run_id = %self.run_id, "Schedule stop requested");
        }
        self.shutdown.cancel();
    }

    pub fn is_running(&self) -> bool {
        lock(&self.progress).phase == SchedulePhase::Running
    }

    pub fn phase(&self) -> SchedulePhase {
        lock(&self.progress).phase
    }

    pub fn results(&self) -> Vec<ExecutionResult> {
        lock(&self.progress).results.clone()
    }

    /// The iteration in progress; `None` before the first and after the run.
    pub fn current_iteration(&self) -> Option<u32> {
        lock(&self.progress).current_iteration
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Wait for the run to finish.
    pub async fn join(self) -> Result<ScheduleSummary, ScheduleError> {
        self.task
            .await
            .map_err(|e| ScheduleError::Join(e.to_string()))
    }
}

struct ScheduleRun {
    run_id: Uuid,
    config: ScheduleConfig,
    interval: Duration,
    dispatcher: Arc<RequestDispatcher>,
    progress: SharedProgress,
    shutdown: CancellationToken,
    _completion: CompletionGuard,
}

impl ScheduleRun {
    async fn run(self) -> ScheduleSummary {
        info!(
            run_id = %self.run_id,
            endpoint = %self.config.endpoint,
            iterations = self.config.iterations,
            interval_secs = self.interval.as_secs(),
            "Schedule starting"
        );

        if self.config.reauthenticate {
            if let Err(err) = self.dispatcher.ensure_authenticated().await {
                warn!(
                    run_id = %self.run_id,
                    error = %err,
                    "Schedule could not authenticate"
                );
            }
        }

        let mut stopped = false;
        for iteration in 1..=self.config.iterations {
            if self.shutdown.is_cancelled() {
                stopped = true;
                break;
            }

            lock(&self.progress).current_iteration = Some(iteration);
            let result = self.execute(iteration).await;
            let success = result.success;
            self.record(result);

            if !success && self.config.stop_on_error {
                info!(
                    run_id = %self.run_id,
                    iteration,
                    "Stopping schedule after failed iteration"
                );
                stopped = iteration < self.config.iterations;
                break;
            }

            if iteration < self.config.iterations {
                tokio::select! {
                    _ = tokio::time::sleep(self.interval) => {},
                    _ = self.shutdown.cancelled() => {
                        stopped = true;
                        break;
                    }
                }
            }
        }

        self.finish(stopped)
    }

    async fn execute(&self, iteration: u32) -> ExecutionResult {
        let mut params = self.config.params.clone();
        if let Some(field) = &self.config.idempotency_field {
            params.insert(
                field.clone(),
                Value::String(idempotency_key(self.run_id, iteration).to_string()),
            );
        }

        let endpoint = &self.config.endpoint;
        let options = self.config.dispatch;
        let outcome = match self
            .dispatcher
            .dispatch(endpoint, params.clone(), options)
            .await
        {
            Err(DispatchError::NotAuthenticated) if self.config.reauthenticate => {
                match self.dispatcher.ensure_authenticated().await {
                    Ok(()) => self.dispatcher.dispatch(endpoint, params, options).await,
                    Err(err) => {
                        warn!(
                            run_id = %self.run_id,
                            iteration,
                            error = %err,
                            "Re-authentication failed"
                        );
                        Err(DispatchError::NotAuthenticated)
                    }
                }
            }
            other => other,
        };

        let timestamp = Utc::now();
        match outcome {
            Ok(envelope) => {
                info!(run_id = %self.run_id, iteration, "Schedule iteration succeeded");
                ExecutionResult::succeeded(iteration, timestamp, envelope)
            }
            Err(err) => {
                warn!(
                    run_id = %self.run_id,
                    iteration,
                    error = %err,
                    "Schedule iteration failed"
                );
                ExecutionResult::failed(iteration, timestamp, err.to_string())
            }
        }
    }

    fn record(&self, result: ExecutionResult) {
        lock(&self.progress).results.push(result.clone());
        let (name, callback) = if result.success {
            ("on_success", &self.config.on_success)
        } else {
            ("on_error", &self.config.on_error)
        };
        if let Some(callback) = callback {
            invoke_callback(self.run_id, name, || callback(&result));
        }
    }

    fn finish(self, stopped: bool) -> ScheduleSummary {
        let results = {
            let mut progress = lock(&self.progress);
            progress.phase = SchedulePhase::Completed;
            progress.current_iteration = None;
            progress.results.clone()
        };

        let successful = results.iter().filter(|r| r.success).count();
        let summary = ScheduleSummary {
            total_iterations: self.config.iterations,
            completed_iterations: results.len(),
            successful,
            failed: results.len() - successful,
            stopped,
            results,
        };

        info!(
            run_id = %self.run_id,
            completed = summary.completed_iterations,
            successful = summary.successful,
            failed = summary.failed,
            stopped,
            "Schedule completed"
        );

        if let Some(callback) = &self.config.on_complete {
            invoke_callback(self.run_id, "on_complete", || callback(&summary));
        }
        summary
    }
}
