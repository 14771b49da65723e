// Batch job runner - one synchronous pass per invocation.
//
// Per-record failure isolation is the contract here: every record's workflow
// runs inside its own boundary, produces a typed outcome, and can never take
// the rest of the batch down with it. Only losing the database does that.

pub mod credentials;
pub mod offboarding;
pub mod onboarding;

use std::fs::File;
use std::path::Path;
use std::time::{Duration, Instant};

use fd_lock::{RwLock, RwLockWriteGuard};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::compute::{Provisioner, ProvisioningError};
use crate::config::RunnerConfig;
use crate::identity::{Directory, IdentityError};
use crate::metrics::MetricsTracker;
use crate::notify::{Notifier, NotifyError};
use crate::store::{RecordStore, StoreError};
use crate::telemetry::generate_correlation_id;

pub use credentials::WorkspaceCredentials;

/// Errors that abort a whole batch pass. Everything else stays per-record.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("another deskhand run is already active (lock file {path})")]
    AlreadyRunning { path: String },

    #[error("failed to prepare run lock {path}: {source}")]
    Lock {
        path: String,
        source: std::io::Error,
    },
}

/// Why a single record's workflow failed.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Provisioning(#[from] ProvisioningError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Notify(#[from] NotifyError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("record workflow exceeded its {seconds}s budget")]
    Timeout { seconds: u64 },

    #[error("run deadline exhausted before this record was processed")]
    DeadlineExhausted,
}

/// A record that was passed over without side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Another run holds the claim, or the record stopped being eligible.
    LostClaim,
    /// The row disappeared between claim and commit.
    RecordVanished,
}

/// Terminal result for one record within a run.
#[derive(Debug)]
pub enum RecordOutcome {
    Succeeded { id: i64 },
    Failed { id: i64, reason: WorkflowError },
    Skipped { id: i64, reason: SkipReason },
}

impl RecordOutcome {
    pub fn id(&self) -> i64 {
        match self {
            RecordOutcome::Succeeded { id }
            | RecordOutcome::Failed { id, .. }
            | RecordOutcome::Skipped { id, .. } => *id,
        }
    }

    /// Metric label for this outcome.
    pub fn label(&self) -> &'static str {
        match self {
            RecordOutcome::Succeeded { .. } => "success",
            RecordOutcome::Failed { .. } => "failure",
            RecordOutcome::Skipped { .. } => "skipped",
        }
    }

    pub fn detail(&self) -> Option<String> {
        match self {
            RecordOutcome::Succeeded { .. } => None,
            RecordOutcome::Failed { reason, .. } => Some(reason.to_string()),
            RecordOutcome::Skipped { reason, .. } => Some(format!("{reason:?}")),
        }
    }
}

/// Which batch pass a summary belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    Onboarding,
    Offboarding,
}

/// Outcome counters for one batch pass, labeled by result.
#[derive(Debug)]
pub struct RunSummary {
    pub kind: RunKind,
    pub correlation_id: String,
    pub success: u32,
    pub failure: u32,
    pub skipped: u32,
    pub outcomes: Vec<RecordOutcome>,
    pub duration: Duration,
}

impl RunSummary {
    fn new(kind: RunKind, correlation_id: String) -> Self {
        Self {
            kind,
            correlation_id,
            success: 0,
            failure: 0,
            skipped: 0,
            outcomes: Vec::new(),
            duration: Duration::ZERO,
        }
    }

    /// True when no records were eligible: the run performed zero writes.
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    fn record(&mut self, outcome: RecordOutcome) {
        match &outcome {
            RecordOutcome::Succeeded { id } => {
                self.success += 1;
                info!(employee_id = id, "Record processed successfully");
            }
            RecordOutcome::Failed { id, reason } => {
                self.failure += 1;
                error!(employee_id = id, %reason, "Record failed, continuing with next");
            }
            RecordOutcome::Skipped { id, reason } => {
                self.skipped += 1;
                info!(employee_id = id, ?reason, "Record skipped");
            }
        }
        self.outcomes.push(outcome);
    }
}

/// Guards against two deskhand processes running on the same host. Remote
/// overlap is handled by the store-level claim, not by this lock.
pub struct RunLock {
    _guard: RwLockWriteGuard<'static, File>,
}

impl RunLock {
    pub fn acquire(path: &str) -> Result<Self, RunError> {
        let as_path = Path::new(path);
        if let Some(parent) = as_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| RunError::Lock {
                    path: path.to_string(),
                    source,
                })?;
            }
        }

        let lock_file = File::create(as_path).map_err(|source| RunError::Lock {
            path: path.to_string(),
            source,
        })?;
        let lock = Box::leak(Box::new(RwLock::new(lock_file)));
        let guard = lock.try_write().map_err(|_| RunError::AlreadyRunning {
            path: path.to_string(),
        })?;

        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown-host".to_string());
        info!(path, host, "Acquired run lock");

        Ok(Self { _guard: guard })
    }
}

/// Drives one batch pass over the eligible records.
///
/// Every collaborator is injected and lives exactly as long as the run; there
/// is no process-wide client state to go stale between runs.
pub struct JobRunner<'a> {
    store: &'a dyn RecordStore,
    provisioner: &'a dyn Provisioner,
    directory: &'a dyn Directory,
    notifier: &'a dyn Notifier,
    config: &'a RunnerConfig,
    metrics: &'a MetricsTracker,
}

impl<'a> JobRunner<'a> {
    pub fn new(
        store: &'a dyn RecordStore,
        provisioner: &'a dyn Provisioner,
        directory: &'a dyn Directory,
        notifier: &'a dyn Notifier,
        config: &'a RunnerConfig,
        metrics: &'a MetricsTracker,
    ) -> Self {
        Self {
            store,
            provisioner,
            directory,
            notifier,
            config,
            metrics,
        }
    }

    /// One onboarding pass: NEW records become ACTIVE or stay untouched.
    pub async fn run_onboarding(&self) -> Result<RunSummary, RunError> {
        self.run(RunKind::Onboarding).await
    }

    /// One offboarding pass over INACTIVE, not-yet-deprovisioned records.
    pub async fn run_offboarding(&self) -> Result<RunSummary, RunError> {
        self.run(RunKind::Offboarding).await
    }

    async fn run(&self, kind: RunKind) -> Result<RunSummary, RunError> {
        let correlation_id = generate_correlation_id();
        let started = Instant::now();
        let deadline = started + Duration::from_secs(self.config.run_deadline_seconds);

        info!(?kind, correlation_id = %correlation_id, "Batch run started");

        let candidates = match kind {
            RunKind::Onboarding => self.store.onboarding_candidates().await?,
            RunKind::Offboarding => self.store.offboarding_candidates().await?,
        };

        let mut summary = RunSummary::new(kind, correlation_id);
        if candidates.is_empty() {
            info!(?kind, "No eligible employees, nothing to do");
            summary.duration = started.elapsed();
            return Ok(summary);
        }

        info!(?kind, count = candidates.len(), "Found eligible employees");

        for id in candidates {
            if Instant::now() >= deadline {
                warn!(employee_id = id, "Run deadline exhausted, failing remaining record");
                summary.record(RecordOutcome::Failed {
                    id,
                    reason: WorkflowError::DeadlineExhausted,
                });
                continue;
            }

            let outcome = self.process_record(kind, id).await?;
            summary.record(outcome);
        }

        summary.duration = started.elapsed();
        info!(
            ?kind,
            success = summary.success,
            failure = summary.failure,
            skipped = summary.skipped,
            duration_ms = summary.duration.as_millis() as u64,
            "Batch run finished"
        );

        if let Err(e) = self.metrics.record_run(&summary).await {
            warn!(error = %e, "Failed to persist run metrics");
        }

        Ok(summary)
    }

    /// The failure-isolating boundary around a single record. Returns `Err`
    /// only for store connectivity loss, which is fatal for the run.
    async fn process_record(&self, kind: RunKind, id: i64) -> Result<RecordOutcome, RunError> {
        let stale_after = Duration::from_secs(self.config.claim_stale_seconds);
        let claimed = match kind {
            RunKind::Onboarding => self.store.claim_for_onboarding(id, stale_after).await,
            RunKind::Offboarding => self.store.claim_for_offboarding(id, stale_after).await,
        };

        let record = match claimed {
            Ok(Some(record)) => record,
            // Someone else claimed it, or it stopped being eligible. Fine.
            Ok(None) => {
                return Ok(RecordOutcome::Skipped {
                    id,
                    reason: SkipReason::LostClaim,
                })
            }
            Err(StoreError::Malformed { id, detail }) => {
                return Ok(RecordOutcome::Failed {
                    id,
                    reason: WorkflowError::Store(StoreError::Malformed { id, detail }),
                })
            }
            Err(e) => return Err(RunError::Store(e)),
        };

        let budget = Duration::from_secs(self.config.record_timeout_seconds);
        let workflow = async {
            match kind {
                RunKind::Onboarding => {
                    onboarding::onboard_record(
                        self.store,
                        self.provisioner,
                        self.directory,
                        self.notifier,
                        &record,
                    )
                    .await
                }
                RunKind::Offboarding => {
                    offboarding::offboard_record(self.store, self.directory, &record).await
                }
            }
        };

        match tokio::time::timeout(budget, workflow).await {
            Ok(Ok(())) => Ok(RecordOutcome::Succeeded { id }),
            Ok(Err(WorkflowError::Store(StoreError::RecordVanished { .. }))) => {
                Ok(RecordOutcome::Skipped {
                    id,
                    reason: SkipReason::RecordVanished,
                })
            }
            Ok(Err(WorkflowError::Store(StoreError::Connectivity(e)))) => {
                Err(RunError::Store(StoreError::Connectivity(e)))
            }
            Ok(Err(reason)) => {
                self.release_claim_best_effort(id).await;
                Ok(RecordOutcome::Failed { id, reason })
            }
            Err(_elapsed) => {
                self.release_claim_best_effort(id).await;
                Ok(RecordOutcome::Failed {
                    id,
                    reason: WorkflowError::Timeout {
                        seconds: self.config.record_timeout_seconds,
                    },
                })
            }
        }
    }

    /// Failed records must become eligible again. If the release itself
    /// fails, the claim staleness window still frees the record eventually.
    async fn release_claim_best_effort(&self, id: i64) {
        if let Err(e) = self.store.release_claim(id).await {
            warn!(employee_id = id, error = %e, "Could not release claim; staleness window will free it");
        }
    }
}
