// Employee record store - the single source of truth for lifecycle state.
// Eligibility reads and claim/commit writes are conditional SQL so that two
// overlapping runs can never both process the same record.

pub mod employee;
pub mod postgres;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use employee::{EmployeeRecord, EmployeeStatus, Role, StoreCounts};
pub use postgres::PgEmployeeStore;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Store unreachable or a query failed outright. Fatal for the run.
    #[error("database connectivity error: {0}")]
    Connectivity(#[from] sqlx::Error),

    /// The conditional claim or commit matched zero rows: the record was
    /// deleted or transitioned by someone else between read and write.
    #[error("employee {id} vanished or changed between read and write")]
    RecordVanished { id: i64 },

    /// A row holds data we cannot interpret (e.g. an unknown status value).
    #[error("employee {id} holds malformed data: {detail}")]
    Malformed { id: i64, detail: String },
}

/// Persistence boundary consumed by the job runner.
///
/// The claim operations combine the eligibility predicate and the reservation
/// write in one atomic statement; `Ok(None)` means the record was already
/// claimed or no longer eligible and must be skipped, not retried.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Ids of records with `status = NEW` and no cloud account yet, ascending.
    async fn onboarding_candidates(&self) -> Result<Vec<i64>, StoreError>;

    /// Ids of records with `status = INACTIVE` not yet deprovisioned, ascending.
    async fn offboarding_candidates(&self) -> Result<Vec<i64>, StoreError>;

    /// Atomically reserve an onboarding-eligible record. Claims older than
    /// `stale_after` are treated as abandoned and may be re-taken.
    async fn claim_for_onboarding(
        &self,
        id: i64,
        stale_after: Duration,
    ) -> Result<Option<EmployeeRecord>, StoreError>;

    /// Offboarding analogue of [`RecordStore::claim_for_onboarding`].
    async fn claim_for_offboarding(
        &self,
        id: i64,
        stale_after: Duration,
    ) -> Result<Option<EmployeeRecord>, StoreError>;

    /// Drop a claim after a failed workflow so a future run retries the record.
    async fn release_claim(&self, id: i64) -> Result<(), StoreError>;

    /// Commit a completed onboarding: ACTIVE, provisioning flags, credentials,
    /// audit text. Guarded by `status = NEW`; zero rows is `RecordVanished`.
    async fn commit_onboarded(
        &self,
        id: i64,
        workspace_username: &str,
        workspace_temp_password: &str,
        audit: &str,
    ) -> Result<(), StoreError>;

    /// Commit a completed offboarding: `deprovisioned = TRUE` plus audit text.
    /// Guarded by `status = INACTIVE AND deprovisioned = FALSE`.
    async fn commit_offboarded(&self, id: i64, audit: &str) -> Result<(), StoreError>;

    /// Row counts for the `status` subcommand.
    async fn counts(&self) -> Result<StoreCounts, StoreError>;
}
