use chrono::{SecondsFormat, Utc};
use tracing::info;

use crate::identity::{groups_for, Directory};
use crate::store::{EmployeeRecord, RecordStore};

use super::WorkflowError;

/// Per-record offboarding workflow: every step is abortable, and the record
/// only reaches its terminal `deprovisioned` state after the directory calls
/// succeeded.
pub(crate) async fn offboard_record(
    store: &dyn RecordStore,
    directory: &dyn Directory,
    record: &EmployeeRecord,
) -> Result<(), WorkflowError> {
    info!(
        employee_id = record.id,
        email = %record.email,
        "Offboarding employee"
    );

    // Remove the same set onboarding granted for this role.
    let groups = groups_for(&record.role);
    directory.offboard_account(&record.email, &groups).await?;

    let audit = format!(
        "Offboarding completed at {}",
        Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
    );
    store.commit_offboarded(record.id, &audit).await?;

    info!(employee_id = record.id, "Employee marked as deprovisioned");
    Ok(())
}
