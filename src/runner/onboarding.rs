use chrono::{SecondsFormat, Utc};
use tracing::{info, warn};

use crate::compute::{Provisioner, WorkstationRequest};
use crate::identity::{groups_for, Directory};
use crate::notify::{Notifier, SendOutcome, WelcomeMail};
use crate::store::{EmployeeRecord, RecordStore};

use super::credentials::WorkspaceCredentials;
use super::WorkflowError;

/// Per-record onboarding workflow, strictly ordered:
/// credentials -> workstation -> identity groups -> welcome mail -> commit.
///
/// Provisioning and identity failures abort the record before any state is
/// written. A failed welcome mail does not: the credentials stay readable in
/// the portal, so the record still transitions.
pub(crate) async fn onboard_record(
    store: &dyn RecordStore,
    provisioner: &dyn Provisioner,
    directory: &dyn Directory,
    notifier: &dyn Notifier,
    record: &EmployeeRecord,
) -> Result<(), WorkflowError> {
    info!(
        employee_id = record.id,
        email = %record.email,
        "Onboarding employee"
    );

    let credentials = WorkspaceCredentials::generate(&record.email, record.id);

    let workstation = provisioner
        .provision(&WorkstationRequest {
            employee_id: record.id,
            department: &record.department,
            username: &credentials.username,
            temp_password: &credentials.temp_password,
        })
        .await?;

    let groups = groups_for(&record.role);
    directory.apply_groups(&record.email, &groups).await?;

    match notifier
        .send_welcome(&WelcomeMail {
            recipient: &record.email,
            employee_name: &record.name,
            department: &record.department,
            role: &record.role,
            workstation_address: &workstation.address,
            username: &credentials.username,
            temp_password: &credentials.temp_password,
        })
        .await
    {
        Ok(SendOutcome::Sent) => info!(employee_id = record.id, "Welcome mail sent"),
        Ok(SendOutcome::Skipped) => {}
        Err(e) => warn!(
            employee_id = record.id,
            error = %e,
            "Welcome mail failed; credentials remain available in the portal"
        ),
    }

    let audit = format!(
        "Onboarding completed at {}",
        Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
    );
    store
        .commit_onboarded(
            record.id,
            &credentials.username,
            &credentials.temp_password,
            &audit,
        )
        .await?;

    info!(
        employee_id = record.id,
        instance = %workstation.instance_name,
        "Employee marked as ACTIVE"
    );
    Ok(())
}
