//! Job runner failure-isolation tests.
//!
//! These exercise the batch contract end to end against in-memory fakes:
//! - one failing record never aborts the batch
//! - failed records stay eligible (untouched) for a future run
//! - nothing is written when nothing is eligible
//! - identity failures abort a record, mail failures do not
//! - `deprovisioned` never goes back to false

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use deskhand::compute::{Provisioner, ProvisioningError, Workstation, WorkstationRequest};
use deskhand::config::RunnerConfig;
use deskhand::identity::{Directory, IdentityError};
use deskhand::metrics::MetricsTracker;
use deskhand::notify::{Notifier, NotifyError, SendOutcome, WelcomeMail};
use deskhand::runner::{JobRunner, RecordOutcome, SkipReason, WorkflowError};
use deskhand::store::{
    EmployeeRecord, EmployeeStatus, RecordStore, StoreCounts, StoreError,
};

// ---- In-memory record store -------------------------------------------------

#[derive(Default)]
struct MemoryStore {
    records: Mutex<HashMap<i64, EmployeeRecord>>,
    writes: AtomicU32,
}

impl MemoryStore {
    fn with_records(records: Vec<EmployeeRecord>) -> Self {
        let store = MemoryStore::default();
        {
            let mut map = store.records.lock().unwrap();
            for record in records {
                map.insert(record.id, record);
            }
        }
        store
    }

    fn get(&self, id: i64) -> EmployeeRecord {
        self.records.lock().unwrap().get(&id).unwrap().clone()
    }

    fn write_count(&self) -> u32 {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn onboarding_candidates(&self) -> Result<Vec<i64>, StoreError> {
        let map = self.records.lock().unwrap();
        let mut ids: Vec<i64> = map
            .values()
            .filter(|r| r.status == EmployeeStatus::New && !r.cloud_account_created)
            .map(|r| r.id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn offboarding_candidates(&self) -> Result<Vec<i64>, StoreError> {
        let map = self.records.lock().unwrap();
        let mut ids: Vec<i64> = map
            .values()
            .filter(|r| r.status == EmployeeStatus::Inactive && !r.deprovisioned)
            .map(|r| r.id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn claim_for_onboarding(
        &self,
        id: i64,
        _stale_after: Duration,
    ) -> Result<Option<EmployeeRecord>, StoreError> {
        let mut map = self.records.lock().unwrap();
        let Some(record) = map.get_mut(&id) else {
            return Ok(None);
        };
        if record.status != EmployeeStatus::New
            || record.cloud_account_created
            || record.claimed_at.is_some()
        {
            return Ok(None);
        }
        record.claimed_at = Some(Utc::now());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(Some(record.clone()))
    }

    async fn claim_for_offboarding(
        &self,
        id: i64,
        _stale_after: Duration,
    ) -> Result<Option<EmployeeRecord>, StoreError> {
        let mut map = self.records.lock().unwrap();
        let Some(record) = map.get_mut(&id) else {
            return Ok(None);
        };
        if record.status != EmployeeStatus::Inactive
            || record.deprovisioned
            || record.claimed_at.is_some()
        {
            return Ok(None);
        }
        record.claimed_at = Some(Utc::now());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(Some(record.clone()))
    }

    async fn release_claim(&self, id: i64) -> Result<(), StoreError> {
        let mut map = self.records.lock().unwrap();
        if let Some(record) = map.get_mut(&id) {
            record.claimed_at = None;
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn commit_onboarded(
        &self,
        id: i64,
        workspace_username: &str,
        workspace_temp_password: &str,
        audit: &str,
    ) -> Result<(), StoreError> {
        let mut map = self.records.lock().unwrap();
        let record = map
            .get_mut(&id)
            .filter(|r| r.status == EmployeeStatus::New)
            .ok_or(StoreError::RecordVanished { id })?;

        record.status = EmployeeStatus::Active;
        record.cloud_account_created = true;
        record.device_enrolled = true;
        record.workspace_username = Some(workspace_username.to_string());
        record.workspace_temp_password = Some(workspace_temp_password.to_string());
        record.last_action = audit.to_string();
        record.claimed_at = None;
        record.updated_at = Utc::now();
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn commit_offboarded(&self, id: i64, audit: &str) -> Result<(), StoreError> {
        let mut map = self.records.lock().unwrap();
        let record = map
            .get_mut(&id)
            .filter(|r| r.status == EmployeeStatus::Inactive && !r.deprovisioned)
            .ok_or(StoreError::RecordVanished { id })?;

        record.deprovisioned = true;
        record.last_action = audit.to_string();
        record.claimed_at = None;
        record.updated_at = Utc::now();
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn counts(&self) -> Result<StoreCounts, StoreError> {
        Ok(StoreCounts::default())
    }
}

// ---- Fake adapters ----------------------------------------------------------

/// Provisioner that fails for a chosen set of employee ids.
#[derive(Default)]
struct FakeProvisioner {
    fail_for: Vec<i64>,
    provisioned: Mutex<Vec<i64>>,
}

#[async_trait]
impl Provisioner for FakeProvisioner {
    async fn provision(
        &self,
        request: &WorkstationRequest<'_>,
    ) -> Result<Workstation, ProvisioningError> {
        if self.fail_for.contains(&request.employee_id) {
            return Err(ProvisioningError::OperationFailed(
                "QUOTA_EXCEEDED: no capacity in zone".to_string(),
            ));
        }
        self.provisioned.lock().unwrap().push(request.employee_id);
        Ok(Workstation {
            instance_name: format!("hr-ws-{}", request.employee_id),
            address: "203.0.113.10".to_string(),
        })
    }
}

#[derive(Default)]
struct FakeDirectory {
    fail_for: Vec<String>,
    applied: Mutex<Vec<(String, BTreeSet<String>)>>,
    offboarded: Mutex<Vec<String>>,
}

#[async_trait]
impl Directory for FakeDirectory {
    async fn apply_groups(
        &self,
        email: &str,
        groups: &BTreeSet<String>,
    ) -> Result<(), IdentityError> {
        if self.fail_for.iter().any(|e| e == email) {
            return Err(IdentityError::DirectoryRejected {
                operation: "apply_groups",
                email: email.to_string(),
                detail: "backend unavailable".to_string(),
            });
        }
        self.applied
            .lock()
            .unwrap()
            .push((email.to_string(), groups.clone()));
        Ok(())
    }

    async fn offboard_account(
        &self,
        email: &str,
        _groups: &BTreeSet<String>,
    ) -> Result<(), IdentityError> {
        if self.fail_for.iter().any(|e| e == email) {
            return Err(IdentityError::DirectoryRejected {
                operation: "offboard_account",
                email: email.to_string(),
                detail: "backend unavailable".to_string(),
            });
        }
        self.offboarded.lock().unwrap().push(email.to_string());
        Ok(())
    }
}

#[derive(Default)]
struct FakeNotifier {
    fail: bool,
    sent_to: Mutex<Vec<String>>,
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn send_welcome(&self, mail: &WelcomeMail<'_>) -> Result<SendOutcome, NotifyError> {
        if self.fail {
            return Err(NotifyError::InvalidAddress {
                address: mail.recipient.to_string(),
                detail: "relay rejected sender".to_string(),
            });
        }
        self.sent_to.lock().unwrap().push(mail.recipient.to_string());
        Ok(SendOutcome::Sent)
    }
}

// ---- Helpers ----------------------------------------------------------------

fn new_employee(id: i64, email: &str) -> EmployeeRecord {
    EmployeeRecord {
        id,
        name: format!("Employee {id}"),
        email: email.to_string(),
        department: "Engineering".to_string(),
        role: "Employee".to_string(),
        status: EmployeeStatus::New,
        cloud_account_created: false,
        device_enrolled: false,
        deprovisioned: false,
        workspace_username: None,
        workspace_temp_password: None,
        last_action: String::new(),
        claimed_at: None,
        updated_at: Utc::now(),
    }
}

fn inactive_employee(id: i64, email: &str) -> EmployeeRecord {
    EmployeeRecord {
        status: EmployeeStatus::Inactive,
        cloud_account_created: true,
        device_enrolled: true,
        ..new_employee(id, email)
    }
}

fn runner_config() -> RunnerConfig {
    RunnerConfig {
        run_deadline_seconds: 60,
        record_timeout_seconds: 5,
        claim_stale_seconds: 1800,
        lock_path: ".deskhand/test.lock".to_string(),
    }
}

struct Fixture {
    store: MemoryStore,
    provisioner: FakeProvisioner,
    directory: FakeDirectory,
    notifier: FakeNotifier,
    config: RunnerConfig,
    metrics: MetricsTracker,
}

impl Fixture {
    fn new(records: Vec<EmployeeRecord>) -> Self {
        Self {
            store: MemoryStore::with_records(records),
            provisioner: FakeProvisioner::default(),
            directory: FakeDirectory::default(),
            notifier: FakeNotifier::default(),
            config: runner_config(),
            metrics: MetricsTracker::disabled(),
        }
    }

    fn runner(&self) -> JobRunner<'_> {
        JobRunner::new(
            &self.store,
            &self.provisioner,
            &self.directory,
            &self.notifier,
            &self.config,
            &self.metrics,
        )
    }
}

// ---- Onboarding -------------------------------------------------------------

#[tokio::test]
async fn empty_run_performs_zero_writes() {
    let fixture = Fixture::new(vec![]);

    let summary = fixture.runner().run_onboarding().await.unwrap();

    assert!(summary.is_empty());
    assert_eq!(summary.success, 0);
    assert_eq!(summary.failure, 0);
    assert_eq!(fixture.store.write_count(), 0);
}

#[tokio::test]
async fn successful_run_transitions_every_new_record() {
    let fixture = Fixture::new(vec![
        new_employee(1, "a@corp.example"),
        new_employee(2, "b@corp.example"),
    ]);

    let summary = fixture.runner().run_onboarding().await.unwrap();

    assert_eq!(summary.success, 2);
    assert_eq!(summary.failure, 0);
    for id in [1, 2] {
        let record = fixture.store.get(id);
        assert_eq!(record.status, EmployeeStatus::Active);
        assert!(record.cloud_account_created);
        assert!(record.device_enrolled);
        assert!(record.workspace_username.is_some());
        assert!(record.workspace_temp_password.is_some());
        assert!(record.last_action.starts_with("Onboarding completed at "));
        assert!(record.claimed_at.is_none());
    }
    assert_eq!(
        fixture.notifier.sent_to.lock().unwrap().clone(),
        vec!["a@corp.example".to_string(), "b@corp.example".to_string()]
    );
}

#[tokio::test]
async fn provisioning_failure_is_isolated_to_its_record() {
    let mut fixture = Fixture::new(vec![
        new_employee(1, "a@corp.example"),
        new_employee(2, "b@corp.example"),
        new_employee(3, "c@corp.example"),
    ]);
    fixture.provisioner.fail_for = vec![2];

    let summary = fixture.runner().run_onboarding().await.unwrap();

    assert_eq!(summary.success, 2);
    assert_eq!(summary.failure, 1);
    assert_eq!(summary.skipped, 0);

    assert_eq!(fixture.store.get(1).status, EmployeeStatus::Active);
    assert_eq!(fixture.store.get(3).status, EmployeeStatus::Active);

    // The failed record is left as it was, ready for the next run.
    let failed = fixture.store.get(2);
    assert_eq!(failed.status, EmployeeStatus::New);
    assert!(!failed.cloud_account_created);
    assert!(failed.workspace_username.is_none());
    assert!(failed.claimed_at.is_none(), "claim must be released");

    match &summary.outcomes[1] {
        RecordOutcome::Failed { id: 2, reason } => {
            assert!(matches!(reason, WorkflowError::Provisioning(_)));
        }
        other => panic!("expected record 2 to fail, got {other:?}"),
    }
}

#[tokio::test]
async fn records_are_processed_in_id_order() {
    let fixture = Fixture::new(vec![
        new_employee(30, "c@corp.example"),
        new_employee(10, "a@corp.example"),
        new_employee(20, "b@corp.example"),
    ]);

    let summary = fixture.runner().run_onboarding().await.unwrap();

    let ids: Vec<i64> = summary.outcomes.iter().map(|o| o.id()).collect();
    assert_eq!(ids, vec![10, 20, 30]);
}

#[tokio::test]
async fn active_records_are_never_selected() {
    let mut active = new_employee(5, "done@corp.example");
    active.status = EmployeeStatus::Active;
    active.cloud_account_created = true;
    active.device_enrolled = true;
    let fixture = Fixture::new(vec![active]);

    let summary = fixture.runner().run_onboarding().await.unwrap();

    assert!(summary.is_empty());
    assert_eq!(fixture.store.write_count(), 0);
    assert_eq!(fixture.store.get(5).status, EmployeeStatus::Active);
}

#[tokio::test]
async fn identity_failure_aborts_the_record() {
    let mut fixture = Fixture::new(vec![new_employee(1, "blocked@corp.example")]);
    fixture.directory.fail_for = vec!["blocked@corp.example".to_string()];

    let summary = fixture.runner().run_onboarding().await.unwrap();

    assert_eq!(summary.failure, 1);
    let record = fixture.store.get(1);
    assert_eq!(record.status, EmployeeStatus::New);
    assert!(record.workspace_username.is_none());
    // No welcome mail for a record that never finished provisioning.
    assert!(fixture.notifier.sent_to.lock().unwrap().is_empty());
}

#[tokio::test]
async fn mail_failure_does_not_abort_the_record() {
    let mut fixture = Fixture::new(vec![new_employee(1, "a@corp.example")]);
    fixture.notifier.fail = true;

    let summary = fixture.runner().run_onboarding().await.unwrap();

    assert_eq!(summary.success, 1);
    assert_eq!(summary.failure, 0);
    assert_eq!(fixture.store.get(1).status, EmployeeStatus::Active);
}

#[tokio::test]
async fn already_claimed_record_is_skipped_without_side_effects() {
    let mut claimed = new_employee(1, "taken@corp.example");
    claimed.claimed_at = Some(Utc::now());
    let fixture = Fixture::new(vec![claimed]);

    let summary = fixture.runner().run_onboarding().await.unwrap();

    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.success, 0);
    assert!(matches!(
        summary.outcomes[0],
        RecordOutcome::Skipped {
            id: 1,
            reason: SkipReason::LostClaim
        }
    ));
    assert!(fixture.provisioner.provisioned.lock().unwrap().is_empty());
}

#[tokio::test]
async fn exhausted_deadline_fails_remaining_records_without_touching_them() {
    let mut fixture = Fixture::new(vec![
        new_employee(1, "a@corp.example"),
        new_employee(2, "b@corp.example"),
    ]);
    fixture.config.run_deadline_seconds = 0;

    let summary = fixture.runner().run_onboarding().await.unwrap();

    assert_eq!(summary.failure, 2);
    assert_eq!(fixture.store.write_count(), 0);
    assert_eq!(fixture.store.get(1).status, EmployeeStatus::New);
    assert!(summary
        .outcomes
        .iter()
        .all(|o| matches!(o, RecordOutcome::Failed { reason: WorkflowError::DeadlineExhausted, .. })));
}

// ---- Offboarding ------------------------------------------------------------

#[tokio::test]
async fn offboarding_deprovisions_inactive_records() {
    let fixture = Fixture::new(vec![
        inactive_employee(1, "left@corp.example"),
        inactive_employee(2, "gone@corp.example"),
    ]);

    let summary = fixture.runner().run_offboarding().await.unwrap();

    assert_eq!(summary.success, 2);
    for id in [1, 2] {
        let record = fixture.store.get(id);
        assert!(record.deprovisioned);
        assert!(record.last_action.starts_with("Offboarding completed at "));
    }
    assert_eq!(fixture.directory.offboarded.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn directory_failure_leaves_record_eligible_for_retry() {
    let mut fixture = Fixture::new(vec![inactive_employee(1, "stuck@corp.example")]);
    fixture.directory.fail_for = vec!["stuck@corp.example".to_string()];

    let summary = fixture.runner().run_offboarding().await.unwrap();

    assert_eq!(summary.failure, 1);
    let record = fixture.store.get(1);
    assert!(!record.deprovisioned);
    assert!(record.claimed_at.is_none());

    // A later run (with the directory healthy again) picks it back up.
    fixture.directory.fail_for.clear();
    let summary = fixture.runner().run_offboarding().await.unwrap();
    assert_eq!(summary.success, 1);
    assert!(fixture.store.get(1).deprovisioned);
}

#[tokio::test]
async fn deprovisioned_records_are_never_selected_again() {
    let mut done = inactive_employee(1, "done@corp.example");
    done.deprovisioned = true;
    let fixture = Fixture::new(vec![done]);

    let summary = fixture.runner().run_offboarding().await.unwrap();

    assert!(summary.is_empty());
    assert_eq!(fixture.store.write_count(), 0);
    // Monotonic: still true, untouched.
    assert!(fixture.store.get(1).deprovisioned);
}

#[tokio::test]
async fn onboarding_never_clears_the_deprovisioned_flag() {
    // A NEW record that somehow carries deprovisioned=true keeps it through
    // onboarding; no code path writes the flag back to false.
    let mut odd = new_employee(1, "odd@corp.example");
    odd.deprovisioned = true;
    let fixture = Fixture::new(vec![odd]);

    let summary = fixture.runner().run_onboarding().await.unwrap();

    assert_eq!(summary.success, 1);
    let record = fixture.store.get(1);
    assert_eq!(record.status, EmployeeStatus::Active);
    assert!(record.deprovisioned);
}
