// deskhand library - HR workstation lifecycle automation
// This exposes the core components for testing and integration

pub mod compute;
pub mod config;
pub mod identity;
pub mod metrics;
pub mod notify;
pub mod runner;
pub mod store;
pub mod telemetry;

// Re-export key types for easy access
pub use compute::{
    ComputeApi, HttpComputeClient, Provisioner, ProvisioningError, Workstation,
    WorkstationProvisioner, WorkstationRequest,
};
pub use config::{ConfigError, DeskhandConfig};
pub use identity::{groups_for, Directory, IdentityError, SimulatedDirectory};
pub use metrics::MetricsTracker;
pub use notify::{Mailer, Notifier, NotifyError, SendOutcome, WelcomeMail};
pub use runner::{
    JobRunner, RecordOutcome, RunError, RunKind, RunLock, RunSummary, SkipReason, WorkflowError,
    WorkspaceCredentials,
};
pub use store::{
    EmployeeRecord, EmployeeStatus, PgEmployeeStore, RecordStore, Role, StoreCounts, StoreError,
};
pub use telemetry::{create_run_span, generate_correlation_id, init_telemetry};
