//! Cloud identity adapter.
//!
//! Group mapping is pure and total: any string role resolves to a group set.
//! The directory calls themselves are simulated (log-only); the trait keeps
//! the seam mockable.

use std::collections::BTreeSet;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::store::Role;

pub const GROUP_ALL_EMPLOYEES: &str = "corp-all-employees";
pub const GROUP_MANAGERS: &str = "corp-managers";
pub const GROUP_HR_ADMINS: &str = "corp-hr-admins";

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("directory rejected {operation} for {email}: {detail}")]
    DirectoryRejected {
        operation: &'static str,
        email: String,
        detail: String,
    },
}

/// Access groups for a role string as the HR portal records it.
///
/// Total over arbitrary input: unrecognized roles fall back to the base set.
pub fn groups_for(role: &str) -> BTreeSet<String> {
    let mut groups = BTreeSet::from([GROUP_ALL_EMPLOYEES.to_string()]);
    match Role::parse(role) {
        Some(Role::Manager) => {
            groups.insert(GROUP_MANAGERS.to_string());
        }
        Some(Role::HrAdmin) => {
            groups.insert(GROUP_HR_ADMINS.to_string());
        }
        Some(Role::Employee) | None => {}
    }
    groups
}

/// Boundary to the cloud identity directory.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Create/enable the account and add it to every group in the set.
    async fn apply_groups(
        &self,
        email: &str,
        groups: &BTreeSet<String>,
    ) -> Result<(), IdentityError>;

    /// Disable the account, revoke active sessions, and remove it from every
    /// group in the set.
    async fn offboard_account(
        &self,
        email: &str,
        groups: &BTreeSet<String>,
    ) -> Result<(), IdentityError>;
}

/// Log-only directory used in every environment this service targets.
#[derive(Debug, Default, Clone)]
pub struct SimulatedDirectory;

#[async_trait]
impl Directory for SimulatedDirectory {
    async fn apply_groups(
        &self,
        email: &str,
        groups: &BTreeSet<String>,
    ) -> Result<(), IdentityError> {
        info!(email, "Enabling cloud identity account");
        for group in groups {
            info!(email, group, "Adding account to group");
        }
        Ok(())
    }

    async fn offboard_account(
        &self,
        email: &str,
        groups: &BTreeSet<String>,
    ) -> Result<(), IdentityError> {
        info!(email, "Disabling cloud identity account");
        info!(email, "Revoking active sessions");
        for group in groups {
            info!(email, group, "Removing account from group");
        }
        Ok(())
    }
}
