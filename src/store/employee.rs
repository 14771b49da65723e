use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of an employee record.
///
/// The HR portal creates records as `New` and later flips `Active` records to
/// `Inactive`; this crate owns the `New -> Active` transition and the
/// terminal deprovisioning flag, nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmployeeStatus {
    New,
    Active,
    Inactive,
}

impl EmployeeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmployeeStatus::New => "NEW",
            EmployeeStatus::Active => "ACTIVE",
            EmployeeStatus::Inactive => "INACTIVE",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "NEW" => Some(EmployeeStatus::New),
            "ACTIVE" => Some(EmployeeStatus::Active),
            "INACTIVE" => Some(EmployeeStatus::Inactive),
            _ => None,
        }
    }
}

impl std::fmt::Display for EmployeeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HR role as recorded by the portal. The portal stores free text, so parsing
/// is lenient about case and separators; anything unrecognized is treated as
/// a regular employee for group mapping purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Employee,
    Manager,
    HrAdmin,
}

impl Role {
    /// Case- and separator-insensitive parse ("HR_Admin", "hr-admin" and
    /// "HRAdmin" all map to `HrAdmin`).
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized: String = raw
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "employee" => Some(Role::Employee),
            "manager" => Some(Role::Manager),
            "hradmin" => Some(Role::HrAdmin),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Employee => "Employee",
            Role::Manager => "Manager",
            Role::HrAdmin => "HR_Admin",
        }
    }
}

/// One row of the `employees` table.
///
/// `role` stays raw: the portal writes free text and the identity mapping is
/// required to be total over arbitrary strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmployeeRecord {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub department: String,
    pub role: String,
    pub status: EmployeeStatus,
    pub cloud_account_created: bool,
    pub device_enrolled: bool,
    pub deprovisioned: bool,
    pub workspace_username: Option<String>,
    pub workspace_temp_password: Option<String>,
    pub last_action: String,
    pub claimed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl EmployeeRecord {
    pub fn role(&self) -> Option<Role> {
        Role::parse(&self.role)
    }
}

/// Row counts surfaced by `deskhand status`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StoreCounts {
    pub awaiting_onboarding: u64,
    pub awaiting_offboarding: u64,
    pub active: u64,
    pub total: u64,
}
