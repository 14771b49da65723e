use rand::distr::Alphanumeric;
use rand::Rng;
use regex::Regex;
use std::sync::LazyLock;

const USERNAME_MAX_LEN: usize = 20;
const TEMP_PASSWORD_LEN: usize = 12;

static DISALLOWED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[^a-z0-9_]").expect("username filter pattern is valid")
});

/// Workspace login material generated during onboarding.
#[derive(Debug, Clone)]
pub struct WorkspaceCredentials {
    pub username: String,
    pub temp_password: String,
}

impl WorkspaceCredentials {
    pub fn generate(email: &str, employee_id: i64) -> Self {
        Self {
            username: derive_username(email, employee_id),
            temp_password: generate_temp_password(),
        }
    }
}

/// Deterministic username from the mail local part:
/// `giovanni.hr@innovatech.com` -> `giovanni_hr`.
///
/// Collisions are not deduplicated; unique mail addresses make the derived
/// names unique enough for this scope.
pub fn derive_username(email: &str, employee_id: i64) -> String {
    let local_part = email.split('@').next().unwrap_or_default();
    let lowered = local_part
        .to_ascii_lowercase()
        .replace(['.', '-', ' '], "_");
    let cleaned = DISALLOWED.replace_all(&lowered, "");
    let cleaned = cleaned.trim_matches('_');

    if cleaned.is_empty() {
        return format!("user{employee_id}");
    }
    cleaned.chars().take(USERNAME_MAX_LEN).collect()
}

/// 12 alphanumeric characters from the thread-local CSPRNG.
pub fn generate_temp_password() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(TEMP_PASSWORD_LEN)
        .map(char::from)
        .collect()
}
