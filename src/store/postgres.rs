use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::info;

use crate::config::DatabaseConfig;

use super::employee::{EmployeeRecord, EmployeeStatus, StoreCounts};
use super::{RecordStore, StoreError};

const RECORD_COLUMNS: &str = "id, name, email, department, role, status, \
     cloud_account_created, device_enrolled, deprovisioned, \
     workspace_username, workspace_temp_password, last_action, claimed_at, updated_at";

/// Postgres-backed employee store shared with the HR portal.
pub struct PgEmployeeStore {
    pool: PgPool,
}

impl PgEmployeeStore {
    /// Connect to the employees database and optionally run migrations.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.name)
            .username(&config.user)
            .password(&config.password);

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .connect_with(options)
            .await?;

        if config.auto_migrate {
            info!("Running database migrations...");
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .map_err(sqlx::Error::from)?;
            info!("Database migrations completed");
        }

        Ok(Self { pool })
    }

    /// Wrap an existing pool (integration tests connect their own).
    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Close pool connections gracefully.
    pub async fn shutdown(&self) {
        self.pool.close().await;
    }

    fn record_from_row(row: &PgRow) -> Result<EmployeeRecord, StoreError> {
        let id: i64 = row.get("id");
        let raw_status: String = row.get("status");
        let status = EmployeeStatus::parse(&raw_status).ok_or_else(|| StoreError::Malformed {
            id,
            detail: format!("unknown status {raw_status:?}"),
        })?;

        Ok(EmployeeRecord {
            id,
            name: row.get("name"),
            email: row.get("email"),
            department: row.get("department"),
            role: row.get("role"),
            status,
            cloud_account_created: row.get("cloud_account_created"),
            device_enrolled: row.get("device_enrolled"),
            deprovisioned: row.get("deprovisioned"),
            workspace_username: row.get("workspace_username"),
            workspace_temp_password: row.get("workspace_temp_password"),
            last_action: row.get("last_action"),
            claimed_at: row.get("claimed_at"),
            updated_at: row.get("updated_at"),
        })
    }

    async fn claim(
        &self,
        id: i64,
        eligibility: &str,
        stale_after: Duration,
    ) -> Result<Option<EmployeeRecord>, StoreError> {
        // Eligibility check and reservation in one statement: of two
        // concurrent runs, exactly one sees the row come back.
        let sql = format!(
            "UPDATE employees \
             SET claimed_at = NOW() \
             WHERE id = $1 \
               AND {eligibility} \
               AND (claimed_at IS NULL OR claimed_at < NOW() - make_interval(secs => $2)) \
             RETURNING {RECORD_COLUMNS}"
        );

        let row = sqlx::query(&sql)
            .bind(id)
            .bind(stale_after.as_secs_f64())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::record_from_row).transpose()
    }
}

#[async_trait]
impl RecordStore for PgEmployeeStore {
    async fn onboarding_candidates(&self) -> Result<Vec<i64>, StoreError> {
        let rows = sqlx::query(
            "SELECT id FROM employees \
             WHERE status = 'NEW' AND cloud_account_created = FALSE \
             ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|row| row.get("id")).collect())
    }

    async fn offboarding_candidates(&self) -> Result<Vec<i64>, StoreError> {
        let rows = sqlx::query(
            "SELECT id FROM employees \
             WHERE status = 'INACTIVE' AND deprovisioned = FALSE \
             ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|row| row.get("id")).collect())
    }

    async fn claim_for_onboarding(
        &self,
        id: i64,
        stale_after: Duration,
    ) -> Result<Option<EmployeeRecord>, StoreError> {
        self.claim(
            id,
            "status = 'NEW' AND cloud_account_created = FALSE",
            stale_after,
        )
        .await
    }

    async fn claim_for_offboarding(
        &self,
        id: i64,
        stale_after: Duration,
    ) -> Result<Option<EmployeeRecord>, StoreError> {
        self.claim(
            id,
            "status = 'INACTIVE' AND deprovisioned = FALSE",
            stale_after,
        )
        .await
    }

    async fn release_claim(&self, id: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE employees SET claimed_at = NULL WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn commit_onboarded(
        &self,
        id: i64,
        workspace_username: &str,
        workspace_temp_password: &str,
        audit: &str,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE employees \
             SET status = 'ACTIVE', \
                 cloud_account_created = TRUE, \
                 device_enrolled = TRUE, \
                 workspace_username = $2, \
                 workspace_temp_password = $3, \
                 last_action = $4, \
                 claimed_at = NULL, \
                 updated_at = NOW() \
             WHERE id = $1 AND status = 'NEW'",
        )
        .bind(id)
        .bind(workspace_username)
        .bind(workspace_temp_password)
        .bind(audit)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::RecordVanished { id });
        }
        Ok(())
    }

    async fn commit_offboarded(&self, id: i64, audit: &str) -> Result<(), StoreError> {
        // `deprovisioned` is monotonic: nothing in this crate ever writes FALSE.
        let result = sqlx::query(
            "UPDATE employees \
             SET deprovisioned = TRUE, \
                 last_action = $2, \
                 claimed_at = NULL, \
                 updated_at = NOW() \
             WHERE id = $1 AND status = 'INACTIVE' AND deprovisioned = FALSE",
        )
        .bind(id)
        .bind(audit)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::RecordVanished { id });
        }
        Ok(())
    }

    async fn counts(&self) -> Result<StoreCounts, StoreError> {
        let row = sqlx::query(
            "SELECT \
               COUNT(*) FILTER (WHERE status = 'NEW' AND cloud_account_created = FALSE) AS awaiting_onboarding, \
               COUNT(*) FILTER (WHERE status = 'INACTIVE' AND deprovisioned = FALSE) AS awaiting_offboarding, \
               COUNT(*) FILTER (WHERE status = 'ACTIVE') AS active, \
               COUNT(*) AS total \
             FROM employees",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(StoreCounts {
            awaiting_onboarding: row.get::<i64, _>("awaiting_onboarding") as u64,
            awaiting_offboarding: row.get::<i64, _>("awaiting_offboarding") as u64,
            active: row.get::<i64, _>("active") as u64,
            total: row.get::<i64, _>("total") as u64,
        })
    }
}
