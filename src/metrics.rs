// Run outcome tracking.
// Counters are part of every RunSummary; this sink additionally appends one
// JSONL event per batch pass so operators can grep run history offline.

use anyhow::Result;
use serde::Serialize;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::AsyncWriteExt;

use crate::runner::{RunKind, RunSummary};

#[derive(Debug, Clone, Serialize)]
struct RunEvent<'a> {
    correlation_id: &'a str,
    kind: RunKind,
    timestamp: u64, // Unix timestamp
    duration_ms: u64,
    success: u32,
    failure: u32,
    skipped: u32,
    records: Vec<RecordEvent>,
}

#[derive(Debug, Clone, Serialize)]
struct RecordEvent {
    employee_id: i64,
    result: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

/// Appends per-run outcome events under the metrics directory.
pub struct MetricsTracker {
    metrics_dir: Option<PathBuf>,
}

impl MetricsTracker {
    pub fn new(metrics_dir: impl Into<PathBuf>) -> Self {
        Self {
            metrics_dir: Some(metrics_dir.into()),
        }
    }

    /// No-op sink for tests and ad-hoc invocations.
    pub fn disabled() -> Self {
        Self { metrics_dir: None }
    }

    pub async fn record_run(&self, summary: &RunSummary) -> Result<()> {
        let Some(dir) = &self.metrics_dir else {
            return Ok(());
        };

        let event = RunEvent {
            correlation_id: &summary.correlation_id,
            kind: summary.kind,
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default(),
            duration_ms: summary.duration.as_millis() as u64,
            success: summary.success,
            failure: summary.failure,
            skipped: summary.skipped,
            records: summary
                .outcomes
                .iter()
                .map(|outcome| RecordEvent {
                    employee_id: outcome.id(),
                    result: outcome.label(),
                    detail: outcome.detail(),
                })
                .collect(),
        };

        tokio::fs::create_dir_all(dir).await?;
        let mut line = serde_json::to_string(&event)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("runs.jsonl"))
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        Ok(())
    }
}
