// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = "Append-only audit records, in memory and day-rotated on disk."]
#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, NaiveDate, Utc};
use cm_core::{AbpError, EvidenceRecord};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

/// Default audit log retention, in days.
pub const DEFAULT_RETENTION_DAYS: i64 = 30;

/// The complete audit trail for a single task.
#[derive(Debug, Clone, Serialize)]
pub struct AuditTrail {
    /// The task identifier these records belong to.
    pub task_id: String,
    /// Timestamp of the earliest record.
    pub start_time: Option<DateTime<Utc>>,
    /// Timestamp of the latest record.
    pub end_time: Option<DateTime<Utc>>,
    /// Number of records found.
    pub total_records: usize,
    /// The records themselves, in insertion order.
    pub records: Vec<EvidenceRecord>,
}

/// An append-only evidence recorder.
///
/// Holds an in-memory ring of every record appended this process, and can
/// additionally persist each record to a day-rotated on-disk log. Safe
/// under concurrent callers from within the same process: readers run
/// concurrently, writers are exclusive (the same posture as the artifact
/// store's manifest index).
pub struct EvidenceRecorder {
    records: RwLock<Vec<EvidenceRecord>>,
    audit_dir: PathBuf,
    retention_days: i64,
}

impl EvidenceRecorder {
    /// Create a recorder that persists to `audit_dir` with the default
    /// 30-day retention.
    #[must_use]
    pub fn new(audit_dir: impl Into<PathBuf>) -> Self {
        Self::with_retention(audit_dir, DEFAULT_RETENTION_DAYS)
    }

    /// Create a recorder with an explicit retention window in days.
    #[must_use]
    pub fn with_retention(audit_dir: impl Into<PathBuf>, retention_days: i64) -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            audit_dir: audit_dir.into(),
            retention_days,
        }
    }

    /// Append `event` to the in-memory ring, completing `evidence_id` and
    /// `timestamp` if they were left unset.
    ///
    /// # Errors
    ///
    /// Returns [`AbpError::Validation`] if `operation` is empty.
    pub async fn record(&self, mut event: EvidenceRecord) -> Result<EvidenceRecord, AbpError> {
        if event.operation.trim().is_empty() {
            return Err(AbpError::Validation(
                "evidence record must have a non-empty operation".to_string(),
            ));
        }
        if event.evidence_id.is_nil() {
            event.evidence_id = Uuid::new_v4();
        }
        if event.timestamp == DateTime::<Utc>::UNIX_EPOCH {
            event.timestamp = Utc::now();
        }

        let mut guard = self.records.write().await;
        guard.push(event.clone());
        drop(guard);

        Ok(event)
    }

    /// The most recently appended record, if any.
    pub async fn last_record(&self) -> Option<EvidenceRecord> {
        self.records.read().await.last().cloned()
    }

    /// All records for a given task id, in insertion order.
    pub async fn records(&self, task_id: &str) -> Vec<EvidenceRecord> {
        self.records
            .read()
            .await
            .iter()
            .filter(|r| r.task_id.as_deref() == Some(task_id))
            .cloned()
            .collect()
    }

    /// Aggregate the audit trail for a given task id.
    pub async fn audit_trail(&self, task_id: &str) -> AuditTrail {
        let records = self.records(task_id).await;
        let start_time = records.iter().map(|r| r.timestamp).min();
        let end_time = records.iter().map(|r| r.timestamp).max();
        AuditTrail {
            task_id: task_id.to_string(),
            start_time,
            end_time,
            total_records: records.len(),
            records,
        }
    }

    /// Append one JSON document plus a trailing newline to
    /// `<audit_dir>/<YYYY-MM-DD>-audit.log`, creating the directory on
    /// demand. The full line is assembled in memory before a single atomic
    /// append so concurrent writers never interleave partial lines.
    ///
    /// Runs [`Self::prune_older_than`] first (a cheap directory scan) so
    /// retention is enforced on the write path as the design permits.
    ///
    /// # Errors
    ///
    /// Returns [`AbpError::Io`] if the directory cannot be created, the
    /// record cannot be serialized, or the append fails.
    pub async fn write_to_audit_log(&self, record: &EvidenceRecord) -> Result<(), AbpError> {
        self.prune_older_than(self.retention_days).await?;

        tokio::fs::create_dir_all(&self.audit_dir).await?;

        let day = record.timestamp.format("%Y-%m-%d");
        let path = self.audit_dir.join(format!("{day}-audit.log"));

        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        debug!(path = %path.display(), "appended audit log line");
        Ok(())
    }

    /// Remove audit log files whose date prefix is older than
    /// `now - days`.
    ///
    /// # Errors
    ///
    /// Returns [`AbpError::Io`] if the directory exists but cannot be read.
    pub async fn prune_older_than(&self, days: i64) -> Result<usize, AbpError> {
        let mut entries = match tokio::fs::read_dir(&self.audit_dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let cutoff = (Utc::now() - chrono::Duration::days(days)).date_naive();
        let mut removed = 0usize;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(date) = file_date(&path) else {
                continue;
            };
            if date < cutoff {
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    warn!(path = %path.display(), error = %e, "failed to prune audit log");
                } else {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}

fn file_date(path: &Path) -> Option<NaiveDate> {
    let name = path.file_name()?.to_str()?;
    let prefix = name.strip_suffix("-audit.log")?;
    NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use cm_core::Execution;
    use tempfile::tempdir;

    #[tokio::test]
    async fn record_completes_id_and_timestamp() {
        let dir = tempdir().unwrap();
        let recorder = EvidenceRecorder::new(dir.path());
        let rec = EvidenceRecord::new("task_execution", Execution::Real);
        let completed = recorder.record(rec).await.unwrap();
        assert!(!completed.evidence_id.is_nil());
        assert!(completed.timestamp > DateTime::<Utc>::UNIX_EPOCH);
    }

    #[tokio::test]
    async fn record_rejects_empty_operation() {
        let dir = tempdir().unwrap();
        let recorder = EvidenceRecorder::new(dir.path());
        let rec = EvidenceRecord::new("", Execution::Real);
        assert!(recorder.record(rec).await.is_err());
    }

    #[tokio::test]
    async fn records_filters_by_task_id() {
        let dir = tempdir().unwrap();
        let recorder = EvidenceRecorder::new(dir.path());
        recorder
            .record(EvidenceRecord::new("task_execution", Execution::Real).with_task_id("a"))
            .await
            .unwrap();
        recorder
            .record(EvidenceRecord::new("task_execution", Execution::Real).with_task_id("b"))
            .await
            .unwrap();

        let recs = recorder.records("a").await;
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].task_id.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn audit_log_lines_are_one_parseable_json_document_each() {
        let dir = tempdir().unwrap();
        let recorder = EvidenceRecorder::new(dir.path());

        for i in 0..5 {
            let rec = recorder
                .record(
                    EvidenceRecord::new("task_execution", Execution::Real)
                        .with_task_id(format!("task-{i}")),
                )
                .await
                .unwrap();
            recorder.write_to_audit_log(&rec).await.unwrap();
        }

        let today = Utc::now().format("%Y-%m-%d");
        let path = dir.path().join(format!("{today}-audit.log"));
        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 5);
        for line in lines {
            let _: EvidenceRecord = serde_json::from_str(line).unwrap();
        }
    }

    #[tokio::test]
    async fn prune_removes_logs_older_than_retention() {
        let dir = tempdir().unwrap();
        let recorder = EvidenceRecorder::with_retention(dir.path(), 30);
        tokio::fs::create_dir_all(dir.path()).await.unwrap();

        let old_date = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();
        let old_path = dir
            .path()
            .join(format!("{}-audit.log", old_date.format("%Y-%m-%d")));
        tokio::fs::write(&old_path, "{}\n").await.unwrap();

        let removed = recorder.prune_older_than(30).await.unwrap();
        assert_eq!(removed, 1);
        assert!(!old_path.exists());
    }

    #[tokio::test]
    async fn prune_keeps_recent_logs() {
        let dir = tempdir().unwrap();
        let recorder = EvidenceRecorder::with_retention(dir.path(), 30);
        tokio::fs::create_dir_all(dir.path()).await.unwrap();

        let today = Utc::now().format("%Y-%m-%d");
        let recent_path = dir.path().join(format!("{today}-audit.log"));
        tokio::fs::write(&recent_path, "{}\n").await.unwrap();

        let removed = recorder.prune_older_than(30).await.unwrap();
        assert_eq!(removed, 0);
        assert!(recent_path.exists());
    }
}
