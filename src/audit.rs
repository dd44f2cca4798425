//! Append-only usage audit log.
//!
//! One record per call attempt that reached the provider boundary. Records
//! are persisted as JSONL and mirrored in a bounded in-memory ring for the
//! reporting endpoint; once written they are never mutated.

use crate::credits::Credits;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

const MAX_AUDIT_ENTRIES: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: String,
    pub caller_id: String,
    pub provider: String,
    pub model_id: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: Credits,
    pub status: CallStatus,
    pub timestamp: DateTime<Utc>,
}

impl UsageRecord {
    pub fn new(
        caller_id: impl Into<String>,
        provider: impl Into<String>,
        model_id: impl Into<String>,
        input_tokens: u64,
        output_tokens: u64,
        cost: Credits,
        status: CallStatus,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            caller_id: caller_id.into(),
            provider: provider.into(),
            model_id: model_id.into(),
            input_tokens,
            output_tokens,
            cost,
            status,
            timestamp: Utc::now(),
        }
    }
}

/// Aggregate of a set of records, for the reporting endpoint.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UsageTotals {
    pub calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: Credits,
}

/// JSONL-backed audit log with a bounded in-memory tail.
pub struct AuditLog {
    records: VecDeque<UsageRecord>,
    writer: Option<BufWriter<File>>,
}

impl AuditLog {
    pub fn new(file_path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file_path = file_path.as_ref().to_path_buf();

        if let Some(parent) = file_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut records = VecDeque::with_capacity(MAX_AUDIT_ENTRIES);

        if file_path.exists() {
            let file = File::open(&file_path)?;
            let reader = BufReader::new(file);
            for line in reader.lines().map_while(|l| l.ok()) {
                if let Ok(record) = serde_json::from_str::<UsageRecord>(&line) {
                    if records.len() >= MAX_AUDIT_ENTRIES {
                        records.pop_front();
                    }
                    records.push_back(record);
                }
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file_path)?;
        let writer = BufWriter::new(file);

        Ok(Self {
            records,
            writer: Some(writer),
        })
    }

    pub fn append(&mut self, record: UsageRecord) {
        if let Some(ref mut writer) = self.writer {
            if let Ok(json) = serde_json::to_string(&record) {
                let _ = writeln!(writer, "{}", json);
                let _ = writer.flush();
            }
        }
        if self.records.len() >= MAX_AUDIT_ENTRIES {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// Most recent records for a caller, newest first.
    pub fn recent_for(&self, caller_id: &str, limit: usize) -> Vec<UsageRecord> {
        self.records
            .iter()
            .rev()
            .filter(|r| r.caller_id == caller_id)
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn totals_for(&self, caller_id: &str) -> UsageTotals {
        let mut totals = UsageTotals::default();
        for record in self.records.iter().filter(|r| r.caller_id == caller_id) {
            totals.calls += 1;
            totals.input_tokens += record.input_tokens;
            totals.output_tokens += record.output_tokens;
            totals.cost += record.cost;
        }
        totals
    }
}

#[derive(Clone)]
pub struct SharedAuditLog(Arc<Mutex<AuditLog>>);

impl SharedAuditLog {
    pub fn new(file_path: impl AsRef<Path>) -> std::io::Result<Self> {
        Ok(Self(Arc::new(Mutex::new(AuditLog::new(file_path)?))))
    }

    pub fn append(&self, record: UsageRecord) {
        if let Ok(mut log) = self.0.lock() {
            log.append(record);
        }
    }

    pub fn recent_for(&self, caller_id: &str, limit: usize) -> Vec<UsageRecord> {
        self.0
            .lock()
            .map(|l| l.recent_for(caller_id, limit))
            .unwrap_or_default()
    }

    pub fn totals_for(&self, caller_id: &str) -> UsageTotals {
        self.0
            .lock()
            .map(|l| l.totals_for(caller_id))
            .unwrap_or_default()
    }
}
