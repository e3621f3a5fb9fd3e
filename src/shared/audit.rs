use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    /// Confirmation was refused or the guard blocked the operation.
    Aborted,
    Succeeded,
    Failed,
}

/// One JSON line in the audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub timestamp: DateTime<Utc>,
    pub user: String,
    pub operation: String,
    pub environment: String,
    pub directory: String,
    pub subscription_id: Option<String>,
    pub dry_run: bool,
    pub outcome: AuditOutcome,
    pub error: Option<String>,
}

impl AuditLogEntry {
    pub fn new(operation: &str, environment: &str, directory: &Path, outcome: AuditOutcome) -> Self {
        Self {
            timestamp: Utc::now(),
            user: env::var("USER")
                .or_else(|_| env::var("USERNAME"))
                .unwrap_or_else(|_| "unknown".to_string()),
            operation: operation.to_string(),
            environment: environment.to_string(),
            directory: directory.display().to_string(),
            subscription_id: None,
            dry_run: false,
            outcome,
            error: None,
        }
    }
}

/// Append-only JSON lines file. Without a path, entries are dropped.
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: Option<PathBuf>,
}

impl AuditLog {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn append(&self, entry: &AuditLogEntry) -> Result<()> {
        let Some(log_file) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = log_file.parent() {
            fs::create_dir_all(parent)?;
        }
        let line = serde_json::to_string(entry)?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)?;
        file.write_all(format!("{}\n", line).as_bytes())?;
        Ok(())
    }

    /// Append, downgrading failures to a warning so the audit trail never
    /// masks the result of the operation itself.
    pub fn record(&self, entry: &AuditLogEntry) {
        if let Err(e) = self.append(entry) {
            tracing::warn!(error = %e, "failed to write audit log entry");
        }
    }

    pub fn read_entries(&self) -> Result<Vec<AuditLogEntry>> {
        let Some(log_file) = &self.path else {
            return Ok(Vec::new());
        };
        if !log_file.exists() {
            return Ok(Vec::new());
        }
        fs::read_to_string(log_file)?
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(anyhow::Error::from))
            .collect()
    }
}
