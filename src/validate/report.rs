//! Append-only validation report
//!
//! One row per (file, executed check). The report lives next to a run's
//! artifacts as CSV with the columns
//! `SLNO,DATE,FILENAME,STATUS,STATUS_REASON,REMARK`.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub const REPORT_HEADER: &str = "SLNO,DATE,FILENAME,STATUS,STATUS_REASON,REMARK";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationStatus {
    Passed,
    Failed,
}

impl std::fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationStatus::Passed => write!(f, "Passed"),
            ValidationStatus::Failed => write!(f, "Failed"),
        }
    }
}

/// One audit row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationRecord {
    pub serial: usize,
    pub date: String,
    pub file_name: String,
    pub status: ValidationStatus,
    pub stage_reason: String,
    pub remark: String,
}

/// Append-only writer over the report file. Rows are flushed as they are
/// appended so a batch abort still leaves the audit trail of everything
/// that ran before it.
#[derive(Debug)]
pub struct ValidationReport {
    path: PathBuf,
    next_serial: usize,
    records: Vec<ValidationRecord>,
}

impl ValidationReport {
    /// Open (or create) the report at `path`. Serial numbering continues
    /// from any rows already present.
    pub fn open(path: &Path) -> Result<Self> {
        let existing = if path.exists() {
            fs::read_to_string(path)?
                .lines()
                .skip(1)
                .filter(|l| !l.is_empty())
                .count()
        } else {
            if let Some(dir) = path.parent() {
                fs::create_dir_all(dir)?;
            }
            fs::write(path, format!("{REPORT_HEADER}\n"))?;
            0
        };
        Ok(Self {
            path: path.to_path_buf(),
            next_serial: existing + 1,
            records: Vec::new(),
        })
    }

    /// Append one row for an executed check.
    pub fn append(
        &mut self,
        file_name: &str,
        status: ValidationStatus,
        stage_reason: &str,
        remark: &str,
    ) -> Result<()> {
        let record = ValidationRecord {
            serial: self.next_serial,
            date: Utc::now().format("%Y-%m-%d").to_string(),
            file_name: file_name.to_string(),
            status,
            stage_reason: stage_reason.to_string(),
            remark: remark.to_string(),
        };
        self.next_serial += 1;
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        writeln!(
            file,
            "{},{},{},{},{},{}",
            record.serial,
            record.date,
            escape(&record.file_name),
            record.status,
            escape(&record.stage_reason),
            escape(&record.remark)
        )?;
        self.records.push(record);
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows appended through this handle.
    pub fn records(&self) -> &[ValidationRecord] {
        &self.records
    }
}

fn escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
