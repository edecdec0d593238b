//! Raw-batch partitioning
//!
//! Runs the schema checks over every file in an inbox and moves each file
//! to exactly one of the good/bad partitions. Each executed check appends
//! one report row. An unreadable file aborts the whole batch: a corrupt
//! input invalidates the batch count later stages rely on.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::{debug, info, warn};

use super::checks::{
    SchemaValidator, STAGE_COLUMN_COUNT, STAGE_COLUMN_DATA, STAGE_COLUMN_MISSING, STAGE_FILE_NAME,
};
use super::report::ValidationReport;
use crate::error::{Error, Result};
use crate::frame::RawTable;
use crate::run::{RunContext, RunPurpose};

/// What happened to a batch.
#[derive(Debug)]
pub struct PartitionSummary {
    pub accepted: Vec<PathBuf>,
    pub rejected: Vec<PathBuf>,
    pub report_path: PathBuf,
    /// Written for prediction runs only.
    pub bad_archive_path: Option<PathBuf>,
    pub bad_names_path: Option<PathBuf>,
}

/// Partitions one inbox of raw files under a run context.
pub struct RawDataPartitioner {
    validator: SchemaValidator,
}

impl RawDataPartitioner {
    pub fn new(validator: SchemaValidator) -> Self {
        Self { validator }
    }

    /// Validate every `*.csv` in `inbox` and disposition it. Files are
    /// processed in name order so report rows are deterministic.
    pub fn run(&self, ctx: &RunContext, inbox: &Path) -> Result<PartitionSummary> {
        let good_dir = ctx.good_partition_dir();
        let bad_dir = ctx.bad_partition_dir();
        fs::create_dir_all(&good_dir)?;
        fs::create_dir_all(&bad_dir)?;
        let mut report = ValidationReport::open(&ctx.validation_report_path())?;

        let mut files: Vec<PathBuf> = fs::read_dir(inbox)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "csv"))
            .collect();
        if files.is_empty() {
            return Err(Error::EmptyInbox(inbox.to_path_buf()));
        }
        files.sort();
        info!(run = ctx.run_id(), files = files.len(), "raw data validation started");

        let mut accepted = Vec::new();
        let mut rejected = Vec::new();
        for path in files {
            let file_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string();

            // Parse errors are batch-fatal, not per-file failures.
            let table = RawTable::read(&path)?;

            if self.validate_file(&file_name, &table, &mut report)? {
                debug!(file = %file_name, "accepted");
                dispose(&path, &good_dir)?;
                accepted.push(good_dir.join(&file_name));
            } else {
                warn!(file = %file_name, "rejected");
                dispose(&path, &bad_dir)?;
                rejected.push(bad_dir.join(&file_name));
            }
        }
        info!(
            run = ctx.run_id(),
            accepted = accepted.len(),
            rejected = rejected.len(),
            "raw data validation finished"
        );

        // Prediction runs archive the rejects for the caller; training
        // batches come from pre-validated sources and skip this.
        let (bad_archive_path, bad_names_path) = if ctx.purpose() == RunPurpose::Prediction {
            let archive = ctx.artifact_dir().join("bad_raw_data.tar.gz");
            archive_dir(&bad_dir, &archive)?;
            let names: Vec<String> = rejected
                .iter()
                .filter_map(|p| p.file_name().and_then(|n| n.to_str()))
                .map(String::from)
                .collect();
            let names_path = ctx.artifact_dir().join("bad_file_names.json");
            fs::write(&names_path, serde_json::to_string_pretty(&names)?)?;
            (Some(archive), Some(names_path))
        } else {
            (None, None)
        };

        Ok(PartitionSummary {
            accepted,
            rejected,
            report_path: report.path().to_path_buf(),
            bad_archive_path,
            bad_names_path,
        })
    }

    /// Run the checks in order, short-circuiting on the first failure.
    /// Returns true when the file passed all four.
    fn validate_file(
        &self,
        file_name: &str,
        table: &RawTable,
        report: &mut ValidationReport,
    ) -> Result<bool> {
        let checks: [(&str, super::checks::CheckOutcome); 4] = [
            (STAGE_FILE_NAME, self.validator.check_name(file_name)),
            (STAGE_COLUMN_COUNT, self.validator.check_column_count(table)),
            (STAGE_COLUMN_MISSING, self.validator.check_all_null_columns(table)),
            (STAGE_COLUMN_DATA, self.validator.check_column_identity(table)),
        ];
        for (stage, outcome) in checks {
            report.append(file_name, outcome.status, stage, &outcome.remark)?;
            if outcome.is_failed() {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Copy to the partition, then remove from the inbox (terminal disposition).
fn dispose(src: &Path, partition: &Path) -> Result<()> {
    let dest = partition.join(src.file_name().unwrap_or_default());
    fs::copy(src, &dest)?;
    fs::remove_file(src)?;
    Ok(())
}

/// Write a gzip-compressed ustar archive of every regular file in `dir`.
fn archive_dir(dir: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = fs::File::create(dest)?;
    let mut gz = GzEncoder::new(file, Compression::default());
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .collect();
    entries.sort();
    for path in entries {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let data = fs::read(&path)?;
        gz.write_all(&tar_header(name, data.len()))?;
        gz.write_all(&data)?;
        let pad = (512 - data.len() % 512) % 512;
        gz.write_all(&vec![0u8; pad])?;
    }
    gz.write_all(&[0u8; 1024])?; // end-of-archive marker
    gz.finish()?;
    Ok(())
}

/// Minimal ustar header; enough for flat regular files.
fn tar_header(name: &str, size: usize) -> [u8; 512] {
    let mut h = [0u8; 512];
    let name = name.as_bytes();
    h[..name.len().min(100)].copy_from_slice(&name[..name.len().min(100)]);
    h[100..107].copy_from_slice(b"0000644"); // mode
    h[108..115].copy_from_slice(b"0000000"); // uid
    h[116..123].copy_from_slice(b"0000000"); // gid
    let size_oct = format!("{size:011o}");
    h[124..135].copy_from_slice(size_oct.as_bytes());
    h[136..147].copy_from_slice(b"00000000000"); // mtime
    h[156] = b'0'; // regular file
    h[257..262].copy_from_slice(b"ustar");
    h[263..265].copy_from_slice(b"00");
    // checksum computed with the field itself blanked to spaces
    h[148..156].copy_from_slice(b"        ");
    let sum: u32 = h.iter().map(|&b| u32::from(b)).sum();
    let sum_oct = format!("{sum:06o}\0 ");
    h[148..156].copy_from_slice(sum_oct.as_bytes());
    h
}
