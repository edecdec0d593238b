//! The four per-file schema checks
//!
//! Checks run in a fixed order and the partitioner short-circuits on the
//! first failure. The column-identity check is the exception internally:
//! it collects every mismatched (name, type) pair before deciding.

use regex::Regex;

use super::report::ValidationStatus;
use super::schema::SchemaSpec;
use crate::frame::RawTable;

pub const STAGE_FILE_NAME: &str = "FILE NAME VALIDATION";
pub const STAGE_COLUMN_COUNT: &str = "NUMBER OF COLUMNS VALIDATION";
pub const STAGE_COLUMN_MISSING: &str = "COLUMN DATA MISSING VALIDATION";
pub const STAGE_COLUMN_DATA: &str = "COLUMN DATA VALIDATION";

/// Raw-file name grammar: `wafer_<DDMMYYYY>_<HHMMSS>.csv`.
const NAME_PATTERN: &str =
    r"^wafer_(0[1-9]|[12][0-9]|3[01])(0[1-9]|1[0-2])\d{4}_(0[0-9]|1[0-9]|2[0-3])([0-5][0-9]){2}\.csv$";

/// Outcome of one check: status plus the remark logged to the report.
#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub status: ValidationStatus,
    pub remark: String,
}

impl CheckOutcome {
    fn passed(remark: impl Into<String>) -> Self {
        Self {
            status: ValidationStatus::Passed,
            remark: remark.into(),
        }
    }

    fn failed(remark: impl Into<String>) -> Self {
        Self {
            status: ValidationStatus::Failed,
            remark: remark.into(),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == ValidationStatus::Failed
    }
}

/// Validates one raw file against a declared schema.
#[derive(Debug)]
pub struct SchemaValidator {
    schema: SchemaSpec,
    name_rule: Regex,
}

impl SchemaValidator {
    pub fn new(schema: SchemaSpec) -> Self {
        let name_rule = Regex::new(NAME_PATTERN).expect("name grammar is a valid regex");
        Self { schema, name_rule }
    }

    pub fn schema(&self) -> &SchemaSpec {
        &self.schema
    }

    /// Check 1: file name grammar.
    pub fn check_name(&self, file_name: &str) -> CheckOutcome {
        if self.name_rule.is_match(file_name) {
            CheckOutcome::passed("FILE NAME VALIDATION COMPLETED")
        } else {
            CheckOutcome::failed("FILE NAME VALIDATION FAILED")
        }
    }

    /// Check 2: parsed column count must equal the declared count exactly.
    /// The failure remark carries the signed difference (file minus schema).
    pub fn check_column_count(&self, table: &RawTable) -> CheckOutcome {
        let diff = table.n_cols() as i64 - self.schema.column_count as i64;
        if diff == 0 {
            CheckOutcome::passed("NUMBER OF COLUMNS VALIDATION COMPLETED")
        } else {
            CheckOutcome::failed(format!("COLUMN COUNT DIFFERENCE FROM SCHEMA: {diff:+}"))
        }
    }

    /// Check 3: any column whose non-null count is zero fails the file.
    pub fn check_all_null_columns(&self, table: &RawTable) -> CheckOutcome {
        let offenders: Vec<&str> = (0..table.n_cols())
            .filter(|&c| table.non_empty_count(c) == 0)
            .map(|c| table.header()[c].as_str())
            .collect();
        if offenders.is_empty() {
            CheckOutcome::passed("COLUMN DATA MISSING VALIDATION COMPLETED")
        } else {
            CheckOutcome::failed(format!("COLUMNS WITH NO DATA: {}", offenders.join("; ")))
        }
    }

    /// Check 4: positional column names and inferred types against the
    /// declaration. Collects every mismatch before deciding.
    pub fn check_column_identity(&self, table: &RawTable) -> CheckOutcome {
        let mut mismatches = Vec::new();
        for (pos, (declared_name, declared_type)) in self.schema.columns.iter().enumerate() {
            let Some(actual_name) = table.header().get(pos) else {
                mismatches.push(format!("position {pos}: schema {declared_name:?} vs nothing"));
                continue;
            };
            if actual_name != declared_name {
                mismatches.push(format!(
                    "position {pos}: schema {declared_name:?} vs file {actual_name:?}"
                ));
                continue;
            }
            let kind = table.infer_kind(pos);
            if !declared_type.matches(kind) {
                mismatches.push(format!(
                    "column {declared_name:?}: schema {declared_type} vs file {kind:?}"
                ));
            }
        }
        if mismatches.is_empty() {
            CheckOutcome::passed("COLUMN DATA VALIDATION COMPLETED")
        } else {
            CheckOutcome::failed(format!("MISMATCHED COLUMNS: {}", mismatches.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::schema::ColumnType;
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    fn validator() -> SchemaValidator {
        SchemaValidator::new(SchemaSpec {
            column_count: 3,
            columns: vec![
                ("Wafer".into(), ColumnType::Text),
                ("Sensor-1".into(), ColumnType::Float),
                ("Sensor-2".into(), ColumnType::Float),
            ],
        })
    }

    fn table(dir: &Path, body: &str) -> RawTable {
        let p = dir.join("t.csv");
        fs::write(&p, body).unwrap();
        RawTable::read(&p).unwrap()
    }

    #[test]
    fn name_grammar() {
        let v = validator();
        assert!(!v.check_name("wafer_15062023_143210.csv").is_failed());
        assert!(v.check_name("bad_name.csv").is_failed());
        assert!(v.check_name("wafer_32132023_143210.csv").is_failed()); // day 32
        assert!(v.check_name("wafer_15062023_253210.csv").is_failed()); // hour 25
        assert!(v.check_name("wafer_15062023_143210.txt").is_failed());
    }

    #[test]
    fn column_count_signed_difference() {
        let dir = tempdir().unwrap();
        let v = validator();
        let short = table(dir.path(), "Wafer,Sensor-1\nw1,1.5\n");
        let outcome = v.check_column_count(&short);
        assert!(outcome.is_failed());
        assert!(outcome.remark.contains("-1"), "remark: {}", outcome.remark);

        let exact = table(dir.path(), "Wafer,Sensor-1,Sensor-2\nw1,1.5,2.5\n");
        assert!(!v.check_column_count(&exact).is_failed());
    }

    #[test]
    fn all_null_column_detected() {
        let dir = tempdir().unwrap();
        let v = validator();
        let t = table(dir.path(), "Wafer,Sensor-1,Sensor-2\nw1,,1.5\nw2,,2.5\n");
        let outcome = v.check_all_null_columns(&t);
        assert!(outcome.is_failed());
        assert!(outcome.remark.contains("Sensor-1"));
    }

    #[test]
    fn identity_collects_all_mismatches() {
        let dir = tempdir().unwrap();
        let v = validator();
        // wrong name at position 1, wrong type at position 2
        let t = table(dir.path(), "Wafer,SensorX,Sensor-2\nw1,1.5,hello\n");
        let outcome = v.check_column_identity(&t);
        assert!(outcome.is_failed());
        assert!(outcome.remark.contains("SensorX"));
        assert!(outcome.remark.contains("Sensor-2"));
    }

    #[test]
    fn identity_accepts_matching_file() {
        let dir = tempdir().unwrap();
        let v = validator();
        let t = table(dir.path(), "Wafer,Sensor-1,Sensor-2\nw1,1.5,\nw2,2.0,3.5\n");
        assert!(!v.check_column_identity(&t).is_failed());
    }
}
