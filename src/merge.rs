//! Merging accepted raw files into one canonical dataset
//!
//! Post-validation, every good-partition file shares the schema's column
//! set, so concatenation is a plain row-wise append. Legacy column names
//! are normalized (`Wafer` → `id`, `Good/Bad` → `output`) and the legacy
//! label encoding `{1, -1}` is remapped onto `{1, 0}` when present.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::frame::{DataFrame, RawTable};

pub struct RawDataMerger<'a> {
    config: &'a PipelineConfig,
}

impl<'a> RawDataMerger<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    /// Concatenate every CSV in `good_dir` into one frame, normalize
    /// column names and label encoding, and write it to `out_path`.
    ///
    /// Guarantee: output row count equals the sum of input row counts.
    pub fn run(&self, good_dir: &Path, out_path: &Path) -> Result<DataFrame> {
        let mut files: Vec<PathBuf> = fs::read_dir(good_dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "csv"))
            .collect();
        if files.is_empty() {
            return Err(Error::BatchFatal(format!(
                "good partition {} is empty, nothing to merge",
                good_dir.display()
            )));
        }
        files.sort();

        let mut frames = Vec::with_capacity(files.len());
        let mut total_rows = 0;
        for path in &files {
            let frame = RawTable::read(path)?.into_frame(Some(self.config.raw_id_column.as_str()))?;
            total_rows += frame.n_rows();
            frames.push(frame);
        }
        let mut merged = DataFrame::concat(&frames)?;
        debug_assert_eq!(merged.n_rows(), total_rows);

        merged.rename_column(&self.config.raw_id_column, &self.config.id_column);
        merged.rename_column(&self.config.raw_label_column, &self.config.label_column);
        self.remap_label_encoding(&mut merged);

        merged.write_csv(out_path)?;
        info!(
            files = files.len(),
            rows = merged.n_rows(),
            out = %out_path.display(),
            "merged accepted raw files"
        );
        Ok(merged)
    }

    /// Legacy encoding marks good wafers `-1`; the canonical label is
    /// `{0, 1}` with 1 = faulty. Applied only when a label column exists
    /// (prediction batches carry none).
    fn remap_label_encoding(&self, frame: &mut DataFrame) {
        let Some(col) = frame.column_index(&self.config.label_column) else {
            return;
        };
        let mut remapped = 0usize;
        for v in frame.data_mut().column_mut(col) {
            if *v == -1.0 {
                *v = 0.0;
                remapped += 1;
            }
        }
        if remapped > 0 {
            info!(rows = remapped, "remapped legacy label encoding -1 -> 0");
        }
    }
}
