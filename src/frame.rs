//! Tabular data handling
//!
//! Two layers: `RawTable` is the untyped view of a raw CSV used by schema
//! validation (cells are still strings, so per-column type inference can
//! run against the declared schema), and `DataFrame` is the numeric matrix
//! the modeling stages operate on (`f64` cells, NaN = missing), with an
//! optional text identifier column carried alongside.

use std::fmt::Write as FmtWrite;
use std::fs;
use std::path::Path;

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Inferred kind of a raw column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnKind {
    /// Every cell is an integer token and none is empty.
    Integer,
    /// Every cell is numeric or empty (pandas promotes int + NaN to float).
    Float,
    /// At least one cell is non-numeric text.
    Text,
}

/// An unparsed CSV: header plus string cells, rectangular.
#[derive(Debug, Clone)]
pub struct RawTable {
    header: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl RawTable {
    /// Read a CSV file without interpreting cell contents.
    ///
    /// A ragged row (cell count differing from the header) is a parse
    /// error: the file is unreadable for batch purposes.
    pub fn read(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| Error::UnreadableFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let mut lines = text.lines();
        let header = match lines.next() {
            Some(h) => split_line(h),
            None => {
                return Err(Error::UnreadableFile {
                    path: path.to_path_buf(),
                    reason: "empty file".into(),
                })
            }
        };
        let mut rows = Vec::new();
        for (lineno, line) in lines.enumerate() {
            if line.is_empty() {
                continue;
            }
            let cells = split_line(line);
            if cells.len() != header.len() {
                return Err(Error::UnreadableFile {
                    path: path.to_path_buf(),
                    reason: format!(
                        "row {} has {} cells, header has {}",
                        lineno + 2,
                        cells.len(),
                        header.len()
                    ),
                });
            }
            rows.push(cells);
        }
        Ok(Self { header, rows })
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn n_cols(&self) -> usize {
        self.header.len()
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    /// Count of non-empty cells in a column.
    pub fn non_empty_count(&self, col: usize) -> usize {
        self.rows.iter().filter(|r| !is_missing(&r[col])).count()
    }

    /// Infer the kind of a column from its cells.
    ///
    /// Mirrors pandas dtype promotion: all-integer with no gaps is
    /// integer; numeric with gaps or decimal points is float; anything
    /// else is text. An entirely empty column reads as float (all-NaN).
    pub fn infer_kind(&self, col: usize) -> ColumnKind {
        let mut all_integer = true;
        let mut any_missing = false;
        for row in &self.rows {
            let cell = row[col].trim();
            if is_missing(cell) {
                any_missing = true;
                continue;
            }
            if cell.parse::<i64>().is_ok() {
                continue;
            }
            if cell.parse::<f64>().is_ok() {
                all_integer = false;
            } else {
                return ColumnKind::Text;
            }
        }
        if all_integer && !any_missing && self.n_rows() > 0 {
            ColumnKind::Integer
        } else {
            ColumnKind::Float
        }
    }

    /// Convert to a numeric frame, pulling `id_col` (if present) out as
    /// the text identifier column.
    pub fn into_frame(self, id_col: Option<&str>) -> Result<DataFrame> {
        let id_idx = id_col.and_then(|name| self.header.iter().position(|h| h == name));
        let mut columns = Vec::new();
        for (i, name) in self.header.iter().enumerate() {
            if Some(i) != id_idx {
                columns.push(name.clone());
            }
        }
        let n_rows = self.rows.len();
        let n_cols = columns.len();
        let mut data = Array2::from_elem((n_rows, n_cols), f64::NAN);
        let mut ids = id_idx.map(|_| Vec::with_capacity(n_rows));
        for (r, row) in self.rows.iter().enumerate() {
            let mut c = 0;
            for (i, cell) in row.iter().enumerate() {
                if Some(i) == id_idx {
                    if let Some(ids) = ids.as_mut() {
                        ids.push(cell.trim().to_string());
                    }
                    continue;
                }
                let cell = cell.trim();
                if !is_missing(cell) {
                    data[[r, c]] = cell.parse::<f64>().map_err(|_| {
                        Error::Schema(format!(
                            "non-numeric cell {cell:?} in column {}",
                            self.header[i]
                        ))
                    })?;
                }
                c += 1;
            }
        }
        Ok(DataFrame {
            columns,
            data,
            id_name: id_idx.map(|i| self.header[i].clone()),
            ids,
        })
    }
}

fn split_line(line: &str) -> Vec<String> {
    line.split(',').map(|c| c.trim().to_string()).collect()
}

fn is_missing(cell: &str) -> bool {
    cell.is_empty() || cell.eq_ignore_ascii_case("null") || cell.eq_ignore_ascii_case("nan")
}

/// A numeric table: named columns over an `f64` matrix, NaN for missing
/// values, plus an optional text identifier column kept row-aligned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataFrame {
    columns: Vec<String>,
    data: Array2<f64>,
    id_name: Option<String>,
    ids: Option<Vec<String>>,
}

impl DataFrame {
    pub fn new(columns: Vec<String>, data: Array2<f64>) -> Self {
        debug_assert_eq!(columns.len(), data.ncols());
        Self {
            columns,
            data,
            id_name: None,
            ids: None,
        }
    }

    /// Attach a row-aligned identifier column.
    pub fn with_ids(mut self, name: impl Into<String>, ids: Vec<String>) -> Self {
        debug_assert_eq!(ids.len(), self.data.nrows());
        self.id_name = Some(name.into());
        self.ids = Some(ids);
        self
    }

    /// Read a CSV written by [`DataFrame::write_csv`] (or a merged batch
    /// file), treating `id_col` as the text identifier if present.
    pub fn read_csv(path: &Path, id_col: Option<&str>) -> Result<Self> {
        RawTable::read(path)?.into_frame(id_col)
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let mut out = String::new();
        if let Some(name) = &self.id_name {
            write!(out, "{name},").ok();
        }
        out.push_str(&self.columns.join(","));
        out.push('\n');
        for r in 0..self.n_rows() {
            if let Some(ids) = &self.ids {
                write!(out, "{},", ids[r]).ok();
            }
            for c in 0..self.n_cols() {
                if c > 0 {
                    out.push(',');
                }
                let v = self.data[[r, c]];
                if !v.is_nan() {
                    write!(out, "{v}").ok();
                }
            }
            out.push('\n');
        }
        fs::write(path, out)?;
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn data(&self) -> &Array2<f64> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Array2<f64> {
        &mut self.data
    }

    pub fn n_rows(&self) -> usize {
        self.data.nrows()
    }

    pub fn n_cols(&self) -> usize {
        self.data.ncols()
    }

    pub fn id_name(&self) -> Option<&str> {
        self.id_name.as_deref()
    }

    pub fn ids(&self) -> Option<&[String]> {
        self.ids.as_deref()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn column(&self, name: &str) -> Option<Array1<f64>> {
        self.column_index(name)
            .map(|i| self.data.column(i).to_owned())
    }

    pub fn rename_column(&mut self, from: &str, to: &str) {
        if let Some(i) = self.column_index(from) {
            self.columns[i] = to.to_string();
        }
        if self.id_name.as_deref() == Some(from) {
            self.id_name = Some(to.to_string());
        }
    }

    /// Drop columns by name; names not present are ignored.
    pub fn drop_columns(&mut self, names: &[String]) {
        let keep: Vec<usize> = (0..self.n_cols())
            .filter(|&i| !names.contains(&self.columns[i]))
            .collect();
        if keep.len() == self.n_cols() {
            return;
        }
        self.data = self.data.select(Axis(1), &keep);
        self.columns = keep.iter().map(|&i| self.columns[i].clone()).collect();
    }

    /// Keep only the rows at `indices` (in order).
    pub fn select_rows(&self, indices: &[usize]) -> Self {
        let data = self.data.select(Axis(0), indices);
        let ids = self
            .ids
            .as_ref()
            .map(|ids| indices.iter().map(|&i| ids[i].clone()).collect());
        Self {
            columns: self.columns.clone(),
            data,
            id_name: self.id_name.clone(),
            ids,
        }
    }

    /// Remove a column by name, returning its values.
    pub fn take_column(&mut self, name: &str) -> Option<Array1<f64>> {
        let idx = self.column_index(name)?;
        let values = self.data.column(idx).to_owned();
        let keep: Vec<usize> = (0..self.n_cols()).filter(|&i| i != idx).collect();
        self.data = self.data.select(Axis(1), &keep);
        self.columns.remove(idx);
        Some(values)
    }

    /// Reorder/select columns by name; missing names are an error.
    pub fn select_columns(&self, names: &[String]) -> Result<Self> {
        let indices: Vec<usize> = names
            .iter()
            .map(|n| {
                self.column_index(n)
                    .ok_or_else(|| Error::Schema(format!("missing column {n:?}")))
            })
            .collect::<Result<_>>()?;
        Ok(Self {
            columns: names.to_vec(),
            data: self.data.select(Axis(1), &indices),
            id_name: self.id_name.clone(),
            ids: self.ids.clone(),
        })
    }

    /// Append a numeric column.
    pub fn push_column(&mut self, name: impl Into<String>, values: Array1<f64>) {
        debug_assert_eq!(values.len(), self.n_rows());
        self.columns.push(name.into());
        let mut data = Array2::zeros((self.n_rows(), self.n_cols() + 1));
        data.slice_mut(ndarray::s![.., ..self.n_cols()])
            .assign(&self.data);
        data.column_mut(self.n_cols()).assign(&values);
        self.data = data;
    }

    /// Row-wise concatenation. Every frame must share this frame's column
    /// set; post-validation batches always do.
    pub fn concat(frames: &[DataFrame]) -> Result<DataFrame> {
        let first = frames.first().ok_or_else(|| {
            Error::BatchFatal("cannot merge an empty set of accepted files".into())
        })?;
        let mut data = first.data.clone();
        let mut ids = first.ids.clone();
        for frame in &frames[1..] {
            if frame.columns != first.columns {
                return Err(Error::Schema(format!(
                    "column set mismatch while merging: {:?} vs {:?}",
                    frame.columns, first.columns
                )));
            }
            data.append(Axis(0), frame.data.view())
                .map_err(|e| Error::Schema(e.to_string()))?;
            if let (Some(acc), Some(more)) = (ids.as_mut(), frame.ids.as_ref()) {
                acc.extend(more.iter().cloned());
            }
        }
        Ok(DataFrame {
            columns: first.columns.clone(),
            data,
            id_name: first.id_name.clone(),
            ids,
        })
    }

    /// Drop exactly-equal duplicate rows (NaN compares equal to NaN here),
    /// keeping first occurrences. Returns the number of rows removed.
    pub fn dedup_rows(&mut self) -> usize {
        let mut seen: std::collections::HashSet<Vec<u64>> = std::collections::HashSet::new();
        let mut keep = Vec::with_capacity(self.n_rows());
        for r in 0..self.n_rows() {
            let key: Vec<u64> = self.data.row(r).iter().map(|v| v.to_bits()).collect();
            if seen.insert(key) {
                keep.push(r);
            }
        }
        let removed = self.n_rows() - keep.len();
        if removed > 0 {
            *self = self.select_rows(&keep);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use tempfile::tempdir;

    fn write(dir: &Path, name: &str, body: &str) -> std::path::PathBuf {
        let p = dir.join(name);
        fs::write(&p, body).unwrap();
        p
    }

    #[test]
    fn raw_table_reads_header_and_rows() {
        let dir = tempdir().unwrap();
        let p = write(dir.path(), "a.csv", "x,y\n1,2.5\n3,\n");
        let t = RawTable::read(&p).unwrap();
        assert_eq!(t.n_cols(), 2);
        assert_eq!(t.n_rows(), 2);
        assert_eq!(t.non_empty_count(1), 1);
    }

    #[test]
    fn ragged_row_is_unreadable() {
        let dir = tempdir().unwrap();
        let p = write(dir.path(), "a.csv", "x,y\n1,2,3\n");
        assert!(matches!(
            RawTable::read(&p),
            Err(Error::UnreadableFile { .. })
        ));
    }

    #[test]
    fn kind_inference_matches_pandas_promotion() {
        let dir = tempdir().unwrap();
        let p = write(dir.path(), "a.csv", "i,f,g,t\n1,1.5,1,w1\n2,2.0,,w2\n");
        let t = RawTable::read(&p).unwrap();
        assert_eq!(t.infer_kind(0), ColumnKind::Integer);
        assert_eq!(t.infer_kind(1), ColumnKind::Float);
        // integer tokens with a gap promote to float
        assert_eq!(t.infer_kind(2), ColumnKind::Float);
        assert_eq!(t.infer_kind(3), ColumnKind::Text);
    }

    #[test]
    fn into_frame_extracts_id_column() {
        let dir = tempdir().unwrap();
        let p = write(dir.path(), "a.csv", "Wafer,s1,s2\nw1,1,2\nw2,3,\n");
        let f = RawTable::read(&p).unwrap().into_frame(Some("Wafer")).unwrap();
        assert_eq!(f.columns(), &["s1".to_string(), "s2".to_string()]);
        assert_eq!(f.ids().unwrap(), &["w1".to_string(), "w2".to_string()]);
        assert!(f.data()[[1, 1]].is_nan());
    }

    #[test]
    fn csv_round_trip() {
        let dir = tempdir().unwrap();
        let mut f = DataFrame::new(
            vec!["a".into(), "b".into()],
            array![[1.0, 2.0], [3.0, f64::NAN]],
        );
        f = f.with_ids("id", vec!["r1".into(), "r2".into()]);
        let p = dir.path().join("out.csv");
        f.write_csv(&p).unwrap();
        let back = DataFrame::read_csv(&p, Some("id")).unwrap();
        assert_eq!(back.columns(), f.columns());
        assert_eq!(back.ids(), f.ids());
        assert!(back.data()[[1, 1]].is_nan());
        assert_eq!(back.data()[[1, 0]], 3.0);
    }

    #[test]
    fn dedup_keeps_first_occurrence() {
        let mut f = DataFrame::new(
            vec!["a".into()],
            array![[1.0], [1.0], [2.0], [f64::NAN], [f64::NAN]],
        );
        let removed = f.dedup_rows();
        assert_eq!(removed, 2);
        assert_eq!(f.n_rows(), 3);
    }

    #[test]
    fn concat_requires_identical_columns() {
        let a = DataFrame::new(vec!["a".into()], array![[1.0]]);
        let b = DataFrame::new(vec!["b".into()], array![[2.0]]);
        assert!(DataFrame::concat(&[a, b]).is_err());
    }
}
