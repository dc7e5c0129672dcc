use std::fs::File;
use std::path::Path;

use ndarray::{Array2, ArrayView1, Axis};
use tracing::{debug, info};

use crate::error::{PipelineError, Result};

/// Numeric table read from a delimited file. Missing cells are stored as NaN.
#[derive(Debug, Clone)]
pub struct Table {
    columns: Vec<String>,
    values: Array2<f64>,
}

impl Table {
    pub fn new(columns: Vec<String>, values: Array2<f64>) -> Result<Self> {
        if columns.len() != values.ncols() {
            return Err(PipelineError::InvalidData(format!(
                "{} column names for {} value columns",
                columns.len(),
                values.ncols()
            )));
        }
        Ok(Self { columns, values })
    }

    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    pub fn n_rows(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| PipelineError::ColumnNotFound(name.to_string()))
    }

    pub fn column(&self, name: &str) -> Result<ArrayView1<'_, f64>> {
        let idx = self.column_index(name)?;
        Ok(self.values.column(idx))
    }

    /// Number of missing cells per column, in column order.
    pub fn missing_value_counts(&self) -> Vec<(String, usize)> {
        self.columns
            .iter()
            .zip(self.values.axis_iter(Axis(1)))
            .map(|(name, col)| (name.clone(), col.iter().filter(|v| v.is_nan()).count()))
            .collect()
    }

    pub(crate) fn into_parts(self) -> (Vec<String>, Array2<f64>) {
        (self.columns, self.values)
    }
}

/// Reads a CSV file with a header row into a numeric [`Table`].
///
/// Every name in `required_columns` must appear in the header. Empty cells
/// become missing values; any other non-numeric cell is a load error.
pub fn read_table<P: AsRef<Path>>(path: P, required_columns: &[&str]) -> Result<Table> {
    let path = path.as_ref();
    let file = File::open(path)
        .map_err(|e| PipelineError::DataLoad(format!("{}: {}", path.display(), e)))?;
    let mut rdr = csv::Reader::from_reader(file);

    let columns: Vec<String> = rdr
        .headers()?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    for required in required_columns {
        if !columns.iter().any(|c| c == required) {
            return Err(PipelineError::ColumnNotFound(required.to_string()));
        }
    }

    let rows: Vec<Vec<Option<f64>>> = rdr
        .deserialize()
        .collect::<std::result::Result<Vec<Vec<Option<f64>>>, csv::Error>>()?;

    let n_rows = rows.len();
    let n_cols = columns.len();
    let mut values = Array2::from_elem((n_rows, n_cols), f64::NAN);
    for (i, row) in rows.iter().enumerate() {
        if row.len() != n_cols {
            return Err(PipelineError::DataLoad(format!(
                "row {} has {} fields, header has {}",
                i + 1,
                row.len(),
                n_cols
            )));
        }
        for (j, cell) in row.iter().enumerate() {
            if let Some(v) = cell {
                values[[i, j]] = *v;
            }
        }
    }

    info!(path = %path.display(), rows = n_rows, columns = n_cols, "dataset loaded");
    debug!(columns = ?columns, "dataset header");

    Table::new(columns, values)
}
