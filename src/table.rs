//! Tabular result model for archive queries.
//!
//! A [`Table`] is an ordered set of named, typed columns plus row-major
//! data. The column set varies with the queried service table, so cells are
//! held as a [`Value`] enum rather than a fixed schema. Tables serialize
//! with serde so the response cache can persist them verbatim.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Leading columns for raw-data query results.
pub const LEAD_COLUMNS_RAW: &[&str] = &["object", "ra", "dec", "dp_id", "date_obs", "prog_id"];

/// Leading columns for processed (phase-3) query results.
pub const LEAD_COLUMNS_PHASE3: &[&str] = &[
    "target_name",
    "s_ra",
    "s_dec",
    "dp_id",
    "date_obs",
    "proposal_id",
];

/// A single table cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Missing or null cell.
    Null,
    /// Boolean cell (FITS `T`/`F` logicals land here).
    Bool(bool),
    /// Integer cell.
    Integer(i64),
    /// Floating-point cell.
    Float(f64),
    /// Text cell.
    Text(String),
}

impl Value {
    /// A zero-like default for the same type, used to pad ragged records.
    #[must_use]
    pub fn type_default(&self) -> Self {
        match self {
            Self::Null => Self::Null,
            Self::Bool(_) => Self::Bool(false),
            Self::Integer(_) => Self::Integer(0),
            Self::Float(_) => Self::Float(0.0),
            Self::Text(_) => Self::Text(String::new()),
        }
    }

    /// The cell as text, if it is one.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, ""),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Integer(i)
                } else {
                    Self::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Self::Text(s),
            // Nested structures do not occur in TAP results; keep the raw text.
            other => Self::Text(other.to_string()),
        }
    }
}

/// Column metadata: name plus the service-reported datatype.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name as reported by the service.
    pub name: String,
    /// Service datatype label (e.g. `char`, `double`); free-form.
    #[serde(default)]
    pub datatype: String,
}

impl Column {
    /// Creates a column with an empty datatype label.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            datatype: String::new(),
        }
    }
}

/// Errors raised while assembling or interrogating a table.
#[derive(Debug, Error)]
pub enum TableError {
    /// The TAP JSON result document did not have the expected shape.
    #[error("malformed tabular result document: {reason}")]
    Malformed {
        /// What was wrong with the document.
        reason: String,
    },

    /// A requested column does not exist.
    #[error("no such column: {name}")]
    NoSuchColumn {
        /// The requested column name.
        name: String,
    },
}

/// TAP JSON result document (`FORMAT=json`).
#[derive(Debug, Deserialize)]
struct TapDocument {
    metadata: Vec<Column>,
    data: Vec<Vec<serde_json::Value>>,
}

/// An ordered table of typed rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    columns: Vec<Column>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    /// Creates an empty table with the given columns.
    #[must_use]
    pub fn new(columns: Vec<Column>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Parses a TAP JSON result document.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::Malformed`] when the document does not parse or
    /// a row's width disagrees with the column metadata.
    pub fn from_tap_json(body: &str) -> Result<Self, TableError> {
        let document: TapDocument =
            serde_json::from_str(body).map_err(|e| TableError::Malformed {
                reason: e.to_string(),
            })?;
        let width = document.metadata.len();
        let mut rows = Vec::with_capacity(document.data.len());
        for (index, row) in document.data.into_iter().enumerate() {
            if row.len() != width {
                return Err(TableError::Malformed {
                    reason: format!(
                        "row {index} has {} cells, expected {width}",
                        row.len()
                    ),
                });
            }
            rows.push(row.into_iter().map(Value::from).collect());
        }
        Ok(Self {
            columns: document.metadata,
            rows,
        })
    }

    /// Builds a table from heterogeneous key→value records.
    ///
    /// Columns are the union of all record keys in first-seen order; cells
    /// missing from a record are padded with the column's type default.
    #[must_use]
    pub fn from_records(records: &[Vec<(String, Value)>]) -> Self {
        let mut order: Vec<String> = Vec::new();
        let mut prototypes: HashMap<String, Value> = HashMap::new();
        for record in records {
            for (key, value) in record {
                if !prototypes.contains_key(key) {
                    order.push(key.clone());
                    prototypes.insert(key.clone(), value.type_default());
                }
            }
        }

        let mut rows = Vec::with_capacity(records.len());
        for record in records {
            let lookup: HashMap<&str, &Value> =
                record.iter().map(|(k, v)| (k.as_str(), v)).collect();
            let row = order
                .iter()
                .map(|key| {
                    lookup.get(key.as_str()).map_or_else(
                        || prototypes[key].clone(),
                        |value| (*value).clone(),
                    )
                })
                .collect();
            rows.push(row);
        }

        Self {
            columns: order.into_iter().map(Column::named).collect(),
            rows,
        }
    }

    /// Appends a row.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::Malformed`] when the row width disagrees with
    /// the column count.
    pub fn push_row(&mut self, row: Vec<Value>) -> Result<(), TableError> {
        if row.len() != self.columns.len() {
            return Err(TableError::Malformed {
                reason: format!(
                    "row has {} cells, expected {}",
                    row.len(),
                    self.columns.len()
                ),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when the table has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Column metadata in display order.
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Column names in display order.
    #[must_use]
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Rows in insertion order.
    #[must_use]
    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    /// All values of a named column, in row order.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::NoSuchColumn`] when the column is absent.
    pub fn column(&self, name: &str) -> Result<Vec<&Value>, TableError> {
        let index = self
            .columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| TableError::NoSuchColumn {
                name: name.to_string(),
            })?;
        Ok(self.rows.iter().map(|row| &row[index]).collect())
    }

    /// Text values of a named column, skipping non-text cells.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::NoSuchColumn`] when the column is absent.
    pub fn text_column(&self, name: &str) -> Result<Vec<String>, TableError> {
        Ok(self
            .column(name)?
            .into_iter()
            .filter_map(|v| v.as_text().map(str::to_string))
            .collect())
    }

    /// Drops all rows beyond `cap`.
    pub fn truncate(&mut self, cap: usize) {
        self.rows.truncate(cap);
    }

    /// Reorders columns so that those named in `leading` come first, in the
    /// given order; remaining columns keep their relative order.
    pub fn reorder_leading(&mut self, leading: &[&str]) {
        let mut first: Vec<usize> = Vec::new();
        for name in leading {
            if let Some(index) = self.columns.iter().position(|c| &c.name == name) {
                first.push(index);
            }
        }
        if first.is_empty() {
            return;
        }
        let mut rest: Vec<usize> = (0..self.columns.len())
            .filter(|i| !first.contains(i))
            .collect();
        let mut order = first;
        order.append(&mut rest);

        self.columns = order.iter().map(|&i| self.columns[i].clone()).collect();
        for row in &mut self.rows {
            *row = order.iter().map(|&i| row[i].clone()).collect();
        }
    }

    /// Renders the table as aligned plain text for terminal output.
    #[must_use]
    pub fn render(&self) -> String {
        let mut widths: Vec<usize> = self.columns.iter().map(|c| c.name.len()).collect();
        let rendered_rows: Vec<Vec<String>> = self
            .rows
            .iter()
            .map(|row| row.iter().map(ToString::to_string).collect())
            .collect();
        for row in &rendered_rows {
            for (i, cell) in row.iter().enumerate() {
                widths[i] = widths[i].max(cell.len());
            }
        }

        let mut out = String::new();
        for (i, column) in self.columns.iter().enumerate() {
            if i > 0 {
                out.push_str("  ");
            }
            out.push_str(&format!("{:<width$}", column.name, width = widths[i]));
        }
        out.push('\n');
        for (i, width) in widths.iter().enumerate() {
            if i > 0 {
                out.push_str("  ");
            }
            out.push_str(&"-".repeat(*width));
        }
        out.push('\n');
        for row in &rendered_rows {
            for (i, cell) in row.iter().enumerate() {
                if i > 0 {
                    out.push_str("  ");
                }
                out.push_str(&format!("{:<width$}", cell, width = widths[i]));
            }
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample_tap_json() -> &'static str {
        r#"{
            "metadata": [
                {"name": "object", "datatype": "char"},
                {"name": "ra", "datatype": "double"},
                {"name": "exposure", "datatype": "int"}
            ],
            "data": [
                ["HD 209458", 330.795, 300],
                ["M 31", 10.684, null]
            ]
        }"#
    }

    #[test]
    fn test_from_tap_json_parses_typed_cells() {
        let table = Table::from_tap_json(sample_tap_json()).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.column_names(), vec!["object", "ra", "exposure"]);
        assert_eq!(table.rows()[0][0], Value::Text("HD 209458".to_string()));
        assert_eq!(table.rows()[0][1], Value::Float(330.795));
        assert_eq!(table.rows()[0][2], Value::Integer(300));
        assert_eq!(table.rows()[1][2], Value::Null);
    }

    #[test]
    fn test_from_tap_json_rejects_ragged_rows() {
        let body = r#"{"metadata": [{"name": "a"}], "data": [[1, 2]]}"#;
        let result = Table::from_tap_json(body);
        assert!(matches!(result, Err(TableError::Malformed { .. })));
    }

    #[test]
    fn test_from_tap_json_rejects_garbage() {
        assert!(matches!(
            Table::from_tap_json("<votable/>"),
            Err(TableError::Malformed { .. })
        ));
    }

    #[test]
    fn test_from_records_unions_columns_and_pads() {
        let records = vec![
            vec![
                ("DP.ID".to_string(), Value::Text("A".to_string())),
                ("NAXIS".to_string(), Value::Integer(2)),
            ],
            vec![
                ("DP.ID".to_string(), Value::Text("B".to_string())),
                ("EXPTIME".to_string(), Value::Float(12.5)),
            ],
        ];
        let table = Table::from_records(&records);
        assert_eq!(table.column_names(), vec!["DP.ID", "NAXIS", "EXPTIME"]);
        // Missing NAXIS in record B padded with the integer default.
        assert_eq!(table.rows()[1][1], Value::Integer(0));
        // Missing EXPTIME in record A padded with the float default.
        assert_eq!(table.rows()[0][2], Value::Float(0.0));
    }

    #[test]
    fn test_column_lookup() {
        let table = Table::from_tap_json(sample_tap_json()).unwrap();
        let objects = table.text_column("object").unwrap();
        assert_eq!(objects, vec!["HD 209458", "M 31"]);
        assert!(matches!(
            table.column("nope"),
            Err(TableError::NoSuchColumn { .. })
        ));
    }

    #[test]
    fn test_truncate_caps_rows() {
        let mut table = Table::from_tap_json(sample_tap_json()).unwrap();
        table.truncate(1);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_reorder_leading_moves_known_columns_first() {
        let mut table = Table::from_tap_json(sample_tap_json()).unwrap();
        table.reorder_leading(&["ra", "missing"]);
        assert_eq!(table.column_names(), vec!["ra", "object", "exposure"]);
        assert_eq!(table.rows()[0][0], Value::Float(330.795));
        assert_eq!(table.rows()[0][1], Value::Text("HD 209458".to_string()));
    }

    #[test]
    fn test_push_row_validates_width() {
        let mut table = Table::new(vec![Column::named("a"), Column::named("b")]);
        assert!(table.push_row(vec![Value::Integer(1)]).is_err());
        assert!(
            table
                .push_row(vec![Value::Integer(1), Value::Integer(2)])
                .is_ok()
        );
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_serde_round_trip_for_cache() {
        let table = Table::from_tap_json(sample_tap_json()).unwrap();
        let encoded = serde_json::to_string(&table).unwrap();
        let decoded: Table = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, table);
    }

    #[test]
    fn test_render_aligns_header_and_rows() {
        let table = Table::from_tap_json(sample_tap_json()).unwrap();
        let text = table.render();
        let mut lines = text.lines();
        let header = lines.next().unwrap();
        assert!(header.starts_with("object"));
        assert!(lines.next().unwrap().starts_with("---"));
        assert_eq!(lines.count(), 2);
    }
}
