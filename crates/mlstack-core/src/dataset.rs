//! Tabular datasets exchanged between steps.

use serde::{Deserialize, Serialize};

use crate::artifact::ArtifactType;
use crate::{Error, Result};

/// Cells of a single column. `None` is a missing value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "values", rename_all = "lowercase")]
pub enum ColumnData {
    Float(Vec<Option<f64>>),
    Text(Vec<Option<String>>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Float(v) => v.len(),
            ColumnData::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slice(&self, start: usize, end: usize) -> ColumnData {
        match self {
            ColumnData::Float(v) => ColumnData::Float(v[start..end].to_vec()),
            ColumnData::Text(v) => ColumnData::Text(v[start..end].to_vec()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
}

impl Column {
    pub fn float(name: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            data: ColumnData::Float(values.into_iter().map(Some).collect()),
        }
    }

    pub fn text(name: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            name: name.into(),
            data: ColumnData::Text(values.into_iter().map(Some).collect()),
        }
    }
}

/// Columnar table with equally sized, uniquely named columns and finite
/// float cells.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "DatasetColumns")]
pub struct Dataset {
    columns: Vec<Column>,
}

/// Wire form of [`Dataset`], checked by [`Dataset::new`] on decode.
#[derive(Deserialize)]
struct DatasetColumns {
    columns: Vec<Column>,
}

impl TryFrom<DatasetColumns> for Dataset {
    type Error = Error;

    fn try_from(raw: DatasetColumns) -> Result<Self> {
        Dataset::new(raw.columns)
    }
}

impl ArtifactType for Dataset {
    const TYPE_NAME: &'static str = "dataset";
}

impl Dataset {
    pub fn new(columns: Vec<Column>) -> Result<Self> {
        if let Some(first) = columns.first() {
            let rows = first.data.len();
            if let Some(bad) = columns.iter().find(|c| c.data.len() != rows) {
                return Err(Error::Validation(format!(
                    "column `{}` has {} rows, expected {}",
                    bad.name,
                    bad.data.len(),
                    rows
                )));
            }
        }
        for (i, column) in columns.iter().enumerate() {
            if columns[..i].iter().any(|c| c.name == column.name) {
                return Err(Error::Validation(format!(
                    "duplicate column `{}`",
                    column.name
                )));
            }
        }
        for column in &columns {
            if let ColumnData::Float(values) = &column.data {
                if let Some(row) = values.iter().position(|v| v.is_some_and(|f| !f.is_finite())) {
                    return Err(Error::Validation(format!(
                        "column `{}` has a non-finite value at row {row}",
                        column.name
                    )));
                }
            }
        }
        Ok(Self { columns })
    }

    pub fn num_rows(&self) -> usize {
        self.columns.first().map(|c| c.data.len()).unwrap_or(0)
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn float_column(&self, name: &str) -> Result<&[Option<f64>]> {
        match self.column(name).map(|c| &c.data) {
            Some(ColumnData::Float(values)) => Ok(values),
            Some(ColumnData::Text(_)) => Err(Error::Validation(format!(
                "column `{name}` is not numeric"
            ))),
            None => Err(Error::NotFound(format!("column `{name}`"))),
        }
    }

    /// Split rows at `fraction` of the dataset: `(head, tail)`.
    pub fn split(&self, fraction: f64) -> (Dataset, Dataset) {
        let rows = self.num_rows();
        let at = ((rows as f64) * fraction.clamp(0.0, 1.0)).round() as usize;
        let part = |start, end| Dataset {
            columns: self
                .columns
                .iter()
                .map(|c| Column {
                    name: c.name.clone(),
                    data: c.data.slice(start, end),
                })
                .collect(),
        };
        (part(0, at), part(at, rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Dataset {
        Dataset::new(vec![
            Column::float("x", vec![1.0, 2.0, 3.0, 4.0]),
            Column::text("label", vec!["a".into(), "b".into(), "a".into(), "b".into()]),
        ])
        .unwrap()
    }

    #[test]
    fn rejects_ragged_and_duplicate_columns() {
        let ragged = Dataset::new(vec![
            Column::float("x", vec![1.0]),
            Column::float("y", vec![1.0, 2.0]),
        ]);
        assert!(matches!(ragged, Err(Error::Validation(_))));

        let dup = Dataset::new(vec![
            Column::float("x", vec![1.0]),
            Column::float("x", vec![2.0]),
        ]);
        assert!(matches!(dup, Err(Error::Validation(_))));
    }

    #[test]
    fn rejects_non_finite_cells() {
        let inf = Dataset::new(vec![Column::float("x", vec![1.0, f64::INFINITY, 3.0])]);
        assert!(matches!(inf, Err(Error::Validation(m)) if m.contains("row 1")));

        let nan = Dataset::new(vec![Column::float("x", vec![f64::NAN])]);
        assert!(matches!(nan, Err(Error::Validation(_))));

        let missing = Dataset::new(vec![Column {
            name: "x".into(),
            data: ColumnData::Float(vec![Some(1.0), None]),
        }]);
        assert!(missing.is_ok());
    }

    #[test]
    fn decoding_validates_columns() {
        let ragged = serde_json::json!({
            "columns": [
                {"name": "x", "data": {"type": "float", "values": [1.0]}},
                {"name": "y", "data": {"type": "float", "values": [1.0, 2.0]}},
            ]
        });
        let err = serde_json::from_value::<Dataset>(ragged).unwrap_err();
        assert!(err.to_string().contains("column `y` has 2 rows"));

        let dup = serde_json::json!({
            "columns": [
                {"name": "x", "data": {"type": "text", "values": ["a"]}},
                {"name": "x", "data": {"type": "text", "values": ["b"]}},
            ]
        });
        assert!(serde_json::from_value::<Dataset>(dup).is_err());

        let encoded = serde_json::to_value(sample()).unwrap();
        let decoded: Dataset = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, sample());
    }

    #[test]
    fn split_keeps_columns() {
        let (train, test) = sample().split(0.75);
        assert_eq!(train.num_rows(), 3);
        assert_eq!(test.num_rows(), 1);
        assert_eq!(test.float_column("x").unwrap(), &[Some(4.0)]);
    }

    #[test]
    fn float_column_checks_type() {
        let ds = sample();
        assert!(matches!(ds.float_column("label"), Err(Error::Validation(_))));
        assert!(matches!(ds.float_column("nope"), Err(Error::NotFound(_))));
    }
}
