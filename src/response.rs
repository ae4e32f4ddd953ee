//! Query results as produced by a [`QueryHandler`](crate::QueryHandler).
//!
//! A handler returns either a time series (a list of timestamp/value samples)
//! or a table (named, typed columns of equal length). The wire form of both is
//! produced by the [`codec`](crate::codec) module.

use chrono::{DateTime, Utc};

use crate::request::Range;

/// The output of one query handler invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResponse {
    TimeSeries(TimeSeriesResponse),
    Table(TableResponse),
}

impl From<TimeSeriesResponse> for QueryResponse {
    fn from(response: TimeSeriesResponse) -> Self {
        QueryResponse::TimeSeries(response)
    }
}

impl From<TableResponse> for QueryResponse {
    fn from(response: TableResponse) -> Self {
        QueryResponse::Table(response)
    }
}

/// A time series. `target` should match the target of the received request.
///
/// Samples are emitted in the order given; they are never re-sorted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeSeriesResponse {
    pub target: String,
    pub datapoints: Vec<DataPoint>,
}

impl TimeSeriesResponse {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            datapoints: Vec::new(),
        }
    }

    pub fn with_datapoints(mut self, datapoints: Vec<DataPoint>) -> Self {
        self.datapoints = datapoints;
        self
    }

    pub fn push(&mut self, timestamp: DateTime<Utc>, value: f64) {
        self.datapoints.push(DataPoint { timestamp, value });
    }
}

/// One sample of a [`TimeSeriesResponse`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DataPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl DataPoint {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// A table: an ordered list of columns that must all hold the same number of rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableResponse {
    pub columns: Vec<Column>,
}

/// A named column of a [`TableResponse`].
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub text: String,
    pub data: ColumnData,
}

impl Column {
    pub fn new(text: impl Into<String>, data: ColumnData) -> Self {
        Self {
            text: text.into(),
            data,
        }
    }

    pub fn time(text: impl Into<String>, values: Vec<DateTime<Utc>>) -> Self {
        Self::new(text, ColumnData::Time(values))
    }

    pub fn string(text: impl Into<String>, values: Vec<String>) -> Self {
        Self::new(text, ColumnData::String(values))
    }

    pub fn number(text: impl Into<String>, values: Vec<f64>) -> Self {
        Self::new(text, ColumnData::Number(values))
    }
}

/// The values held by a [`Column`].
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Time(Vec<DateTime<Utc>>),
    String(Vec<String>),
    Number(Vec<f64>),
    /// A column whose wire type tag is not one of `time`, `string` or `number`.
    /// It carries no values and always counts as zero rows.
    Unsupported(String),
}

impl ColumnData {
    /// The wire type tag of the column.
    ///
    /// A [`ColumnData::Unsupported`] column reports the tag it was decoded with,
    /// so a table read from the wire encodes back to the same headers. Such tags
    /// are outside the protocol's `time`/`string`/`number` set; Grafana shows the
    /// column without values.
    pub fn type_tag(&self) -> &str {
        match self {
            ColumnData::Time(_) => "time",
            ColumnData::String(_) => "string",
            ColumnData::Number(_) => "number",
            ColumnData::Unsupported(tag) => tag,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnData::Time(values) => values.len(),
            ColumnData::String(values) => values.len(),
            ColumnData::Number(values) => values.len(),
            ColumnData::Unsupported(_) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, ColumnData::Unsupported(_))
    }

    /// Same column type, no values.
    fn empty_copy(&self) -> Self {
        match self {
            ColumnData::Time(_) => ColumnData::Time(Vec::new()),
            ColumnData::String(_) => ColumnData::String(Vec::new()),
            ColumnData::Number(_) => ColumnData::Number(Vec::new()),
            ColumnData::Unsupported(tag) => ColumnData::Unsupported(tag.clone()),
        }
    }

    fn select(&self, rows: &[usize]) -> Self {
        match self {
            ColumnData::Time(values) => ColumnData::Time(rows.iter().map(|&r| values[r]).collect()),
            ColumnData::String(values) => {
                ColumnData::String(rows.iter().map(|&r| values[r].clone()).collect())
            }
            ColumnData::Number(values) => {
                ColumnData::Number(rows.iter().map(|&r| values[r]).collect())
            }
            ColumnData::Unsupported(tag) => ColumnData::Unsupported(tag.clone()),
        }
    }
}

/// Raised when the columns of a table do not all hold the same number of rows.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "error building table query output: all columns must have the same number of rows \
     (column '{column}' has {actual}, expected {expected})"
)]
pub struct TableShapeError {
    pub column: String,
    pub expected: usize,
    pub actual: usize,
}

impl TableResponse {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    /// Number of rows, taken from the first column with a recognised type.
    /// Zero for a table without such a column. Does not check the other columns;
    /// see [`TableResponse::validate`].
    pub fn row_count(&self) -> usize {
        self.columns
            .iter()
            .find(|column| column.data.is_supported())
            .map(|column| column.data.len())
            .unwrap_or(0)
    }

    /// Checks that every column holds the same number of rows and returns that number.
    pub fn validate(&self) -> Result<usize, TableShapeError> {
        let rows = self.row_count();
        for column in &self.columns {
            let len = column.data.len();
            if len != rows {
                return Err(TableShapeError {
                    column: column.text.clone(),
                    expected: rows,
                    actual: len,
                });
            }
        }
        Ok(rows)
    }

    /// Keeps the rows whose value in the first time column lies within `range`.
    /// An unset bound leaves that side of the range open.
    ///
    /// A table without a time column filters to an empty copy of itself.
    pub fn filter(&self, range: &Range) -> TableResponse {
        let Some(ColumnData::Time(timestamps)) = self
            .columns
            .iter()
            .map(|column| &column.data)
            .find(|data| matches!(data, ColumnData::Time(_)))
        else {
            return self.empty_copy();
        };

        let rows: Vec<usize> = timestamps
            .iter()
            .enumerate()
            .filter(|(_, ts)| range.from.map_or(true, |from| **ts >= from))
            .filter(|(_, ts)| range.to.map_or(true, |to| **ts <= to))
            .map(|(row, _)| row)
            .collect();

        TableResponse {
            columns: self
                .columns
                .iter()
                .map(|column| Column {
                    text: column.text.clone(),
                    data: if column.data.len() == timestamps.len() {
                        column.data.select(&rows)
                    } else {
                        column.data.empty_copy()
                    },
                })
                .collect(),
        }
    }

    fn empty_copy(&self) -> TableResponse {
        TableResponse {
            columns: self
                .columns
                .iter()
                .map(|column| Column {
                    text: column.text.clone(),
                    data: column.data.empty_copy(),
                })
                .collect(),
        }
    }
}
