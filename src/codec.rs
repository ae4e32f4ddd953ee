//! Wire format of query responses.
//!
//! Series encode as `{"target": .., "datapoints": [[value, epoch_ms], ..]}` (value
//! first). Tables encode as `{"type": "table", "columns": [..], "rows": [..]}`,
//! transposing the column-major model into rows. Time values in tables are
//! RFC 3339 strings, unlike series timestamps.
//!
//! Encoding is deterministic: the same response always yields the same bytes.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::{self, Deserializer};
use serde::ser::{self, SerializeSeq, SerializeStruct, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::Value;

use crate::response::{
    Column, ColumnData, DataPoint, QueryResponse, TableResponse, TableShapeError,
    TimeSeriesResponse,
};

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error(transparent)]
    TableShape(#[from] TableShapeError),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encodes the aggregate `/query` response: a JSON array of series and tables.
///
/// Every table is checked before anything is written, so a malformed table fails
/// the whole array and no partial output is produced.
pub fn encode_responses(responses: &[QueryResponse]) -> Result<Vec<u8>, EncodeError> {
    for response in responses {
        if let QueryResponse::Table(table) = response {
            table.validate()?;
        }
    }
    Ok(serde_json::to_vec(responses)?)
}

/// Encodes a single series or table.
pub fn encode_response(response: &QueryResponse) -> Result<Vec<u8>, EncodeError> {
    if let QueryResponse::Table(table) = response {
        table.validate()?;
    }
    Ok(serde_json::to_vec(response)?)
}

/// Decodes the wire form of a single series or table.
pub fn decode_response(bytes: &[u8]) -> Result<QueryResponse, serde_json::Error> {
    serde_json::from_slice(bytes)
}

/// Formats a timestamp the way table time cells are encoded.
///
/// Fractional seconds keep only their significant digits (`.5`, not `.500`) and
/// are left out entirely for whole seconds.
pub fn format_time(ts: &DateTime<Utc>) -> String {
    let full = ts.to_rfc3339_opts(SecondsFormat::Nanos, true);
    let Some(stamp) = full.strip_suffix('Z') else {
        return full;
    };
    match stamp.split_once('.') {
        Some((seconds, fraction)) => {
            let fraction = fraction.trim_end_matches('0');
            if fraction.is_empty() {
                format!("{seconds}Z")
            } else {
                format!("{seconds}.{fraction}Z")
            }
        }
        None => format!("{stamp}Z"),
    }
}

/// A numeric cell, written as the shortest decimal literal that round-trips:
/// no exponent, no trailing zeros (`10`, `0.0000001`, `-0`). Non-finite values
/// have no JSON representation and encode as `null`.
struct WireNumber(f64);

impl Serialize for WireNumber {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let v = self.0;
        if !v.is_finite() {
            return serializer.serialize_none();
        }
        RawValue::from_string(v.to_string())
            .map_err(ser::Error::custom)?
            .serialize(serializer)
    }
}

impl Serialize for DataPoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        // value first, timestamp second
        let mut seq = serializer.serialize_seq(Some(2))?;
        seq.serialize_element(&WireNumber(self.value))?;
        seq.serialize_element(&self.timestamp.timestamp_millis())?;
        seq.end()
    }
}

impl Serialize for TimeSeriesResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("TimeSeriesResponse", 2)?;
        state.serialize_field("target", &self.target)?;
        state.serialize_field("datapoints", &self.datapoints)?;
        state.end()
    }
}

struct WireColumns<'a>(&'a [Column]);

impl Serialize for WireColumns<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Header<'a> {
            text: &'a str,
            #[serde(rename = "type")]
            kind: &'a str,
        }

        serializer.collect_seq(self.0.iter().map(|column| Header {
            text: &column.text,
            kind: column.data.type_tag(),
        }))
    }
}

struct WireRows<'a> {
    columns: &'a [Column],
    rows: usize,
}

impl Serialize for WireRows<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq((0..self.rows).map(|index| WireRow {
            columns: self.columns,
            index,
        }))
    }
}

struct WireRow<'a> {
    columns: &'a [Column],
    index: usize,
}

impl Serialize for WireRow<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.columns.len()))?;
        for column in self.columns {
            match &column.data {
                ColumnData::Time(values) => seq.serialize_element(&format_time(&values[self.index]))?,
                ColumnData::String(values) => seq.serialize_element(&values[self.index])?,
                ColumnData::Number(values) => seq.serialize_element(&WireNumber(values[self.index]))?,
                ColumnData::Unsupported(_) => {
                    return Err(ser::Error::custom(format!(
                        "column '{}' has no values",
                        column.text
                    )))
                }
            }
        }
        seq.end()
    }
}

impl Serialize for TableResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let rows = self.validate().map_err(ser::Error::custom)?;

        let mut state = serializer.serialize_struct("TableResponse", 3)?;
        state.serialize_field("type", "table")?;
        state.serialize_field("columns", &WireColumns(&self.columns))?;
        state.serialize_field(
            "rows",
            &WireRows {
                columns: &self.columns,
                rows,
            },
        )?;
        state.end()
    }
}

impl Serialize for QueryResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            QueryResponse::TimeSeries(series) => series.serialize(serializer),
            QueryResponse::Table(table) => table.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for DataPoint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (value, millis) = <(Option<f64>, i64)>::deserialize(deserializer)?;
        let timestamp = DateTime::from_timestamp_millis(millis)
            .ok_or_else(|| de::Error::custom(format!("timestamp out of range: {millis}")))?;
        Ok(DataPoint {
            timestamp,
            value: value.unwrap_or(f64::NAN),
        })
    }
}

impl<'de> Deserialize<'de> for TimeSeriesResponse {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct WireSeries {
            #[serde(default)]
            target: String,
            #[serde(default)]
            datapoints: Vec<DataPoint>,
        }

        let wire = WireSeries::deserialize(deserializer)?;
        Ok(TimeSeriesResponse {
            target: wire.target,
            datapoints: wire.datapoints,
        })
    }
}

#[derive(Deserialize)]
struct WireTable {
    #[serde(default)]
    columns: Vec<WireHeader>,
    #[serde(default)]
    rows: Vec<Vec<Value>>,
}

#[derive(Deserialize)]
struct WireHeader {
    #[serde(default)]
    text: String,
    #[serde(rename = "type", default)]
    kind: String,
}

impl WireTable {
    fn into_table(self) -> Result<TableResponse, String> {
        let width = self.columns.len();
        if let Some(row) = self.rows.iter().position(|row| row.len() != width) {
            return Err(format!(
                "row {row} has {} cells, expected {width}",
                self.rows[row].len()
            ));
        }

        let mut columns = Vec::with_capacity(width);
        for (index, header) in self.columns.into_iter().enumerate() {
            let cells = self.rows.iter().map(|row| &row[index]);
            let data = match header.kind.as_str() {
                "time" => ColumnData::Time(
                    cells
                        .map(|cell| {
                            serde_json::from_value::<DateTime<Utc>>(cell.clone())
                                .map_err(|e| format!("column '{}': {e}", header.text))
                        })
                        .collect::<Result<_, _>>()?,
                ),
                "string" => ColumnData::String(
                    cells
                        .map(|cell| match cell {
                            Value::String(s) => Ok(s.clone()),
                            other => Err(format!(
                                "column '{}': expected string, got {other}",
                                header.text
                            )),
                        })
                        .collect::<Result<_, _>>()?,
                ),
                "number" => ColumnData::Number(
                    cells
                        .map(|cell| match cell {
                            Value::Null => Ok(f64::NAN),
                            Value::Number(n) => n.as_f64().ok_or_else(|| {
                                format!("column '{}': number out of range", header.text)
                            }),
                            other => Err(format!(
                                "column '{}': expected number, got {other}",
                                header.text
                            )),
                        })
                        .collect::<Result<_, _>>()?,
                ),
                _ => ColumnData::Unsupported(header.kind.clone()),
            };
            columns.push(Column {
                text: header.text,
                data,
            });
        }
        Ok(TableResponse { columns })
    }
}

impl<'de> Deserialize<'de> for TableResponse {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        WireTable::deserialize(deserializer)?
            .into_table()
            .map_err(de::Error::custom)
    }
}

impl<'de> Deserialize<'de> for QueryResponse {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        let is_table = value.get("type").and_then(Value::as_str) == Some("table");
        if is_table {
            TableResponse::deserialize(value)
                .map(QueryResponse::Table)
                .map_err(de::Error::custom)
        } else {
            TimeSeriesResponse::deserialize(value)
                .map(QueryResponse::TimeSeries)
                .map_err(de::Error::custom)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn date(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, 1, h, m, 0).unwrap()
    }

    fn encode(response: impl Into<QueryResponse>) -> String {
        String::from_utf8(encode_response(&response.into()).unwrap()).unwrap()
    }

    fn sample_table() -> TableResponse {
        TableResponse::new(vec![
            Column::time("Time", vec![date(0, 0), date(0, 1)]),
            Column::string("Label", vec!["foo".into(), "bar".into()]),
            Column::number("Series A", vec![42.0, 43.0]),
            Column::number("Series B", vec![64.5, 100.0]),
        ])
    }

    #[test]
    fn test_time_series_value_before_timestamp() {
        let series = TimeSeriesResponse::new("A").with_datapoints(vec![
            DataPoint::new(date(0, 0), 100.0),
            DataPoint::new(date(1, 0), 0.0),
            DataPoint::new(date(2, 0), -2.5),
        ]);

        assert_eq!(
            encode(series),
            r#"{"target":"A","datapoints":[[100,1577836800000],[0,1577840400000],[-2.5,1577844000000]]}"#
        );
    }

    #[test]
    fn test_time_series_truncates_sub_millisecond() {
        let ts = date(0, 0) + chrono::Duration::microseconds(1_999);
        let series = TimeSeriesResponse::new("A").with_datapoints(vec![DataPoint::new(ts, 1.0)]);
        assert_eq!(
            encode(series),
            r#"{"target":"A","datapoints":[[1,1577836800001]]}"#
        );
    }

    #[test]
    fn test_number_formatting() {
        let series = TimeSeriesResponse::new("A").with_datapoints(vec![
            DataPoint::new(date(0, 0), 0.1),
            DataPoint::new(date(0, 0), 123456789.25),
            DataPoint::new(date(0, 0), f64::NAN),
        ]);
        assert_eq!(
            encode(series),
            r#"{"target":"A","datapoints":[[0.1,1577836800000],[123456789.25,1577836800000],[null,1577836800000]]}"#
        );
    }

    #[test]
    fn test_number_formatting_without_exponent() {
        let cases = [
            (9_007_199_254_740_992.0, "9007199254740992"),
            (1e16, "10000000000000000"),
            (1e-7, "0.0000001"),
            (-0.0, "-0"),
            (f64::INFINITY, "null"),
        ];
        for (value, want) in cases {
            let series =
                TimeSeriesResponse::new("A").with_datapoints(vec![DataPoint::new(date(0, 0), value)]);
            assert_eq!(
                encode(series),
                format!(r#"{{"target":"A","datapoints":[[{want},1577836800000]]}}"#),
                "value {value:e}"
            );
        }

        let table = TableResponse::new(vec![Column::number("value", vec![1e16, 1e-7])]);
        assert_eq!(
            encode(table),
            r#"{"type":"table","columns":[{"text":"value","type":"number"}],"rows":[[10000000000000000],[0.0000001]]}"#
        );
    }

    #[test]
    fn test_time_fraction_is_trimmed() {
        let whole = date(0, 0);
        assert_eq!(format_time(&whole), "2020-01-01T00:00:00Z");
        assert_eq!(
            format_time(&(whole + chrono::Duration::milliseconds(500))),
            "2020-01-01T00:00:00.5Z"
        );
        assert_eq!(
            format_time(&(whole + chrono::Duration::microseconds(123_450))),
            "2020-01-01T00:00:00.12345Z"
        );
        assert_eq!(
            format_time(&(whole + chrono::Duration::nanoseconds(1))),
            "2020-01-01T00:00:00.000000001Z"
        );
    }

    #[test]
    fn test_table_rows_are_transposed() {
        assert_eq!(
            encode(sample_table()),
            concat!(
                r#"{"type":"table","columns":["#,
                r#"{"text":"Time","type":"time"},{"text":"Label","type":"string"},"#,
                r#"{"text":"Series A","type":"number"},{"text":"Series B","type":"number"}],"#,
                r#""rows":[["2020-01-01T00:00:00Z","foo",42,64.5],["2020-01-01T00:01:00Z","bar",43,100]]}"#
            )
        );
    }

    #[test]
    fn test_empty_table() {
        assert_eq!(
            encode(TableResponse::default()),
            r#"{"type":"table","columns":[],"rows":[]}"#
        );
    }

    #[test]
    fn test_unsupported_column_without_rows() {
        let table = TableResponse::new(vec![Column::new(
            "flag",
            ColumnData::Unsupported("boolean".into()),
        )]);
        assert_eq!(
            encode(table),
            r#"{"type":"table","columns":[{"text":"flag","type":"boolean"}],"rows":[]}"#
        );
    }

    #[test]
    fn test_invalid_table_fails_whole_array() {
        let invalid = TableResponse::new(vec![
            Column::time("Time", vec![date(0, 0), date(0, 1)]),
            Column::string("Label", vec!["foo".into()]),
            Column::number("Series A", vec![42.0, 43.0]),
        ]);
        let responses = vec![
            QueryResponse::TimeSeries(TimeSeriesResponse::new("A")),
            QueryResponse::Table(invalid.clone()),
        ];

        let err = encode_responses(&responses).unwrap_err();
        assert!(matches!(err, EncodeError::TableShape(ref e) if e.column == "Label"));

        // plain serde users hit the same check
        assert!(serde_json::to_vec(&invalid).is_err());
    }

    #[test]
    fn test_combined_response() {
        let responses = vec![
            QueryResponse::TimeSeries(
                TimeSeriesResponse::new("A")
                    .with_datapoints(vec![DataPoint::new(date(0, 0), 100.0)]),
            ),
            QueryResponse::Table(TableResponse::new(vec![Column::number("v", vec![1.0])])),
        ];

        let encoded = String::from_utf8(encode_responses(&responses).unwrap()).unwrap();
        assert_eq!(
            encoded,
            concat!(
                r#"[{"target":"A","datapoints":[[100,1577836800000]]},"#,
                r#"{"type":"table","columns":[{"text":"v","type":"number"}],"rows":[[1]]}]"#
            )
        );
    }

    #[test]
    fn test_encoding_is_idempotent() {
        let response = QueryResponse::Table(sample_table());
        assert_eq!(
            encode_response(&response).unwrap(),
            encode_response(&response).unwrap()
        );
    }

    #[test]
    fn test_decode_table() {
        let bytes = encode_response(&QueryResponse::Table(sample_table())).unwrap();
        assert_eq!(
            decode_response(&bytes).unwrap(),
            QueryResponse::Table(sample_table())
        );
    }

    #[test]
    fn test_decode_series() {
        let decoded =
            decode_response(br#"{"target":"A","datapoints":[[1.5,1577836800000]]}"#).unwrap();
        assert_eq!(
            decoded,
            QueryResponse::TimeSeries(
                TimeSeriesResponse::new("A").with_datapoints(vec![DataPoint::new(date(0, 0), 1.5)])
            )
        );
    }

    #[test]
    fn test_decode_unknown_column_type() {
        let decoded = decode_response(
            br#"{"type":"table","columns":[{"text":"flag","type":"boolean"}],"rows":[[true]]}"#,
        )
        .unwrap();
        let QueryResponse::Table(table) = decoded else {
            panic!("expected a table");
        };
        assert_eq!(table.columns[0].data, ColumnData::Unsupported("boolean".into()));
        assert!(table.validate().is_ok());

        // the decoded tag is written back as is, without values
        assert_eq!(
            encode(table),
            r#"{"type":"table","columns":[{"text":"flag","type":"boolean"}],"rows":[]}"#
        );
    }

    #[test]
    fn test_decode_ragged_rows() {
        let result = decode_response(
            br#"{"type":"table","columns":[{"text":"a","type":"number"}],"rows":[[1],[2,3]]}"#,
        );
        assert!(result.is_err());
    }
}
