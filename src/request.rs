use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A query request sent by the JSON API datasource to `/query`.
///
/// Every field is optional on the wire; absent fields take their default value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryRequest {
    pub app: String,
    pub timezone: String,
    pub start_time: i64,
    pub interval: String,
    pub interval_ms: u64,
    pub panel_id: Value,
    pub targets: Vec<QueryTarget>,
    pub range: Range,
    pub request_id: String,
    pub range_raw: RawRange,
    pub scoped_vars: Value,
    pub max_data_points: u64,
    pub live_streaming: bool,
    pub adhoc_filters: Vec<Value>,
}

/// One target of a [`QueryRequest`].
///
/// `target` names the metric to query. `ref_id` groups the targets of one row in
/// the dashboard panel editor; see [`QueryRequest::correlated_payloads`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryTarget {
    pub ref_id: String,
    pub datasource: DatasourceRef,
    pub editor_mode: String,
    /// Selected payload options. `None` when absent or `null`.
    pub payload: Option<Value>,
    pub target: String,
    pub key: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasourceRef {
    #[serde(rename = "type")]
    pub kind: String,
    pub uid: String,
}

/// Time range of a request. An unset bound is open.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Range {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub raw: RawRange,
}

/// Range as entered in the dashboard, e.g. `now-6h`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawRange {
    pub from: String,
    pub to: String,
}

/// The value of one dashboard variable, as found in [`QueryRequest::scoped_vars`].
///
/// A multi-select variable is read as a `ScopedVar<Vec<String>>`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ScopedVar<T> {
    #[serde(default)]
    pub selected: bool,
    #[serde(default)]
    pub text: String,
    pub value: T,
}

#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("target not found: {0}")]
    TargetNotFound(String),

    #[error("invalid payload: {0}")]
    Decode(#[from] serde_json::Error),
}

impl QueryRequest {
    /// Decodes the payload of `target`.
    ///
    /// When the request holds several targets of the same name, the one with
    /// correlation id `ref_id` is used, falling back to the first one by name.
    /// Returns `Ok(None)` when the target has no payload.
    pub fn get_payload<T: DeserializeOwned>(
        &self,
        target: &str,
        ref_id: &str,
    ) -> Result<Option<T>, PayloadError> {
        let found = self
            .targets
            .iter()
            .find(|t| t.target == target && t.ref_id == ref_id)
            .or_else(|| self.targets.iter().find(|t| t.target == target))
            .ok_or_else(|| PayloadError::TargetNotFound(target.to_string()))?;

        match &found.payload {
            Some(payload) => Ok(Some(T::deserialize(payload)?)),
            None => Ok(None),
        }
    }

    /// All `(target, payload)` pairs sharing correlation id `ref_id`, in request order.
    /// Targets without a payload are skipped.
    pub fn correlated_payloads<'a>(
        &'a self,
        ref_id: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a Value)> + 'a {
        self.targets
            .iter()
            .filter(move |t| t.ref_id == ref_id)
            .filter_map(|t| t.payload.as_ref().map(|p| (t.target.as_str(), p)))
    }

    /// Merges the object payloads of every target with correlation id `ref_id`
    /// into one object (later targets win on duplicate keys) and decodes it.
    pub fn merged_payload<T: DeserializeOwned>(&self, ref_id: &str) -> Result<T, PayloadError> {
        let mut merged = Map::new();
        for (_, payload) in self.correlated_payloads(ref_id) {
            if let Value::Object(fields) = payload {
                merged.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }
        Ok(T::deserialize(Value::Object(merged))?)
    }

    /// Decodes the dashboard variables into `T`, typically a struct of [`ScopedVar`]s.
    pub fn get_scoped_vars<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        let vars = match &self.scoped_vars {
            Value::Null => Value::Object(Map::new()),
            other => other.clone(),
        };
        serde_json::from_value(vars)
    }

    /// Suggested interval between datapoints.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}
