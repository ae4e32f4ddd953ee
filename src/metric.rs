//! Metric metadata served by `/metrics` and the payload options of `/metric-payload-options`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BoxError;

/// Describes one queryable target. `value` is the name Grafana sends back as the
/// query target.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub label: String,
    pub value: String,
    #[serde(default)]
    pub payloads: Vec<MetricPayload>,
}

impl Metric {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            ..Default::default()
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_payload(mut self, payload: MetricPayload) -> Self {
        self.payloads.push(payload);
        self
    }
}

/// A user-selectable option of a metric, shown in the Payload section of the
/// Grafana query editor.
///
/// A `select` or `multi-select` payload without `options` has its choices
/// resolved through the metric's [`PayloadOptionsResolver`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricPayload {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub label: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: PayloadKind,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub placeholder: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub reload_metric: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<PayloadOption>>,
}

impl MetricPayload {
    pub fn new(name: impl Into<String>, kind: PayloadKind) -> Self {
        Self {
            label: String::new(),
            name: name.into(),
            kind,
            placeholder: String::new(),
            reload_metric: false,
            width: None,
            options: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_placeholder(mut self, placeholder: impl Into<String>) -> Self {
        self.placeholder = placeholder.into();
        self
    }

    pub fn with_width(mut self, width: u32) -> Self {
        self.width = Some(width);
        self
    }

    pub fn with_reload_metric(mut self, reload: bool) -> Self {
        self.reload_metric = reload;
        self
    }

    pub fn with_options(mut self, options: Vec<PayloadOption>) -> Self {
        self.options = Some(options);
        self
    }

    /// True when the choices of this payload come from a resolver.
    pub fn is_dynamic(&self) -> bool {
        matches!(self.kind, PayloadKind::Select | PayloadKind::MultiSelect)
            && self.options.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PayloadKind {
    Input,
    Textarea,
    Select,
    MultiSelect,
}

/// One choice of a `select` or `multi-select` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadOption {
    pub label: String,
    pub value: String,
}

impl PayloadOption {
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }
}

/// Body of a `/metrics` request. A blank `metric` asks for every metric.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricRequest {
    #[serde(default)]
    pub metric: String,
}

/// Body of a `/metric-payload-options` request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PayloadOptionsRequest {
    #[serde(default)]
    pub metric: String,
    /// Name of the payload whose options are requested.
    #[serde(default)]
    pub name: String,
    /// All options currently selected in the metric's payloads.
    #[serde(default)]
    pub payload: Option<Value>,
}

impl PayloadOptionsRequest {
    /// Decodes the currently selected payload values. A missing payload decodes
    /// as an empty object.
    pub fn get_payload<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match &self.payload {
            Some(payload) => T::deserialize(payload),
            None => serde_json::from_str("{}"),
        }
    }
}

/// Lists the valid choices for one payload of a metric.
pub trait PayloadOptionsResolver: Send + Sync + 'static {
    fn resolve(&self, request: &PayloadOptionsRequest) -> Result<Vec<PayloadOption>, BoxError>;
}

impl<F> PayloadOptionsResolver for F
where
    F: Fn(&PayloadOptionsRequest) -> Result<Vec<PayloadOption>, BoxError> + Send + Sync + 'static,
{
    fn resolve(&self, request: &PayloadOptionsRequest) -> Result<Vec<PayloadOption>, BoxError> {
        self(request)
    }
}
