//! Dashboard variables served by `/variable`.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::BoxError;
use crate::request::Range;

/// Request for the values of one dashboard variable.
///
/// With "Raw JSON" off in the variable editor the payload is `{"target": <query>}`;
/// with it on, the payload is whatever JSON the user entered. Either way `target`
/// is taken from the payload's `target` field, and left blank when there is none.
#[derive(Debug, Clone, Default)]
pub struct VariableRequest {
    pub target: String,
    pub payload: Option<Value>,
    pub range: Range,
}

impl<'de> Deserialize<'de> for VariableRequest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Wire {
            #[serde(default)]
            payload: Option<Value>,
            #[serde(default)]
            range: Range,
        }

        let wire = Wire::deserialize(deserializer)?;
        let target = match &wire.payload {
            None => String::new(),
            Some(Value::Object(fields)) => match fields.get("target") {
                None | Some(Value::Null) => String::new(),
                Some(Value::String(target)) => target.clone(),
                Some(other) => {
                    return Err(serde::de::Error::custom(format!(
                        "payload target must be a string, got {other}"
                    )))
                }
            },
            Some(other) => {
                return Err(serde::de::Error::custom(format!(
                    "payload must be an object, got {other}"
                )))
            }
        };

        Ok(VariableRequest {
            target,
            payload: wire.payload,
            range: wire.range,
        })
    }
}

/// One possible value of a dashboard variable. `text` is displayed, `value` is
/// what ends up in queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    #[serde(rename = "__text")]
    pub text: String,
    #[serde(rename = "__value")]
    pub value: String,
}

impl Variable {
    pub fn new(text: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            value: value.into(),
        }
    }
}

/// Produces the values of a dashboard variable.
pub trait VariableResolver: Send + Sync + 'static {
    fn resolve(&self, request: &VariableRequest) -> Result<Vec<Variable>, BoxError>;
}

impl<F> VariableResolver for F
where
    F: Fn(&VariableRequest) -> Result<Vec<Variable>, BoxError> + Send + Sync + 'static,
{
    fn resolve(&self, request: &VariableRequest) -> Result<Vec<Variable>, BoxError> {
        self(request)
    }
}

/// Variable resolvers by name. Built once, read-only afterwards.
#[derive(Clone, Default)]
pub struct VariableRegistry {
    resolvers: HashMap<String, Arc<dyn VariableResolver>>,
}

impl VariableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `resolver` under `name`, replacing any earlier registration.
    /// The empty name serves requests whose payload has no `target`.
    pub fn register(&mut self, name: impl Into<String>, resolver: impl VariableResolver) {
        self.resolvers.insert(name.into(), Arc::new(resolver));
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn VariableResolver>> {
        self.resolvers.get(name)
    }

    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }
}

impl std::fmt::Debug for VariableRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.resolvers.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("VariableRegistry")
            .field("variables", &names)
            .finish()
    }
}
