//! Declarative stage configuration, one JSON document per stage.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::RoutingConfigError;
use crate::retry::{RetryPolicy, RetrySpec};
use crate::schema::Schema;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDescriptor {
    /// Unique stage id.
    pub name: String,
    /// Implementation to instantiate; defaults to `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub description: String,
    /// Section label in the turn's trace record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_label: Option<String>,
    #[serde(default)]
    pub system_prompt: String,
    pub input_schema: Schema,
    pub output_schema: Schema,
    /// Only the first entry is followed.
    #[serde(default)]
    pub successors: Vec<String>,
    #[serde(default)]
    pub conditional_rules: Vec<ConditionalRule>,
    #[serde(default)]
    pub retry: RetrySpec,
    #[serde(default)]
    pub settings: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    #[default]
    Terminate,
    Continue,
}

/// Predicate over a stage's output, evaluated before the successor is chosen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionalRule {
    /// Dotted path into the output object.
    pub predicate_field: String,
    pub predicate_value: Value,
    #[serde(default)]
    pub action: RuleAction,
    /// Output field holding the turn's final payload on termination.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal_payload_field: Option<String>,
}

impl ConditionalRule {
    pub fn terminate(
        field: impl Into<String>,
        value: impl Into<Value>,
        payload_field: impl Into<String>,
    ) -> Self {
        Self {
            predicate_field: field.into(),
            predicate_value: value.into(),
            action: RuleAction::Terminate,
            terminal_payload_field: Some(payload_field.into()),
        }
    }

    pub fn proceed(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            predicate_field: field.into(),
            predicate_value: value.into(),
            action: RuleAction::Continue,
            terminal_payload_field: None,
        }
    }

    pub fn matches(&self, output: &Value) -> bool {
        lookup(output, &self.predicate_field) == Some(&self.predicate_value)
    }

    pub fn payload(&self, output: &Value) -> Value {
        self.terminal_payload_field
            .as_deref()
            .and_then(|field| lookup(output, field))
            .cloned()
            .unwrap_or(Value::Null)
    }
}

fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(value, |current, segment| current.get(segment))
}

impl StageDescriptor {
    pub fn new(name: impl Into<String>, input_schema: Schema, output_schema: Schema) -> Self {
        Self {
            name: name.into(),
            kind: None,
            description: String::new(),
            trace_label: None,
            system_prompt: String::new(),
            input_schema,
            output_schema,
            successors: Vec::new(),
            conditional_rules: Vec::new(),
            retry: RetrySpec::default(),
            settings: Map::new(),
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn with_successor(mut self, successor: impl Into<String>) -> Self {
        self.successors.push(successor.into());
        self
    }

    pub fn with_rule(mut self, rule: ConditionalRule) -> Self {
        self.conditional_rules.push(rule);
        self
    }

    pub fn with_retry(mut self, retry: RetrySpec) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: Value) -> Self {
        self.settings.insert(key.into(), value);
        self
    }

    pub fn kind(&self) -> &str {
        self.kind.as_deref().unwrap_or(&self.name)
    }

    pub fn next(&self) -> Option<&str> {
        self.successors.first().map(String::as_str)
    }

    /// Trace label, or the kind with its first letter upper-cased.
    pub fn trace_label(&self) -> String {
        if let Some(label) = &self.trace_label {
            return label.clone();
        }
        let mut chars = self.kind().chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry.into()
    }

    pub fn setting_str(&self, key: &str) -> Option<&str> {
        self.settings.get(key).and_then(Value::as_str)
    }

    pub fn setting_object(&self, key: &str) -> Option<&Map<String, Value>> {
        self.settings.get(key).and_then(Value::as_object)
    }

    pub fn setting_usize(&self, key: &str) -> Option<usize> {
        self.settings
            .get(key)
            .and_then(Value::as_u64)
            .and_then(|value| usize::try_from(value).ok())
    }

    /// Checks that need only this descriptor; graph checks live in the routing table.
    pub fn validate(&self) -> Result<(), RoutingConfigError> {
        if self.name.trim().is_empty() {
            return Err(RoutingConfigError::Descriptor {
                path: "<unnamed>".into(),
                reason: "stage name is empty".into(),
            });
        }

        if self.retry.max_attempts == 0 {
            return Err(RoutingConfigError::InvalidRetry {
                stage: self.name.clone(),
                reason: "max_attempts must be at least 1".into(),
            });
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(RoutingConfigError::InvalidRetry {
                stage: self.name.clone(),
                reason: format!(
                    "base_delay_ms ({}) exceeds max_delay_ms ({})",
                    self.retry.base_delay_ms, self.retry.max_delay_ms
                ),
            });
        }

        for (index, rule) in self.conditional_rules.iter().enumerate() {
            if rule.predicate_field.trim().is_empty() {
                return Err(RoutingConfigError::InvalidRule {
                    stage: self.name.clone(),
                    reason: format!("rule {index} has an empty predicate_field"),
                });
            }
            if rule.action == RuleAction::Terminate && rule.terminal_payload_field.is_none() {
                return Err(RoutingConfigError::InvalidRule {
                    stage: self.name.clone(),
                    reason: format!("terminating rule {index} names no terminal_payload_field"),
                });
            }
        }

        Ok(())
    }
}

pub fn parse_descriptor(source: &str, origin: &str) -> Result<StageDescriptor, RoutingConfigError> {
    let descriptor: StageDescriptor =
        serde_json::from_str(source).map_err(|err| RoutingConfigError::Descriptor {
            path: origin.to_string(),
            reason: err.to_string(),
        })?;
    descriptor.validate()?;
    Ok(descriptor)
}

/// Reads every `*.json` file in `dir`, in file-name order.
pub fn load_descriptors(dir: &Path) -> Result<Vec<StageDescriptor>, RoutingConfigError> {
    let io_error = |err: std::io::Error| RoutingConfigError::Descriptor {
        path: dir.display().to_string(),
        reason: err.to_string(),
    };

    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_error)? {
        let path = entry.map_err(io_error)?.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            paths.push(path);
        }
    }
    paths.sort();

    paths
        .iter()
        .map(|path| {
            let origin = path.display().to_string();
            let source = fs::read_to_string(path).map_err(|err| RoutingConfigError::Descriptor {
                path: origin.clone(),
                reason: err.to_string(),
            })?;
            parse_descriptor(&source, &origin)
        })
        .collect()
}
