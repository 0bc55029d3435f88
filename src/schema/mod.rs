//! Declarative shape checks for stage inputs and outputs.
//!
//! A schema is written as plain JSON in stage descriptors:
//! `"string"`, `"int"` and `"object"` are leaf type tags, a single-element
//! list describes a list whose every element matches that element schema, and
//! a map lists required fields with their own schemas. Fields absent from a map
//! schema are ignored on the value being checked.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum Schema {
    String,
    Int,
    Object,
    /// `None` accepts elements of any shape (`[]` in descriptor JSON).
    List(Option<Box<Schema>>),
    /// Required fields, kept in declaration order.
    Fields(Vec<(String, Schema)>),
}

/// A schema definition that could not be understood. Raised at load time.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid schema at `{path}`: {reason}")]
pub struct SchemaError {
    pub path: String,
    pub reason: String,
}

/// First mismatch found while checking a value against a schema.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchemaViolation {
    #[error("missing required field `{path}`")]
    Missing { path: String },

    #[error("field `{path}` must be {expected}, found {found}")]
    TypeMismatch {
        path: String,
        expected: &'static str,
        found: &'static str,
    },
}

impl SchemaViolation {
    pub fn path(&self) -> &str {
        match self {
            SchemaViolation::Missing { path } | SchemaViolation::TypeMismatch { path, .. } => path,
        }
    }
}

impl Schema {
    pub fn parse(definition: &Value) -> Result<Self, SchemaError> {
        parse_at(definition, "$")
    }

    /// Checks `value` against this schema. `root` prefixes every reported path,
    /// typically `input` or `output`.
    pub fn validate(&self, value: &Value, root: &str) -> Result<(), SchemaViolation> {
        check(value, self, root)
    }

    /// Object schema with the given required fields.
    pub fn fields<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, Schema)>,
        K: Into<String>,
    {
        Schema::Fields(fields.into_iter().map(|(k, s)| (k.into(), s)).collect())
    }

    pub fn list_of(element: Schema) -> Self {
        Schema::List(Some(Box::new(element)))
    }

    fn expected(&self) -> &'static str {
        match self {
            Schema::String => "a string",
            Schema::Int => "an integer",
            Schema::Object | Schema::Fields(_) => "an object",
            Schema::List(_) => "a list",
        }
    }
}

/// Free-function form used by the stage executor.
pub fn validate(value: &Value, schema: &Schema, root: &str) -> Result<(), SchemaViolation> {
    schema.validate(value, root)
}

fn parse_at(definition: &Value, path: &str) -> Result<Schema, SchemaError> {
    match definition {
        Value::String(tag) => match tag.as_str() {
            "string" => Ok(Schema::String),
            "int" => Ok(Schema::Int),
            "object" => Ok(Schema::Object),
            other => Err(SchemaError {
                path: path.to_string(),
                reason: format!("unknown type tag `{other}`"),
            }),
        },
        Value::Array(items) => match items.as_slice() {
            [] => Ok(Schema::List(None)),
            [element] => Ok(Schema::list_of(parse_at(element, &format!("{path}[]"))?)),
            _ => Err(SchemaError {
                path: path.to_string(),
                reason: format!(
                    "list schema must have exactly one element schema, found {}",
                    items.len()
                ),
            }),
        },
        Value::Object(fields) => {
            let mut parsed = Vec::with_capacity(fields.len());
            for (key, nested) in fields {
                parsed.push((key.clone(), parse_at(nested, &format!("{path}.{key}"))?));
            }
            Ok(Schema::Fields(parsed))
        }
        other => Err(SchemaError {
            path: path.to_string(),
            reason: format!("expected a type tag, list or map, found {}", kind_of(other)),
        }),
    }
}

fn check(value: &Value, schema: &Schema, path: &str) -> Result<(), SchemaViolation> {
    let matches = match schema {
        Schema::String => value.is_string(),
        Schema::Int => value.is_i64() || value.is_u64(),
        Schema::Object => value.is_object(),
        Schema::List(element) => {
            let Value::Array(items) = value else {
                return Err(mismatch(path, schema, value));
            };
            if let Some(element) = element {
                for (index, item) in items.iter().enumerate() {
                    check(item, element, &format!("{path}[{index}]"))?;
                }
            }
            true
        }
        Schema::Fields(fields) => {
            let Value::Object(map) = value else {
                return Err(mismatch(path, schema, value));
            };
            check_fields(map, fields, path)?;
            true
        }
    };

    if matches {
        Ok(())
    } else {
        Err(mismatch(path, schema, value))
    }
}

fn check_fields(
    map: &Map<String, Value>,
    fields: &[(String, Schema)],
    path: &str,
) -> Result<(), SchemaViolation> {
    for (key, nested) in fields {
        let field_path = format!("{path}.{key}");
        match map.get(key) {
            Some(field) => check(field, nested, &field_path)?,
            None => return Err(SchemaViolation::Missing { path: field_path }),
        }
    }
    Ok(())
}

fn mismatch(path: &str, schema: &Schema, value: &Value) -> SchemaViolation {
    SchemaViolation::TypeMismatch {
        path: path.to_string(),
        expected: schema.expected(),
        found: kind_of(value),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(n) if n.is_f64() => "a float",
        Value::Number(_) => "an integer",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

impl TryFrom<Value> for Schema {
    type Error = SchemaError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Schema::parse(&value)
    }
}

impl From<Schema> for Value {
    fn from(schema: Schema) -> Self {
        match schema {
            Schema::String => Value::String("string".into()),
            Schema::Int => Value::String("int".into()),
            Schema::Object => Value::String("object".into()),
            Schema::List(None) => Value::Array(Vec::new()),
            Schema::List(Some(element)) => Value::Array(vec![Value::from(*element)]),
            Schema::Fields(fields) => Value::Object(
                fields
                    .into_iter()
                    .map(|(key, nested)| (key, Value::from(nested)))
                    .collect(),
            ),
        }
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Value::from(self.clone()))
    }
}
