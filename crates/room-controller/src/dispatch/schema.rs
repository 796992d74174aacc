//! Declarative payload schemas.
//!
//! Handlers describe their payload as a [`Schema`]. The dispatcher compiles
//! it once at registration time (rejecting malformed definitions up front) and
//! validates every inbound payload against the compiled form before the
//! handler is invoked. Violations carry a dotted path such as
//! `payload.dtlsParameters.fingerprints`.

use serde_json::Value;
use std::collections::HashSet;
use thiserror::Error;

/// A single failed rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldViolation {
    pub path: String,
    pub rule: &'static str,
    pub message: String,
}

impl FieldViolation {
    fn new(path: &str, rule: &'static str, message: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            rule,
            message: message.into(),
        }
    }
}

/// Errors in a schema definition (programming errors, caught at startup).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("Field '{0}' declared twice")]
    DuplicateField(String),

    #[error("Field '{field}': {reason}")]
    InvalidRule { field: String, reason: String },

    #[error("Event '{0}' registered twice")]
    DuplicateEvent(String),
}

/// Constraint on one field.
#[derive(Debug, Clone)]
pub enum FieldRule {
    /// A string with a character count in `min..=max`.
    String { min: usize, max: usize },
    /// A string equal to one of the listed values.
    OneOf(&'static [&'static str]),
    /// An object, optionally with its own nested schema.
    Object(Option<Schema>),
    /// An array with at least `min_items` entries.
    Array { min_items: usize },
    Integer,
    Bool,
    /// Present, any JSON value.
    Any,
}

#[derive(Debug, Clone)]
struct Field {
    name: &'static str,
    rule: FieldRule,
    required: bool,
}

/// Builder for an object schema.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    #[must_use]
    pub fn object() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn required(mut self, name: &'static str, rule: FieldRule) -> Self {
        self.fields.push(Field {
            name,
            rule,
            required: true,
        });
        self
    }

    #[must_use]
    pub fn optional(mut self, name: &'static str, rule: FieldRule) -> Self {
        self.fields.push(Field {
            name,
            rule,
            required: false,
        });
        self
    }

    /// Check the definition and produce a validator.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError` for duplicate fields, empty enums, or string
    /// bounds with `min > max`, at any nesting depth.
    pub fn compile(self) -> Result<CompiledSchema, SchemaError> {
        let mut seen = HashSet::new();
        let mut fields = Vec::with_capacity(self.fields.len());

        for field in self.fields {
            if !seen.insert(field.name) {
                return Err(SchemaError::DuplicateField(field.name.to_string()));
            }

            let rule = match field.rule {
                FieldRule::String { min, max } if min > max => {
                    return Err(SchemaError::InvalidRule {
                        field: field.name.to_string(),
                        reason: format!("min length {min} exceeds max length {max}"),
                    });
                }
                FieldRule::OneOf(values) if values.is_empty() => {
                    return Err(SchemaError::InvalidRule {
                        field: field.name.to_string(),
                        reason: "enum has no values".to_string(),
                    });
                }
                FieldRule::String { min, max } => CompiledRule::String { min, max },
                FieldRule::OneOf(values) => CompiledRule::OneOf(values),
                FieldRule::Object(nested) => {
                    CompiledRule::Object(nested.map(Schema::compile).transpose()?.map(Box::new))
                }
                FieldRule::Array { min_items } => CompiledRule::Array { min_items },
                FieldRule::Integer => CompiledRule::Integer,
                FieldRule::Bool => CompiledRule::Bool,
                FieldRule::Any => CompiledRule::Any,
            };

            fields.push(CompiledField {
                name: field.name,
                rule,
                required: field.required,
            });
        }

        Ok(CompiledSchema { fields })
    }
}

#[derive(Debug)]
enum CompiledRule {
    String { min: usize, max: usize },
    OneOf(&'static [&'static str]),
    Object(Option<Box<CompiledSchema>>),
    Array { min_items: usize },
    Integer,
    Bool,
    Any,
}

#[derive(Debug)]
struct CompiledField {
    name: &'static str,
    rule: CompiledRule,
    required: bool,
}

/// Validated schema, ready to check payloads.
#[derive(Debug)]
pub struct CompiledSchema {
    fields: Vec<CompiledField>,
}

impl CompiledSchema {
    /// Validate `value` as an object located at `path`.
    ///
    /// Returns every violation found; an empty list means the value is valid.
    /// Unknown fields are ignored.
    #[must_use]
    pub fn validate(&self, value: &Value, path: &str) -> Vec<FieldViolation> {
        let mut violations = Vec::new();
        self.validate_into(value, path, &mut violations);
        violations
    }

    fn validate_into(&self, value: &Value, path: &str, out: &mut Vec<FieldViolation>) {
        let Some(object) = value.as_object() else {
            out.push(FieldViolation::new(path, "type", "must be an object"));
            return;
        };

        for field in &self.fields {
            let field_path = format!("{path}.{}", field.name);
            match object.get(field.name) {
                None | Some(Value::Null) => {
                    if field.required {
                        out.push(FieldViolation::new(&field_path, "required", "is required"));
                    }
                }
                Some(v) => check_rule(&field.rule, v, &field_path, out),
            }
        }
    }
}

fn check_rule(rule: &CompiledRule, value: &Value, path: &str, out: &mut Vec<FieldViolation>) {
    match rule {
        CompiledRule::String { min, max } => {
            let Some(s) = value.as_str() else {
                out.push(FieldViolation::new(path, "type", "must be a string"));
                return;
            };
            let len = s.chars().count();
            if len < *min {
                out.push(FieldViolation::new(
                    path,
                    "minLength",
                    format!("must be at least {min} characters"),
                ));
            } else if len > *max {
                out.push(FieldViolation::new(
                    path,
                    "maxLength",
                    format!("must be at most {max} characters"),
                ));
            }
        }
        CompiledRule::OneOf(values) => {
            if !value.as_str().is_some_and(|s| values.iter().any(|v| *v == s)) {
                out.push(FieldViolation::new(
                    path,
                    "enum",
                    format!("must be one of: {}", values.join(", ")),
                ));
            }
        }
        CompiledRule::Object(nested) => match nested {
            Some(schema) => schema.validate_into(value, path, out),
            None if !value.is_object() => {
                out.push(FieldViolation::new(path, "type", "must be an object"));
            }
            None => {}
        },
        CompiledRule::Array { min_items } => match value.as_array() {
            None => out.push(FieldViolation::new(path, "type", "must be an array")),
            Some(items) if items.len() < *min_items => out.push(FieldViolation::new(
                path,
                "minItems",
                format!("must contain at least {min_items} item(s)"),
            )),
            Some(_) => {}
        },
        CompiledRule::Integer => {
            if !(value.is_i64() || value.is_u64()) {
                out.push(FieldViolation::new(path, "type", "must be an integer"));
            }
        }
        CompiledRule::Bool => {
            if !value.is_boolean() {
                out.push(FieldViolation::new(path, "type", "must be a boolean"));
            }
        }
        CompiledRule::Any => {}
    }
}
