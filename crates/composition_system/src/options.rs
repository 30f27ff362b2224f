//! Composition options and schema-driven decoding
//!
//! Options are stored as raw JSON mappings. An [`OptionsSchema`] declares the
//! fields a composition understands and [`OptionsSchema::decode`] rebuilds a
//! validated [`CompositionOptions`] from raw data, descending into nested
//! mappings for nested schemas. Unknown, missing or mistyped fields are
//! rejected with an [`OptionsBindingError`] instead of producing a partially
//! populated value.

use crate::error::OptionsBindingError;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

/// Raw options as persisted alongside a server.
pub type RawOptions = serde_json::Map<String, Value>;

const ROOT_PATH: &str = "(root)";

// ============================================================================
// Options Value
// ============================================================================

/// Structured options produced by a factory for one composition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompositionOptions(RawOptions);

impl CompositionOptions {
    /// Options for compositions with no configurable state.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Wraps a raw mapping without validating it against a schema.
    pub fn from_raw(raw: RawOptions) -> Self {
        Self(raw)
    }

    /// Encodes a typed options struct. The struct must serialize to a mapping.
    pub fn from_typed<T: Serialize>(value: &T) -> Result<Self, OptionsBindingError> {
        match serde_json::to_value(value) {
            Ok(Value::Object(raw)) => Ok(Self(raw)),
            Ok(_) => Err(OptionsBindingError::NotAMapping {
                path: ROOT_PATH.to_string(),
            }),
            Err(e) => Err(OptionsBindingError::Deserialize {
                target: std::any::type_name::<T>(),
                message: e.to_string(),
            }),
        }
    }

    /// Converts the options into a typed struct.
    pub fn bind<T: DeserializeOwned>(&self) -> Result<T, OptionsBindingError> {
        serde_json::from_value(Value::Object(self.0.clone())).map_err(|e| {
            OptionsBindingError::Deserialize {
                target: std::any::type_name::<T>(),
                message: e.to_string(),
            }
        })
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(field, value);
        self
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(field.into(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    pub fn get_u64(&self, field: &str) -> Option<u64> {
        self.0.get(field).and_then(Value::as_u64)
    }

    pub fn get_bool(&self, field: &str) -> Option<bool> {
        self.0.get(field).and_then(Value::as_bool)
    }

    /// Returns a nested options value stored under `field`.
    pub fn nested(&self, field: &str) -> Option<CompositionOptions> {
        match self.0.get(field) {
            Some(Value::Object(raw)) => Some(Self(raw.clone())),
            _ => None,
        }
    }

    /// Encodes the options back to their raw nested mapping form.
    pub fn to_raw(&self) -> RawOptions {
        self.0.clone()
    }

    pub fn into_raw(self) -> RawOptions {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<RawOptions> for CompositionOptions {
    fn from(raw: RawOptions) -> Self {
        Self(raw)
    }
}

// ============================================================================
// Schema
// ============================================================================

/// Expected shape of a single option field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Text,
    Integer,
    Float,
    Boolean,
    List,
    /// Any JSON value, including mappings, accepted as-is
    Any,
    /// A nested mapping decoded with its own schema
    Nested(OptionsSchema),
}

impl FieldKind {
    fn expected(&self) -> &'static str {
        match self {
            FieldKind::Text => "a string",
            FieldKind::Integer => "an integer",
            FieldKind::Float => "a number",
            FieldKind::Boolean => "a boolean",
            FieldKind::List => "a list",
            FieldKind::Any => "any value",
            FieldKind::Nested(_) => "a mapping",
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match self {
            FieldKind::Text => value.is_string(),
            FieldKind::Integer => value.is_i64() || value.is_u64(),
            FieldKind::Float => value.is_number(),
            FieldKind::Boolean => value.is_boolean(),
            FieldKind::List => value.is_array(),
            FieldKind::Any => true,
            FieldKind::Nested(_) => value.is_object(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
}

/// Declared shape of a composition's options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptionsSchema {
    fields: Vec<FieldSpec>,
}

impl OptionsSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            kind,
            required: true,
        });
        self
    }

    pub fn optional(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            kind,
            required: false,
        });
        self
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// Rebuilds validated options from a raw mapping.
    pub fn decode(&self, raw: &RawOptions) -> Result<CompositionOptions, OptionsBindingError> {
        self.decode_at(None, raw).map(CompositionOptions)
    }

    /// Like [`OptionsSchema::decode`] for an arbitrary JSON value.
    pub fn decode_value(&self, value: &Value) -> Result<CompositionOptions, OptionsBindingError> {
        match value {
            Value::Object(raw) => self.decode(raw),
            _ => Err(OptionsBindingError::NotAMapping {
                path: ROOT_PATH.to_string(),
            }),
        }
    }

    fn decode_at(&self, prefix: Option<&str>, raw: &RawOptions) -> Result<RawOptions, OptionsBindingError> {
        if let Some(unknown) = raw.keys().find(|name| self.field(name).is_none()) {
            return Err(OptionsBindingError::UnknownField {
                path: join_path(prefix, unknown),
            });
        }

        let mut decoded = RawOptions::new();
        for field in &self.fields {
            let path = join_path(prefix, &field.name);
            let value = match raw.get(&field.name) {
                None | Some(Value::Null) if field.required => {
                    return Err(OptionsBindingError::MissingField { path });
                }
                None | Some(Value::Null) => continue,
                Some(value) => value,
            };

            if !field.kind.accepts(value) {
                return Err(OptionsBindingError::TypeMismatch {
                    path,
                    expected: field.kind.expected(),
                });
            }

            let value = match (&field.kind, value) {
                (FieldKind::Nested(schema), Value::Object(nested)) => {
                    Value::Object(schema.decode_at(Some(&path), nested)?)
                }
                (_, value) => value.clone(),
            };
            decoded.insert(field.name.clone(), value);
        }

        Ok(decoded)
    }
}

fn join_path(prefix: Option<&str>, name: &str) -> String {
    match prefix {
        Some(prefix) => format!("{prefix}.{name}"),
        None => name.to_string(),
    }
}
