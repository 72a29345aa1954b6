//! Tool schemas, compiled with `jsonschema` when the descriptor is built.
//!
//! A schema that does not compile (unknown type, bad regex, a keyword with
//! the wrong shape) rejects the descriptor; it never reaches an invocation.
//!
//! - `mod.rs` — `Schema`, compilation
//! - `validator.rs` — `validate()`, `Violation`, `ValidationFailure`

pub mod validator;

use std::fmt;
use std::sync::Arc;

use jsonschema::JSONSchema;
use serde_json::{Map, Value};
use thiserror::Error;

pub use validator::{validate, ValidationFailure, Violation};

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("invalid schema: {0}")]
    Invalid(String),
}

/// A compiled schema declaration. Cheap to clone.
#[derive(Clone)]
pub struct Schema {
    /// `None` accepts every value without running a validator.
    compiled: Option<Arc<JSONSchema>>,
    source: Value,
}

impl Schema {
    /// A schema that accepts every value (`{}`).
    pub fn any() -> Self {
        Self {
            compiled: None,
            source: Value::Object(Map::new()),
        }
    }

    /// Compile a schema declaration.
    pub fn from_json(value: &Value) -> Result<Self, SchemaError> {
        if !matches!(value, Value::Object(_) | Value::Bool(_)) {
            return Err(SchemaError::Invalid(format!(
                "expected an object or boolean, found {value}"
            )));
        }
        let compiled =
            JSONSchema::compile(value).map_err(|e| SchemaError::Invalid(e.to_string()))?;
        Ok(Self {
            compiled: Some(Arc::new(compiled)),
            source: value.clone(),
        })
    }

    /// The declaration this schema was compiled from.
    pub fn as_json(&self) -> &Value {
        &self.source
    }

    pub(crate) fn compiled(&self) -> Option<&JSONSchema> {
        self.compiled.as_deref()
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Schema").field(&self.source).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn object_schema_compiles() {
        let decl = json!({
            "type": "object",
            "properties": {
                "message": {"type": "string", "minLength": 1},
                "count": {"type": "integer", "minimum": 0}
            },
            "required": ["message"],
            "additionalProperties": false
        });
        let schema = Schema::from_json(&decl).unwrap();
        assert!(schema.compiled().is_some());
        assert_eq!(schema.as_json()["required"], json!(["message"]));
    }

    #[test]
    fn boolean_schemas_compile() {
        assert!(Schema::from_json(&json!(true)).is_ok());
        assert!(Schema::from_json(&json!(false)).is_ok());
    }

    #[test]
    fn unknown_type_rejected() {
        assert!(Schema::from_json(&json!({"type": "float"})).is_err());
    }

    #[test]
    fn bad_regex_rejected() {
        assert!(Schema::from_json(&json!({"type": "string", "pattern": "(unclosed"})).is_err());
    }

    #[test]
    fn malformed_nested_keyword_rejected() {
        let err = Schema::from_json(&json!({
            "type": "object",
            "properties": {"limit": {"type": "integer", "minimum": "ten"}}
        }))
        .unwrap_err();
        assert!(err.to_string().starts_with("invalid schema"), "{err}");
    }

    #[test]
    fn non_schema_rejected() {
        assert!(matches!(
            Schema::from_json(&json!(42)),
            Err(SchemaError::Invalid(_))
        ));
    }

    #[test]
    fn source_preserved() {
        let decl = json!({"type": "string", "description": "a name"});
        let schema = Schema::from_json(&decl).unwrap();
        assert_eq!(schema.as_json(), &decl);
        assert!(format!("{schema:?}").contains("a name"));
    }
}
