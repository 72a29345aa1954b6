//! Schema validation. Collects every violation and never coerces.
//!
//! Every violated constraint is collected with a dotted path into the value
//! (`input.options.limit`, `output.items[2]`), not just the first one.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use jsonschema::error::ValidationErrorKind;
use jsonschema::paths::{JSONPointer, PathChunk};

use super::Schema;

/// One violated constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub path: String,
    pub message: String,
}

impl Violation {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// All violations found in one value. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationFailure {
    pub violations: Vec<Violation>,
}

impl ValidationFailure {
    pub fn single(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            violations: vec![Violation::new(path, message)],
        }
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.violations.iter().map(|v| v.to_string()).collect();
        f.write_str(&parts.join("; "))
    }
}

impl std::error::Error for ValidationFailure {}

/// Validate `value` against `schema`. `root` names the top of the path
/// (`input` or `output`). Returns the value untouched on success.
pub fn validate<'v>(
    schema: &Schema,
    value: &'v Value,
    root: &str,
) -> Result<&'v Value, ValidationFailure> {
    let Some(compiled) = schema.compiled() else {
        return Ok(value);
    };
    let errors = match compiled.validate(value) {
        Ok(()) => return Ok(value),
        Err(errors) => errors,
    };

    let mut violations = Vec::new();
    for error in errors {
        let path = dotted(root, &error.instance_path);
        match &error.kind {
            ValidationErrorKind::Required { property } => {
                let name = property
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| property.to_string());
                violations.push(Violation::new(
                    format!("{path}.{name}"),
                    "required property is missing",
                ));
            }
            ValidationErrorKind::AdditionalProperties { unexpected } => {
                for name in unexpected {
                    violations.push(Violation::new(
                        format!("{path}.{name}"),
                        "property not allowed by schema",
                    ));
                }
            }
            _ => violations.push(Violation::new(path, error.to_string())),
        }
    }

    if violations.is_empty() {
        // The validator rejected without saying why; still a rejection.
        violations.push(Violation::new(root, "value does not match schema"));
    }
    Err(ValidationFailure { violations })
}

/// `/options/limit` under `input` becomes `input.options.limit`;
/// array positions render as `[2]`.
fn dotted(root: &str, pointer: &JSONPointer) -> String {
    let mut path = root.to_string();
    for chunk in pointer.iter() {
        match chunk {
            PathChunk::Property(name) => {
                path.push('.');
                path.push_str(name);
            }
            PathChunk::Index(i) => path = format!("{path}[{i}]"),
            PathChunk::Keyword(keyword) => {
                path.push('.');
                path.push_str(keyword);
            }
        }
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema(decl: Value) -> Schema {
        Schema::from_json(&decl).unwrap()
    }

    fn paths(failure: &ValidationFailure) -> Vec<&str> {
        failure.violations.iter().map(|v| v.path.as_str()).collect()
    }

    #[test]
    fn valid_value_returned_unchanged() {
        let s = schema(json!({
            "type": "object",
            "properties": {"message": {"type": "string"}},
            "required": ["message"]
        }));
        let value = json!({"message": "hi"});
        let out = validate(&s, &value, "input").unwrap();
        assert_eq!(out, &value);
    }

    #[test]
    fn reports_every_violation() {
        let s = schema(json!({
            "type": "object",
            "properties": {
                "name": {"type": "string", "minLength": 3},
                "options": {
                    "type": "object",
                    "properties": {"limit": {"type": "integer", "maximum": 100}}
                }
            },
            "required": ["name", "query"],
            "additionalProperties": false
        }));
        let value = json!({"name": "ab", "options": {"limit": 500}, "extra": true});
        let failure = validate(&s, &value, "input").unwrap_err();
        let p = paths(&failure);
        assert!(p.contains(&"input.query"), "{p:?}");
        assert!(p.contains(&"input.name"), "{p:?}");
        assert!(p.contains(&"input.options.limit"), "{p:?}");
        assert!(p.contains(&"input.extra"), "{p:?}");
        assert_eq!(failure.violations.len(), 4);
    }

    #[test]
    fn no_silent_coercion() {
        let s = schema(json!({"type": "integer"}));
        let failure = validate(&s, &json!("42"), "input").unwrap_err();
        assert_eq!(failure.violations.len(), 1);
        assert_eq!(failure.violations[0].path, "input");
        assert!(failure.violations[0].message.contains("integer"));
    }

    #[test]
    fn array_items_have_indexed_paths() {
        let s = schema(json!({
            "type": "array",
            "items": {"type": "number"},
            "maxItems": 2
        }));
        let failure = validate(&s, &json!([1, "two", 3]), "output").unwrap_err();
        let p = paths(&failure);
        assert!(p.contains(&"output[1]"), "{p:?}");
        assert!(p.contains(&"output"), "{p:?}");
    }

    #[test]
    fn enum_and_const() {
        let s = schema(json!({"enum": ["fast", "slow"]}));
        assert!(validate(&s, &json!("fast"), "input").is_ok());
        assert!(validate(&s, &json!("medium"), "input").is_err());

        let s = schema(json!({"const": 7}));
        assert!(validate(&s, &json!(7), "input").is_ok());
        assert!(validate(&s, &json!(8), "input").is_err());
    }

    #[test]
    fn pattern_and_lengths() {
        let s = schema(json!({"type": "string", "pattern": "^[a-z]+$", "maxLength": 4}));
        assert!(validate(&s, &json!("abc"), "input").is_ok());
        let failure = validate(&s, &json!("ABCDE"), "input").unwrap_err();
        assert_eq!(failure.violations.len(), 2);
    }

    #[test]
    fn numeric_bounds() {
        let s = schema(json!({
            "type": "number",
            "exclusiveMinimum": 0,
            "exclusiveMaximum": 10,
            "multipleOf": 0.5
        }));
        assert!(validate(&s, &json!(2.5), "input").is_ok());
        assert!(validate(&s, &json!(0), "input").is_err());
        assert!(validate(&s, &json!(10), "input").is_err());
        assert!(validate(&s, &json!(2.3), "input").is_err());
    }

    #[test]
    fn unique_items() {
        let s = schema(json!({"type": "array", "uniqueItems": true}));
        assert!(validate(&s, &json!([1, 2, 3]), "input").is_ok());
        let failure = validate(&s, &json!([1, 2, 1]), "input").unwrap_err();
        assert_eq!(paths(&failure), vec!["input"]);
    }

    #[test]
    fn additional_properties_schema() {
        let s = schema(json!({
            "type": "object",
            "additionalProperties": {"type": "string"}
        }));
        assert!(validate(&s, &json!({"a": "x", "b": "y"}), "input").is_ok());
        let failure = validate(&s, &json!({"a": 1}), "input").unwrap_err();
        assert_eq!(paths(&failure), vec!["input.a"]);
    }

    #[test]
    fn any_of_branches() {
        let s = schema(json!({"anyOf": [{"type": "string"}, {"type": "integer", "minimum": 0}]}));
        assert!(validate(&s, &json!("x"), "input").is_ok());
        assert!(validate(&s, &json!(3), "input").is_ok());
        assert!(validate(&s, &json!(-3), "input").is_err());
        assert!(validate(&s, &json!(null), "input").is_err());
    }

    #[test]
    fn false_schema_rejects_everything() {
        let s = schema(json!(false));
        let failure = validate(&s, &json!(null), "input").unwrap_err();
        assert_eq!(paths(&failure), vec!["input"]);
    }

    #[test]
    fn nested_array_paths_are_dotted() {
        let s = schema(json!({
            "type": "object",
            "properties": {
                "items": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "required": ["id"],
                        "additionalProperties": false,
                        "properties": {"id": {"type": "integer"}}
                    }
                }
            }
        }));
        let value = json!({"items": [{"id": 1}, {"id": 2}, {"name": "x"}]});
        let failure = validate(&s, &value, "output").unwrap_err();
        let p = paths(&failure);
        assert!(p.contains(&"output.items[2].id"), "{p:?}");
        assert!(p.contains(&"output.items[2].name"), "{p:?}");
        assert_eq!(p.len(), 2);
    }

    #[test]
    fn empty_schema_accepts_everything() {
        let s = Schema::any();
        for v in [json!(null), json!(1), json!("s"), json!([1]), json!({"k": {}})] {
            assert!(validate(&s, &v, "input").is_ok());
        }
    }

    #[test]
    fn failure_display_joins_violations() {
        let failure = ValidationFailure {
            violations: vec![
                Violation::new("input.a", "required property is missing"),
                Violation::new("input.b", "expected string, found integer"),
            ],
        };
        let text = failure.to_string();
        assert!(text.contains("input.a: required property is missing"));
        assert!(text.contains("; input.b"));
    }
}
