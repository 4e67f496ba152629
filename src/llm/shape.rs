//! Minimal structural expectations for LM responses.
//!
//! A [`Shape`] states which keys must be present and how values nest. It is
//! shallow: it does not coerce types, fill defaults, or check
//! value ranges.
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Any,
    String,
    Number,
    /// A number with no fractional part.
    Integer,
    Bool,
    Nullable(Box<Shape>),
    Array(Box<Shape>),
    Object(Vec<Field>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: &'static str,
    pub shape: Shape,
    pub required: bool,
}

impl Field {
    pub fn required(name: &'static str, shape: Shape) -> Self {
        Self {
            name,
            shape,
            required: true,
        }
    }

    pub fn optional(name: &'static str, shape: Shape) -> Self {
        Self {
            name,
            shape,
            required: false,
        }
    }
}

impl Shape {
    pub fn object(fields: impl IntoIterator<Item = Field>) -> Self {
        Self::Object(fields.into_iter().collect())
    }

    pub fn array_of(item: Shape) -> Self {
        Self::Array(Box::new(item))
    }

    pub fn nullable(inner: Shape) -> Self {
        Self::Nullable(Box::new(inner))
    }

    fn describe(&self) -> String {
        match self {
            Self::Any => "any value".to_string(),
            Self::String => "string".to_string(),
            Self::Number => "number".to_string(),
            Self::Integer => "integer".to_string(),
            Self::Bool => "boolean".to_string(),
            Self::Nullable(inner) => format!("{} or null", inner.describe()),
            Self::Array(_) => "array".to_string(),
            Self::Object(_) => "object".to_string(),
        }
    }
}

/// One place where a value departs from its shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeViolation {
    pub path: String,
    pub expected: String,
    pub found: String,
}

impl fmt::Display for ShapeViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: expected {}, found {}", self.path, self.expected, self.found)
    }
}

/// Check `value` against `shape`, collecting every violation.
pub fn check(value: &Value, shape: &Shape) -> Result<(), Vec<ShapeViolation>> {
    let mut violations = Vec::new();
    walk(value, shape, "$", &mut violations);
    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations)
    }
}

fn walk(value: &Value, shape: &Shape, path: &str, out: &mut Vec<ShapeViolation>) {
    let mismatch = |out: &mut Vec<ShapeViolation>| {
        out.push(ShapeViolation {
            path: path.to_string(),
            expected: shape.describe(),
            found: kind_of(value).to_string(),
        })
    };
    match shape {
        Shape::Any => {}
        Shape::String if value.is_string() => {}
        Shape::Number if value.is_number() => {}
        Shape::Integer if is_integral(value) => {}
        Shape::Bool if value.is_boolean() => {}
        Shape::Nullable(_) if value.is_null() => {}
        Shape::Nullable(inner) => walk(value, inner, path, out),
        Shape::Array(item) => match value.as_array() {
            Some(items) => {
                for (idx, element) in items.iter().enumerate() {
                    walk(element, item, &format!("{path}[{idx}]"), out);
                }
            }
            None => mismatch(out),
        },
        Shape::Object(fields) => match value.as_object() {
            Some(map) => {
                for field in fields {
                    let child_path = format!("{path}.{}", field.name);
                    match map.get(field.name) {
                        Some(child) => walk(child, &field.shape, &child_path, out),
                        None if field.required => out.push(ShapeViolation {
                            path: child_path,
                            expected: field.shape.describe(),
                            found: "nothing (required key missing)".to_string(),
                        }),
                        None => {}
                    }
                }
            }
            None => mismatch(out),
        },
        _ => mismatch(out),
    }
}

fn is_integral(value: &Value) -> bool {
    value.is_i64()
        || value.is_u64()
        || value
            .as_f64()
            .is_some_and(|n| n.is_finite() && n.fract() == 0.0)
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn score_shape() -> Shape {
        Shape::object([
            Field::required(
                "items",
                Shape::array_of(Shape::object([
                    Field::required("item", Shape::String),
                    Field::required("score", Shape::nullable(Shape::Integer)),
                    Field::optional("rationale", Shape::String),
                ])),
            ),
            Field::required("summary", Shape::String),
        ])
    }

    #[test]
    fn conforming_value_passes() {
        let value = json!({"items": [{"item": "a", "score": 3}, {"item": "b", "score": null}], "summary": "ok"});
        assert!(check(&value, &score_shape()).is_ok());
    }

    #[test]
    fn missing_required_key_is_reported_with_path() {
        let value = json!({"items": [{"score": 3}]});
        let violations = check(&value, &score_shape()).expect_err("two violations");
        let paths: Vec<&str> = violations.iter().map(|v| v.path.as_str()).collect();
        assert_eq!(paths, vec!["$.items[0].item", "$.summary"]);
    }

    #[test]
    fn wrong_nesting_is_reported() {
        let value = json!({"items": {"item": "a"}, "summary": "s"});
        let violations = check(&value, &score_shape()).expect_err("items not array");
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].to_string(), "$.items: expected array, found object");
    }

    #[test]
    fn integer_accepts_integral_floats_only() {
        assert!(check(&json!(3.0), &Shape::Integer).is_ok());
        assert!(check(&json!(3.5), &Shape::Integer).is_err());
        assert!(check(&json!("3"), &Shape::Integer).is_err());
    }

    #[test]
    fn optional_field_may_be_absent_but_not_mistyped() {
        let shape = Shape::object([Field::optional("tag", Shape::String)]);
        assert!(check(&json!({}), &shape).is_ok());
        assert!(check(&json!({"tag": 1}), &shape).is_err());
    }
}
