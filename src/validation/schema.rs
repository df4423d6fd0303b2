//! Declarative schemas.
//!
//! A [`Schema`] is an ordered list of named fields. Validation walks every
//! field, records every violation with its dotted path, and only produces a
//! normalized object when nothing failed.

use std::collections::BTreeMap;
use std::fmt;
use std::num::IntErrorKind;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::validation::rules;

/// Validated, normalized payload.
pub type Normalized = Map<String, Value>;

const ROOT_PATH: &str = "(root)";

/// One field-level violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub path: String,
    pub message: String,
}

impl FieldError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// A payload that failed its schema.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("payload failed schema '{schema}' with {} error(s)", .errors.len())]
pub struct Invalid {
    pub schema: String,
    pub errors: Vec<FieldError>,
}

/// Error returned by [`SchemaRegistry::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidateError {
    #[error("no schema registered under '{0}'")]
    UnknownSchema(String),
    #[error(transparent)]
    Invalid(#[from] Invalid),
}

/// Whether a field must be present.
#[derive(Debug, Clone, PartialEq)]
pub enum Presence {
    Required,
    Optional,
    /// Absent fields take this value (which is still validated).
    Default(Value),
}

/// Named string formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringFormat {
    Uuid,
    Email,
    Url,
    Phone,
    StrongPassword,
}

impl StringFormat {
    fn check(&self, value: &str) -> Result<(), &'static str> {
        let (ok, message) = match self {
            StringFormat::Uuid => (rules::is_uuid(value), "Invalid uuid"),
            StringFormat::Email => (rules::is_email(value), "Invalid email"),
            StringFormat::Url => (rules::is_url(value), "Invalid url"),
            StringFormat::Phone => (rules::is_phone(value), "Invalid phone number"),
            StringFormat::StrongPassword => (
                rules::is_strong_password(value),
                "Password must contain upper and lower case letters, a digit, and one of @$!%*?&",
            ),
        };
        if ok {
            Ok(())
        } else {
            Err(message)
        }
    }
}

/// String constraints.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StringRule {
    min_len: Option<usize>,
    max_len: Option<usize>,
    format: Option<StringFormat>,
}

impl StringRule {
    pub fn min_len(mut self, min: usize) -> Self {
        self.min_len = Some(min);
        self
    }

    pub fn max_len(mut self, max: usize) -> Self {
        self.max_len = Some(max);
        self
    }

    pub fn format(mut self, format: StringFormat) -> Self {
        self.format = Some(format);
        self
    }
}

/// Integer constraints.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntegerRule {
    min: Option<i64>,
    max: Option<i64>,
    coerce_from_string: bool,
}

impl IntegerRule {
    pub fn min(mut self, min: i64) -> Self {
        self.min = Some(min);
        self
    }

    pub fn max(mut self, max: i64) -> Self {
        self.max = Some(max);
        self
    }

    /// Strictly positive.
    pub fn positive(self) -> Self {
        self.min(1)
    }

    /// Accept decimal strings such as query parameters.
    pub fn coerce_from_string(mut self) -> Self {
        self.coerce_from_string = true;
        self
    }
}

/// Floating point constraints.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NumberRule {
    min: Option<f64>,
    max: Option<f64>,
    positive: bool,
}

impl NumberRule {
    pub fn min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    pub fn max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    pub fn positive(mut self) -> Self {
        self.positive = true;
        self
    }
}

/// Array constraints.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayRule {
    item: Box<FieldKind>,
    min_items: Option<usize>,
}

impl ArrayRule {
    pub fn min_items(mut self, min: usize) -> Self {
        self.min_items = Some(min);
        self
    }
}

/// The type and constraints of one field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    String(StringRule),
    Integer(IntegerRule),
    Number(NumberRule),
    Boolean,
    Enum(Vec<String>),
    Array(ArrayRule),
    Object(Schema),
    /// Object whose values are all strings.
    StringMap,
}

impl From<StringRule> for FieldKind {
    fn from(rule: StringRule) -> Self {
        FieldKind::String(rule)
    }
}

impl From<IntegerRule> for FieldKind {
    fn from(rule: IntegerRule) -> Self {
        FieldKind::Integer(rule)
    }
}

impl From<NumberRule> for FieldKind {
    fn from(rule: NumberRule) -> Self {
        FieldKind::Number(rule)
    }
}

impl From<ArrayRule> for FieldKind {
    fn from(rule: ArrayRule) -> Self {
        FieldKind::Array(rule)
    }
}

impl From<Schema> for FieldKind {
    fn from(schema: Schema) -> Self {
        FieldKind::Object(schema)
    }
}

pub fn string() -> StringRule {
    StringRule::default()
}

pub fn integer() -> IntegerRule {
    IntegerRule::default()
}

pub fn number() -> NumberRule {
    NumberRule::default()
}

pub fn boolean() -> FieldKind {
    FieldKind::Boolean
}

pub fn one_of(values: &[&str]) -> FieldKind {
    FieldKind::Enum(values.iter().map(|v| v.to_string()).collect())
}

pub fn array_of(item: impl Into<FieldKind>) -> ArrayRule {
    ArrayRule {
        item: Box::new(item.into()),
        min_items: None,
    }
}

pub fn object(schema: Schema) -> FieldKind {
    FieldKind::Object(schema)
}

pub fn string_map() -> FieldKind {
    FieldKind::StringMap
}

/// A named field.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub kind: FieldKind,
    pub presence: Presence,
}

/// An object schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    name: String,
    fields: Vec<Field>,
}

impl Schema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn required(self, name: &str, kind: impl Into<FieldKind>) -> Self {
        self.field(name, kind.into(), Presence::Required)
    }

    pub fn optional(self, name: &str, kind: impl Into<FieldKind>) -> Self {
        self.field(name, kind.into(), Presence::Optional)
    }

    pub fn with_default(self, name: &str, kind: impl Into<FieldKind>, default: Value) -> Self {
        self.field(name, kind.into(), Presence::Default(default))
    }

    fn field(mut self, name: &str, kind: FieldKind, presence: Presence) -> Self {
        self.fields.push(Field {
            name: name.to_string(),
            kind,
            presence,
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Validate `raw` against this schema.
    pub fn validate(&self, raw: &Value) -> Result<Normalized, Invalid> {
        let mut errors = Vec::new();
        let normalized = self.check_object(raw, "", &mut errors);
        match normalized {
            Some(object) if errors.is_empty() => Ok(object),
            _ => Err(Invalid {
                schema: self.name.clone(),
                errors,
            }),
        }
    }

    fn check_object(&self, raw: &Value, prefix: &str, errors: &mut Vec<FieldError>) -> Option<Normalized> {
        let Some(input) = raw.as_object() else {
            errors.push(FieldError::new(
                display_path(prefix),
                format!("Expected object, received {}", type_name(raw)),
            ));
            return None;
        };

        let mut output = Map::new();
        let mut failed = false;

        for field in &self.fields {
            let path = join(prefix, &field.name);
            let value = match (input.get(&field.name), &field.presence) {
                (Some(value), _) => value,
                (None, Presence::Required) => {
                    errors.push(FieldError::new(path, "Required"));
                    failed = true;
                    continue;
                }
                (None, Presence::Optional) => continue,
                (None, Presence::Default(default)) => default,
            };

            match check_value(&field.kind, value, &path, errors) {
                Some(normalized) => {
                    output.insert(field.name.clone(), normalized);
                }
                None => failed = true,
            }
        }

        if failed {
            None
        } else {
            Some(output)
        }
    }
}

fn check_value(kind: &FieldKind, value: &Value, path: &str, errors: &mut Vec<FieldError>) -> Option<Value> {
    let before = errors.len();
    let result = match kind {
        FieldKind::String(rule) => check_string(rule, value, path, errors),
        FieldKind::Integer(rule) => check_integer(rule, value, path, errors),
        FieldKind::Number(rule) => check_number(rule, value, path, errors),
        FieldKind::Boolean => match value {
            Value::Bool(_) => Some(value.clone()),
            other => type_error("boolean", other, path, errors),
        },
        FieldKind::Enum(options) => check_enum(options, value, path, errors),
        FieldKind::Array(rule) => check_array(rule, value, path, errors),
        FieldKind::Object(schema) => schema.check_object(value, path, errors).map(Value::Object),
        FieldKind::StringMap => check_string_map(value, path, errors),
    };
    if errors.len() > before {
        None
    } else {
        result
    }
}

fn check_string(rule: &StringRule, value: &Value, path: &str, errors: &mut Vec<FieldError>) -> Option<Value> {
    let Value::String(text) = value else {
        return type_error("string", value, path, errors);
    };

    let len = text.chars().count();
    if let Some(min) = rule.min_len {
        if len < min {
            errors.push(FieldError::new(
                path,
                format!("String must contain at least {min} character(s)"),
            ));
        }
    }
    if let Some(max) = rule.max_len {
        if len > max {
            errors.push(FieldError::new(
                path,
                format!("String must contain at most {max} character(s)"),
            ));
        }
    }
    if let Some(format) = rule.format {
        if let Err(message) = format.check(text) {
            errors.push(FieldError::new(path, message));
        }
    }
    Some(value.clone())
}

fn check_integer(rule: &IntegerRule, value: &Value, path: &str, errors: &mut Vec<FieldError>) -> Option<Value> {
    let parsed = match value {
        Value::Number(n) => match n.as_i64() {
            Some(i) => i,
            None => match n.as_f64() {
                Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => f as i64,
                Some(f) if f.fract() == 0.0 => return out_of_range(f > 0.0, path, errors),
                _ => {
                    errors.push(FieldError::new(path, "Expected integer, received float"));
                    return None;
                }
            },
        },
        Value::String(text) if rule.coerce_from_string => match text.trim().parse::<i64>() {
            Ok(i) => i,
            Err(e) => match e.kind() {
                IntErrorKind::PosOverflow => return out_of_range(true, path, errors),
                IntErrorKind::NegOverflow => return out_of_range(false, path, errors),
                _ => {
                    errors.push(FieldError::new(path, "Expected integer, received string"));
                    return None;
                }
            },
        },
        other => return type_error("integer", other, path, errors),
    };

    if let Some(min) = rule.min {
        if parsed < min {
            errors.push(FieldError::new(
                path,
                format!("Number must be greater than or equal to {min}"),
            ));
        }
    }
    if let Some(max) = rule.max {
        if parsed > max {
            errors.push(FieldError::new(
                path,
                format!("Number must be less than or equal to {max}"),
            ));
        }
    }
    Some(Value::from(parsed))
}

// Whole numbers beyond i64 are reported against the representable bound.
fn out_of_range(too_big: bool, path: &str, errors: &mut Vec<FieldError>) -> Option<Value> {
    let message = if too_big {
        format!("Number must be less than or equal to {}", i64::MAX)
    } else {
        format!("Number must be greater than or equal to {}", i64::MIN)
    };
    errors.push(FieldError::new(path, message));
    None
}

fn check_number(rule: &NumberRule, value: &Value, path: &str, errors: &mut Vec<FieldError>) -> Option<Value> {
    let Some(parsed) = value.as_f64() else {
        return type_error("number", value, path, errors);
    };

    if rule.positive && parsed <= 0.0 {
        errors.push(FieldError::new(path, "Number must be greater than 0"));
    }
    if let Some(min) = rule.min {
        if parsed < min {
            errors.push(FieldError::new(
                path,
                format!("Number must be greater than or equal to {min}"),
            ));
        }
    }
    if let Some(max) = rule.max {
        if parsed > max {
            errors.push(FieldError::new(
                path,
                format!("Number must be less than or equal to {max}"),
            ));
        }
    }
    Some(value.clone())
}

fn check_enum(options: &[String], value: &Value, path: &str, errors: &mut Vec<FieldError>) -> Option<Value> {
    let Value::String(text) = value else {
        return type_error("string", value, path, errors);
    };
    if options.iter().any(|option| option == text) {
        return Some(value.clone());
    }
    let expected = options
        .iter()
        .map(|option| format!("'{option}'"))
        .collect::<Vec<_>>()
        .join(" | ");
    errors.push(FieldError::new(
        path,
        format!("Invalid enum value. Expected {expected}, received '{text}'"),
    ));
    None
}

fn check_array(rule: &ArrayRule, value: &Value, path: &str, errors: &mut Vec<FieldError>) -> Option<Value> {
    let Value::Array(items) = value else {
        return type_error("array", value, path, errors);
    };

    if let Some(min) = rule.min_items {
        if items.len() < min {
            errors.push(FieldError::new(
                path,
                format!("Array must contain at least {min} element(s)"),
            ));
        }
    }

    let mut output = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let item_path = join(path, &index.to_string());
        if let Some(normalized) = check_value(&rule.item, item, &item_path, errors) {
            output.push(normalized);
        }
    }
    Some(Value::Array(output))
}

fn check_string_map(value: &Value, path: &str, errors: &mut Vec<FieldError>) -> Option<Value> {
    let Value::Object(entries) = value else {
        return type_error("object", value, path, errors);
    };
    for (key, entry) in entries {
        if !entry.is_string() {
            errors.push(FieldError::new(
                join(path, key),
                format!("Expected string, received {}", type_name(entry)),
            ));
        }
    }
    Some(value.clone())
}

fn type_error(expected: &str, value: &Value, path: &str, errors: &mut Vec<FieldError>) -> Option<Value> {
    errors.push(FieldError::new(
        display_path(path),
        format!("Expected {expected}, received {}", type_name(value)),
    ));
    None
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn join(prefix: &str, segment: &str) -> String {
    if prefix.is_empty() {
        segment.to_string()
    } else {
        format!("{prefix}.{segment}")
    }
}

fn display_path(path: &str) -> String {
    if path.is_empty() {
        ROOT_PATH.to_string()
    } else {
        path.to_string()
    }
}

/// Schemas by name.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: BTreeMap<String, Arc<Schema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a schema under its own name, replacing any previous one.
    pub fn register(&mut self, schema: Schema) {
        self.schemas
            .insert(schema.name().to_string(), Arc::new(schema));
    }

    pub fn get(&self, name: &str) -> Option<Arc<Schema>> {
        self.schemas.get(name).cloned()
    }

    /// Like `get`, for wiring checks that must fail on a missing name.
    pub fn require(&self, name: &str) -> Result<Arc<Schema>, ValidateError> {
        self.get(name)
            .ok_or_else(|| ValidateError::UnknownSchema(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.schemas.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.schemas.keys().cloned().collect()
    }

    /// Validate `raw` against the schema registered as `name`.
    pub fn validate(&self, name: &str, raw: &Value) -> Result<Normalized, ValidateError> {
        let schema = self
            .schemas
            .get(name)
            .ok_or_else(|| ValidateError::UnknownSchema(name.to_string()))?;
        Ok(schema.validate(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item_schema() -> Schema {
        Schema::new("item")
            .required("product_id", string().format(StringFormat::Uuid))
            .required("quantity", integer().positive())
    }

    #[test]
    fn test_unknown_keys_dropped_and_optional_omitted() {
        let schema = Schema::new("s")
            .required("name", string().min_len(1))
            .optional("note", string());

        let out = schema
            .validate(&json!({"name": "Alphonso", "extra": true}))
            .unwrap();
        assert_eq!(Value::Object(out), json!({"name": "Alphonso"}));
    }

    #[test]
    fn test_defaults_are_applied() {
        let schema = Schema::new("page")
            .with_default("page", integer().min(1), json!(1))
            .with_default("order", one_of(&["asc", "desc"]), json!("desc"));

        let out = schema.validate(&json!({})).unwrap();
        assert_eq!(out["page"], json!(1));
        assert_eq!(out["order"], json!("desc"));
    }

    #[test]
    fn test_nested_errors_have_dotted_paths() {
        let schema = Schema::new("order").required("items", array_of(item_schema()).min_items(1));

        let err = schema
            .validate(&json!({"items": [
                {"product_id": "bad", "quantity": 0},
                {"product_id": "3f2504e0-4f89-41d3-9a0c-0305e82c3301", "quantity": 1}
            ]}))
            .unwrap_err();

        let paths: Vec<&str> = err.errors.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["items.0.product_id", "items.0.quantity"]);
        assert_eq!(err.errors[0].message, "Invalid uuid");
        assert_eq!(err.errors[1].message, "Number must be greater than or equal to 1");
    }

    #[test]
    fn test_no_implicit_coercion() {
        let strict = Schema::new("s").required("n", integer());
        let err = strict.validate(&json!({"n": "5"})).unwrap_err();
        assert_eq!(err.errors[0].message, "Expected integer, received string");

        let lenient = Schema::new("s").required("n", integer().coerce_from_string());
        let out = lenient.validate(&json!({"n": "5"})).unwrap();
        assert_eq!(out["n"], json!(5));
    }

    #[test]
    fn test_integer_rejects_fractions() {
        let schema = Schema::new("s").required("n", integer());
        assert!(schema.validate(&json!({"n": 2.0})).is_ok());
        let err = schema.validate(&json!({"n": 2.5})).unwrap_err();
        assert_eq!(err.errors[0].message, "Expected integer, received float");
    }

    #[test]
    fn test_integer_beyond_i64_is_out_of_range() {
        let schema = Schema::new("s").required("n", integer().coerce_from_string());

        let err = schema.validate(&json!({"n": u64::MAX})).unwrap_err();
        assert_eq!(
            err.errors[0],
            FieldError::new("n", "Number must be less than or equal to 9223372036854775807")
        );

        let err = schema.validate(&json!({"n": -1e20})).unwrap_err();
        assert_eq!(
            err.errors[0].message,
            "Number must be greater than or equal to -9223372036854775808"
        );

        let err = schema.validate(&json!({"n": "99999999999999999999"})).unwrap_err();
        assert_eq!(
            err.errors[0].message,
            "Number must be less than or equal to 9223372036854775807"
        );
    }

    #[test]
    fn test_null_is_not_absent() {
        let schema = Schema::new("s").optional("note", string());
        let err = schema.validate(&json!({"note": null})).unwrap_err();
        assert_eq!(err.errors[0], FieldError::new("note", "Expected string, received null"));
    }

    #[test]
    fn test_root_must_be_object() {
        let schema = Schema::new("s").optional("a", string());
        let err = schema.validate(&json!([1, 2])).unwrap_err();
        assert_eq!(err.errors[0].path, "(root)");
    }

    #[test]
    fn test_string_map() {
        let schema = Schema::new("s").optional("variant", string_map());
        assert!(schema.validate(&json!({"variant": {"size": "1kg"}})).is_ok());
        let err = schema.validate(&json!({"variant": {"size": 1}})).unwrap_err();
        assert_eq!(err.errors[0].path, "variant.size");
    }

    #[test]
    fn test_registry_unknown_schema() {
        let registry = SchemaRegistry::new();
        let err = registry.validate("nope", &json!({})).unwrap_err();
        assert_eq!(err, ValidateError::UnknownSchema("nope".into()));
        assert!(registry.require("nope").is_err());
    }

    #[test]
    fn test_validation_is_deterministic() {
        let schema = Schema::new("order").required("items", array_of(item_schema()).min_items(1));
        let input = json!({"items": [{"product_id": "x", "quantity": -1}]});
        assert_eq!(schema.validate(&input), schema.validate(&input));
    }
}
