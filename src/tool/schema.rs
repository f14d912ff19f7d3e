//! Runtime argument validator compiled from a tool's input schema.
//!
//! Each tool's JSON Schema fragment is compiled once at startup into a tree of
//! [`Kind`] nodes. Validation walks that tree, producing normalized arguments
//! (defaults filled in, safe coercions applied) or every violated constraint.
//!
//! Supported keywords: `type` (single or list, `null` included), `enum`,
//! `default`, `allOf`, `anyOf`/`oneOf`, `properties`, `required`,
//! `additionalProperties`, `items`, `minimum`/`maximum`,
//! `exclusiveMinimum`/`exclusiveMaximum`, `minLength`/`maxLength`,
//! `minItems`/`maxItems`. Annotation keywords (`description`, `format`, ...)
//! are ignored.
//!
//! # Safe coercions
//!
//! - `"123"` -> `123` for `integer` / `number` nodes, `12.0` -> `12` for `integer`
//! - `"true"` / `"false"` -> booleans for `boolean` nodes
//! - numbers and booleans -> strings for `string` nodes

use std::fmt;

use serde_json::{Map, Number, Value};
use tracing::warn;

use crate::{Error, Result};

/// Arguments after validation: defaults applied, types coerced, unknown keys handled
pub type ValidatedArguments = Map<String, Value>;

/// Constraint kind of a violation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueCode {
    /// Missing value or wrong JSON type
    InvalidType,
    /// Value outside the declared `enum`
    InvalidEnumValue,
    /// Below a minimum (value, length or item count)
    TooSmall,
    /// Above a maximum (value, length or item count)
    TooBig,
    /// Keys not allowed by `additionalProperties: false`
    UnrecognizedKeys,
    /// No `anyOf` / multi-type variant matched
    InvalidUnion,
}

impl IssueCode {
    /// Snake-case name used in rendered messages
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidType => "invalid_type",
            Self::InvalidEnumValue => "invalid_enum_value",
            Self::TooSmall => "too_small",
            Self::TooBig => "too_big",
            Self::UnrecognizedKeys => "unrecognized_keys",
            Self::InvalidUnion => "invalid_union",
        }
    }
}

impl fmt::Display for IssueCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single violated constraint
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationIssue {
    /// Path from the arguments root (property names and array indices)
    pub path: Vec<String>,
    /// Constraint kind
    pub code: IssueCode,
    /// Human-readable message
    pub message: String,
}

impl ValidationIssue {
    /// Dot-joined path, empty for the root
    #[must_use]
    pub fn path_string(&self) -> String {
        self.path.join(".")
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.path_string(), self.code, self.message)
    }
}

/// Every violation found while validating one argument set
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    /// Violations in discovery order
    pub issues: Vec<ValidationIssue>,
}

impl ValidationError {
    /// Text returned to the caller of `tool`
    #[must_use]
    pub fn render(&self, tool: &str) -> String {
        format!("Invalid arguments for tool '{tool}': {self}")
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, issue) in self.issues.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

// ── Compiled representation ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Schema {
    kind: Kind,
    default: Option<Value>,
}

#[derive(Debug, Clone)]
enum Kind {
    Any,
    Null,
    String {
        min_len: Option<u64>,
        max_len: Option<u64>,
    },
    Number(NumberRules),
    Boolean,
    Array {
        items: Option<Box<Schema>>,
        min_items: Option<u64>,
        max_items: Option<u64>,
    },
    Object {
        properties: Vec<(String, Schema)>,
        required: Vec<String>,
        additional: Additional,
    },
    Enum(Vec<Value>),
    Union(Vec<Schema>),
    Nullable(Box<Schema>),
    AllOf(Vec<Schema>),
}

#[derive(Debug, Clone, Default)]
struct NumberRules {
    integer: bool,
    minimum: Option<f64>,
    maximum: Option<f64>,
    exclusive_minimum: Option<f64>,
    exclusive_maximum: Option<f64>,
}

/// Treatment of keys not listed under `properties`
#[derive(Debug, Clone)]
enum Additional {
    /// Keyword absent: drop silently
    Strip,
    /// `true`: keep as-is
    Allow,
    /// `false`: report
    Deny,
    /// A schema: validate and keep
    Schema(Box<Schema>),
}

impl Schema {
    fn bare(kind: Kind) -> Self {
        Self {
            kind,
            default: None,
        }
    }

    fn default_value(&self) -> Option<&Value> {
        self.default.as_ref().or_else(|| match &self.kind {
            Kind::Nullable(inner) => inner.default_value(),
            Kind::AllOf(parts) => parts.iter().find_map(Schema::default_value),
            _ => None,
        })
    }

    fn accepts_null(&self) -> bool {
        match &self.kind {
            Kind::Any | Kind::Null | Kind::Nullable(_) => true,
            Kind::Enum(values) => values.contains(&Value::Null),
            Kind::Union(variants) => variants.iter().any(Schema::accepts_null),
            _ => false,
        }
    }
}

// ── Compilation ───────────────────────────────────────────────────────────────

fn compile_node(schema: &Value) -> Result<Schema> {
    let obj = match schema {
        Value::Bool(true) => return Ok(Schema::bare(Kind::Any)),
        Value::Object(obj) => obj,
        other => {
            return Err(Error::Schema(format!(
                "expected a schema object, found {}",
                json_type_name(other)
            )));
        }
    };

    let mut kind = match obj.get("enum") {
        Some(Value::Array(values)) => Kind::Enum(values.clone()),
        Some(_) => return Err(Error::Schema("'enum' must be an array".to_string())),
        None => compile_typed(obj)?,
    };

    if let Some(parts) = obj.get("allOf") {
        let parts = compile_list(parts, "allOf")?;
        kind = match kind {
            // `{allOf: [X], type: "null"}` is how optional-with-default fields arrive
            Kind::Null => Kind::Nullable(Box::new(all_of(parts))),
            Kind::Any => all_of(parts).kind,
            other => {
                let mut parts = parts;
                parts.push(Schema::bare(other));
                Kind::AllOf(parts)
            }
        };
    }

    for keyword in ["anyOf", "oneOf"] {
        if let Some(variants) = obj.get(keyword) {
            let union = Schema::bare(Kind::Union(compile_list(variants, keyword)?));
            kind = match kind {
                Kind::Any => union.kind,
                Kind::Null => Kind::Nullable(Box::new(union)),
                other => Kind::AllOf(vec![Schema::bare(other), union]),
            };
        }
    }

    Ok(Schema {
        kind,
        default: obj.get("default").cloned(),
    })
}

fn all_of(mut parts: Vec<Schema>) -> Schema {
    if parts.len() == 1 {
        parts.remove(0)
    } else {
        Schema::bare(Kind::AllOf(parts))
    }
}

fn compile_list(value: &Value, keyword: &str) -> Result<Vec<Schema>> {
    value
        .as_array()
        .ok_or_else(|| Error::Schema(format!("'{keyword}' must be an array")))?
        .iter()
        .map(compile_node)
        .collect()
}

fn compile_typed(obj: &Map<String, Value>) -> Result<Kind> {
    match obj.get("type") {
        None if obj.contains_key("properties") => compile_type("object", obj),
        None if obj.contains_key("items") => compile_type("array", obj),
        None => Ok(Kind::Any),
        Some(Value::String(name)) => compile_type(name, obj),
        Some(Value::Array(names)) => {
            let names = names
                .iter()
                .map(|n| {
                    n.as_str()
                        .ok_or_else(|| Error::Schema("'type' entries must be strings".to_string()))
                })
                .collect::<Result<Vec<_>>>()?;
            let nullable = names.contains(&"null");
            let mut variants = names
                .iter()
                .filter(|n| **n != "null")
                .map(|n| compile_type(n, obj).map(Schema::bare))
                .collect::<Result<Vec<_>>>()?;
            let inner = match variants.len() {
                0 => return Ok(Kind::Null),
                1 => variants.remove(0),
                _ => Schema::bare(Kind::Union(variants)),
            };
            Ok(if nullable {
                Kind::Nullable(Box::new(inner))
            } else {
                inner.kind
            })
        }
        Some(other) => Err(Error::Schema(format!(
            "'type' must be a string or a list, found {}",
            json_type_name(other)
        ))),
    }
}

fn compile_type(name: &str, obj: &Map<String, Value>) -> Result<Kind> {
    Ok(match name {
        "string" => Kind::String {
            min_len: u64_keyword(obj, "minLength")?,
            max_len: u64_keyword(obj, "maxLength")?,
        },
        "number" | "integer" => Kind::Number(NumberRules {
            integer: name == "integer",
            minimum: f64_keyword(obj, "minimum")?,
            maximum: f64_keyword(obj, "maximum")?,
            exclusive_minimum: f64_keyword(obj, "exclusiveMinimum")?,
            exclusive_maximum: f64_keyword(obj, "exclusiveMaximum")?,
        }),
        "boolean" => Kind::Boolean,
        "null" => Kind::Null,
        "array" => Kind::Array {
            items: obj
                .get("items")
                .map(compile_node)
                .transpose()?
                .map(Box::new),
            min_items: u64_keyword(obj, "minItems")?,
            max_items: u64_keyword(obj, "maxItems")?,
        },
        "object" => compile_object(obj)?,
        other => return Err(Error::Schema(format!("unsupported type '{other}'"))),
    })
}

fn compile_object(obj: &Map<String, Value>) -> Result<Kind> {
    let properties = match obj.get("properties") {
        None => Vec::new(),
        Some(Value::Object(props)) => props
            .iter()
            .map(|(name, schema)| {
                compile_node(schema)
                    .map(|s| (name.clone(), s))
                    .map_err(|e| Error::Schema(format!("property '{name}': {e}")))
            })
            .collect::<Result<_>>()?,
        Some(_) => return Err(Error::Schema("'properties' must be an object".to_string())),
    };

    let required = match obj.get("required") {
        None => Vec::new(),
        Some(Value::Array(names)) => names
            .iter()
            .map(|n| {
                n.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| Error::Schema("'required' entries must be strings".to_string()))
            })
            .collect::<Result<_>>()?,
        Some(_) => return Err(Error::Schema("'required' must be an array".to_string())),
    };

    let additional = match obj.get("additionalProperties") {
        None => Additional::Strip,
        Some(Value::Bool(true)) => Additional::Allow,
        Some(Value::Bool(false)) => Additional::Deny,
        Some(schema) => Additional::Schema(Box::new(compile_node(schema)?)),
    };

    Ok(Kind::Object {
        properties,
        required,
        additional,
    })
}

fn u64_keyword(obj: &Map<String, Value>, key: &str) -> Result<Option<u64>> {
    obj.get(key)
        .map(|v| {
            v.as_u64()
                .ok_or_else(|| Error::Schema(format!("'{key}' must be a non-negative integer")))
        })
        .transpose()
}

fn f64_keyword(obj: &Map<String, Value>, key: &str) -> Result<Option<f64>> {
    obj.get(key)
        .map(|v| {
            v.as_f64()
                .ok_or_else(|| Error::Schema(format!("'{key}' must be a number")))
        })
        .transpose()
}

// ── Validation ────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Walk {
    path: Vec<String>,
    issues: Vec<ValidationIssue>,
}

impl Walk {
    fn issue(&mut self, code: IssueCode, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            path: self.path.clone(),
            code,
            message: message.into(),
        });
    }

    fn invalid_type(&mut self, expected: &str, received: &Value) {
        self.issue(
            IssueCode::InvalidType,
            format!("Expected {expected}, received {}", json_type_name(received)),
        );
    }

    fn at<T>(&mut self, segment: impl Into<String>, f: impl FnOnce(&mut Self) -> T) -> T {
        self.path.push(segment.into());
        let out = f(self);
        self.path.pop();
        out
    }
}

impl Schema {
    fn validate(&self, value: &Value, walk: &mut Walk) -> Value {
        match &self.kind {
            Kind::Any => value.clone(),
            Kind::Null => {
                if !value.is_null() {
                    walk.invalid_type("null", value);
                }
                value.clone()
            }
            Kind::String { min_len, max_len } => validate_string(value, *min_len, *max_len, walk),
            Kind::Number(rules) => validate_number(value, rules, walk),
            Kind::Boolean => match coerce_boolean(value) {
                Some(b) => Value::Bool(b),
                None => {
                    walk.invalid_type("boolean", value);
                    value.clone()
                }
            },
            Kind::Array {
                items,
                min_items,
                max_items,
            } => validate_array(value, items.as_deref(), *min_items, *max_items, walk),
            Kind::Object {
                properties,
                required,
                additional,
            } => validate_object(value, properties, required, additional, walk),
            Kind::Enum(values) => {
                if !values.contains(value) {
                    let expected = values
                        .iter()
                        .map(display_literal)
                        .collect::<Vec<_>>()
                        .join(" | ");
                    walk.issue(
                        IssueCode::InvalidEnumValue,
                        format!(
                            "Invalid enum value. Expected {expected}, received {}",
                            display_literal(value)
                        ),
                    );
                }
                value.clone()
            }
            Kind::Union(variants) => {
                for variant in variants {
                    let mut attempt = Walk {
                        path: walk.path.clone(),
                        issues: Vec::new(),
                    };
                    let out = variant.validate(value, &mut attempt);
                    if attempt.issues.is_empty() {
                        return out;
                    }
                }
                walk.issue(IssueCode::InvalidUnion, "Invalid input");
                value.clone()
            }
            Kind::Nullable(inner) => {
                if value.is_null() {
                    Value::Null
                } else {
                    inner.validate(value, walk)
                }
            }
            Kind::AllOf(parts) => parts
                .iter()
                .fold(value.clone(), |current, part| part.validate(&current, walk)),
        }
    }
}

fn validate_string(
    value: &Value,
    min_len: Option<u64>,
    max_len: Option<u64>,
    walk: &mut Walk,
) -> Value {
    let s = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => {
            walk.invalid_type("string", value);
            return value.clone();
        }
    };
    let len = s.chars().count() as u64;
    if let Some(min) = min_len.filter(|min| len < *min) {
        walk.issue(
            IssueCode::TooSmall,
            format!("String must contain at least {min} character(s)"),
        );
    }
    if let Some(max) = max_len.filter(|max| len > *max) {
        walk.issue(
            IssueCode::TooBig,
            format!("String must contain at most {max} character(s)"),
        );
    }
    Value::String(s)
}

fn validate_number(value: &Value, rules: &NumberRules, walk: &mut Walk) -> Value {
    let expected = if rules.integer { "integer" } else { "number" };
    let number = match value {
        Value::Number(n) => n.clone(),
        Value::String(s) => match s.trim().parse::<f64>().ok().and_then(number_from_f64) {
            Some(n) => n,
            None => {
                walk.invalid_type(expected, value);
                return value.clone();
            }
        },
        _ => {
            walk.invalid_type(expected, value);
            return value.clone();
        }
    };

    let number = if rules.integer && !(number.is_i64() || number.is_u64()) {
        match number.as_f64().and_then(integral_number) {
            Some(n) => n,
            None => {
                walk.issue(IssueCode::InvalidType, "Expected integer, received float");
                return Value::Number(number);
            }
        }
    } else {
        number
    };

    if let Some(x) = number.as_f64() {
        if let Some(min) = rules.minimum.filter(|min| x < *min) {
            walk.issue(
                IssueCode::TooSmall,
                format!("Number must be greater than or equal to {min}"),
            );
        }
        if let Some(min) = rules.exclusive_minimum.filter(|min| x <= *min) {
            walk.issue(
                IssueCode::TooSmall,
                format!("Number must be greater than {min}"),
            );
        }
        if let Some(max) = rules.maximum.filter(|max| x > *max) {
            walk.issue(
                IssueCode::TooBig,
                format!("Number must be less than or equal to {max}"),
            );
        }
        if let Some(max) = rules.exclusive_maximum.filter(|max| x >= *max) {
            walk.issue(IssueCode::TooBig, format!("Number must be less than {max}"));
        }
    }
    Value::Number(number)
}

fn validate_array(
    value: &Value,
    items: Option<&Schema>,
    min_items: Option<u64>,
    max_items: Option<u64>,
    walk: &mut Walk,
) -> Value {
    let Value::Array(elements) = value else {
        walk.invalid_type("array", value);
        return value.clone();
    };
    let out: Vec<Value> = match items {
        Some(item_schema) => elements
            .iter()
            .enumerate()
            .map(|(i, element)| walk.at(i.to_string(), |w| item_schema.validate(element, w)))
            .collect(),
        None => elements.clone(),
    };
    let len = out.len() as u64;
    if let Some(min) = min_items.filter(|min| len < *min) {
        walk.issue(
            IssueCode::TooSmall,
            format!("Array must contain at least {min} element(s)"),
        );
    }
    if let Some(max) = max_items.filter(|max| len > *max) {
        walk.issue(
            IssueCode::TooBig,
            format!("Array must contain at most {max} element(s)"),
        );
    }
    Value::Array(out)
}

fn validate_object(
    value: &Value,
    properties: &[(String, Schema)],
    required: &[String],
    additional: &Additional,
    walk: &mut Walk,
) -> Value {
    let Value::Object(input) = value else {
        walk.invalid_type("object", value);
        return value.clone();
    };

    let mut out = Map::new();
    for (name, prop) in properties {
        let is_required = required.iter().any(|r| r == name);
        match input.get(name) {
            // An optional, non-nullable field sent as null counts as omitted
            Some(Value::Null) if !is_required && !prop.accepts_null() => {
                if let Some(default) = prop.default_value() {
                    out.insert(name.clone(), default.clone());
                }
            }
            Some(v) => {
                let normalized = walk.at(name.as_str(), |w| prop.validate(v, w));
                out.insert(name.clone(), normalized);
            }
            None => match prop.default_value() {
                Some(default) => {
                    out.insert(name.clone(), default.clone());
                }
                None if is_required => {
                    walk.at(name.as_str(), |w| w.issue(IssueCode::InvalidType, "Required"));
                }
                None => {}
            },
        }
    }

    let declared = |key: &str| properties.iter().any(|(name, _)| name == key);

    // Required names that are not declared as properties still have to be present
    for name in required.iter().filter(|r| !declared(r)) {
        match input.get(name) {
            Some(v) => {
                out.insert(name.clone(), v.clone());
            }
            None => walk.at(name.as_str(), |w| w.issue(IssueCode::InvalidType, "Required")),
        }
    }

    let unknown: Vec<&String> = input
        .keys()
        .filter(|k| !declared(k) && !required.contains(k))
        .collect();
    match additional {
        Additional::Strip => {}
        Additional::Allow => {
            for key in unknown {
                out.insert(key.clone(), input[key].clone());
            }
        }
        Additional::Deny => {
            if !unknown.is_empty() {
                let keys = unknown
                    .iter()
                    .map(|k| format!("'{k}'"))
                    .collect::<Vec<_>>()
                    .join(", ");
                walk.issue(
                    IssueCode::UnrecognizedKeys,
                    format!("Unrecognized key(s) in object: {keys}"),
                );
            }
        }
        Additional::Schema(schema) => {
            for key in unknown {
                let normalized = walk.at(key.as_str(), |w| schema.validate(&input[key], w));
                out.insert(key.clone(), normalized);
            }
        }
    }

    Value::Object(out)
}

// ── Public entry point ────────────────────────────────────────────────────────

/// A validator compiled from one tool's input schema
#[derive(Debug, Clone)]
pub struct CompiledSchema {
    root: Option<Schema>,
}

impl CompiledSchema {
    /// Compile a JSON Schema fragment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Schema`] when the fragment uses an unsupported `type`
    /// or a keyword with the wrong shape.
    pub fn compile(schema: &Value) -> Result<Self> {
        compile_node(schema).map(|root| Self { root: Some(root) })
    }

    /// A validator that accepts any object unchanged
    #[must_use]
    pub fn permissive() -> Self {
        Self { root: None }
    }

    /// Compile `schema`, degrading to [`CompiledSchema::permissive`] (with a
    /// warning) when it cannot be compiled.
    #[must_use]
    pub fn compile_or_permissive(tool: &str, schema: &Value) -> Self {
        match Self::compile(schema) {
            Ok(compiled) => compiled,
            Err(e) => {
                warn!(tool = %tool, error = %e, "Input schema not compiled, accepting any arguments");
                Self::permissive()
            }
        }
    }

    /// Whether this is the pass-through validator
    #[must_use]
    pub fn is_permissive(&self) -> bool {
        self.root.is_none()
    }

    /// Validate raw caller arguments.
    ///
    /// Anything other than a JSON object is treated as an empty object.
    pub fn validate(&self, raw: &Value) -> std::result::Result<ValidatedArguments, ValidationError> {
        let input = match raw {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        let Some(root) = &self.root else {
            return Ok(input);
        };

        let mut walk = Walk::default();
        let out = root.validate(&Value::Object(input), &mut walk);
        if !walk.issues.is_empty() {
            return Err(ValidationError {
                issues: walk.issues,
            });
        }
        Ok(match out {
            Value::Object(map) => map,
            _ => Map::new(),
        })
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn coerce_boolean(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        Value::Number(n) => match n.as_i64() {
            Some(1) => Some(true),
            Some(0) => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn number_from_f64(f: f64) -> Option<Number> {
    integral_number(f).or_else(|| Number::from_f64(f))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn integral_number(f: f64) -> Option<Number> {
    if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Some(Number::from(f as i64))
    } else {
        None
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn display_literal(value: &Value) -> String {
    match value {
        Value::String(s) => format!("'{s}'"),
        other => other.to_string(),
    }
}
