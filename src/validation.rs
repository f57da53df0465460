//! Field validation and cleaning for website form records
//!
//! This is the gate every inbound record passes through before anything is
//! sent to Dynamics. The algorithm runs in two passes:
//!
//! 1. **Required-field pass** — every missing/empty required field is
//!    collected and, if any exist, validation fails immediately with only
//!    those violations. Missing required data is never partially cleaned,
//!    and per-field rules do not run on such a record.
//! 2. **Per-field pass** — every provided key is cleaned: `null` values and
//!    empty strings are dropped, strings are trimmed, and any field with a
//!    rule is checked against it. All rule violations on the record are
//!    collected before failing, so callers see every problem at once.
//!
//! Rules are a typed table ([`FieldRule`]) rather than ad hoc runtime type
//! branching; the dispatch lives in one place per JSON type.

use crate::error::{GatewayError, GatewayResult};
use crate::models::Record;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern is valid")
});

static PHONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[+]?[1-9]\d{0,15}$").expect("phone pattern is valid"));

/// A single validation failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    /// Field name (including an index suffix for array elements)
    pub field: String,
    /// Rule identifier that failed
    pub rule: &'static str,
    /// Human-readable description, rendered at logging/response boundaries
    pub message: String,
}

impl Violation {
    fn new<S1: Into<String>, S2: Into<String>>(field: S1, rule: &'static str, message: S2) -> Self {
        Self {
            field: field.into(),
            rule,
            message: message.into(),
        }
    }
}

/// Per-field validation rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRule {
    /// String field with an optional maximum length (in characters)
    Text { max_length: Option<usize> },
    /// String field that must look like an email address
    Email,
    /// String field that must be a phone number after separator stripping
    Phone,
    /// String field that must parse as a date
    Date,
    /// Array of strings, or a single free-text string
    TextArray,
    /// Numeric field
    Number,
}

impl FieldRule {
    /// Rule identifier used in violations
    fn name(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Email => "email",
            Self::Phone => "phone",
            Self::Date => "date",
            Self::TextArray => "array_of_string",
            Self::Number => "number",
        }
    }

    /// The JSON type this rule expects, for mismatch messages
    fn expected_type(&self) -> &'static str {
        match self {
            Self::Number => "number",
            Self::TextArray => "array or string",
            _ => "string",
        }
    }
}

/// Rule table keyed by field name
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: HashMap<&'static str, FieldRule>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: &'static str, rule: FieldRule) -> Self {
        self.rules.insert(field, rule);
        self
    }

    pub fn get(&self, field: &str) -> Option<&FieldRule> {
        self.rules.get(field)
    }
}

/// Rule table shared by contact capture, lead capture, and contact update
pub static FORM_RULES: Lazy<RuleSet> = Lazy::new(|| {
    RuleSet::new()
        .with("firstName", FieldRule::Text { max_length: Some(64) })
        .with("lastName", FieldRule::Text { max_length: Some(64) })
        .with("email", FieldRule::Email)
        .with("phone", FieldRule::Phone)
        .with("jobTitle", FieldRule::Text { max_length: Some(128) })
        .with("city", FieldRule::Text { max_length: Some(128) })
        .with("country", FieldRule::Text { max_length: Some(128) })
        .with("company", FieldRule::Text { max_length: Some(128) })
        .with("interests", FieldRule::TextArray)
        .with("signupSource", FieldRule::Text { max_length: Some(128) })
        .with("websiteSignupDate", FieldRule::Date)
        .with("password", FieldRule::Text { max_length: Some(128) })
});

/// Required fields for contact and lead creation
pub const SIGNUP_REQUIRED: &[&str] = &["firstName", "lastName", "email"];

/// Cleaning policy knobs
#[derive(Debug, Clone)]
pub struct ValidationOptions {
    /// Pass plain-object values through to the clean record unmodified.
    /// When disabled, an object-valued field is a violation instead.
    pub object_passthrough: bool,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            object_passthrough: true,
        }
    }
}

/// Check a string against the email pattern
pub fn is_valid_email(value: &str) -> bool {
    EMAIL_RE.is_match(value)
}

/// Check a string against the phone pattern after stripping spaces,
/// hyphens, and parentheses
pub fn is_valid_phone(value: &str) -> bool {
    let stripped: String = value
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')'))
        .collect();
    PHONE_RE.is_match(&stripped)
}

/// Check that a string parses as a date (RFC 3339, RFC 2822, or plain
/// `YYYY-MM-DD` / `YYYY-MM-DDTHH:MM:SS`)
pub fn is_valid_date(value: &str) -> bool {
    DateTime::parse_from_rfc3339(value).is_ok()
        || DateTime::parse_from_rfc2822(value).is_ok()
        || NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok()
        || NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S").is_ok()
}

/// Validate and clean a raw record.
///
/// Returns the cleaned record, or a [`GatewayError::Validation`] listing
/// every violation found. See the module docs for the two-pass algorithm.
pub fn validate_and_clean(
    record: &Record,
    required: &[&str],
    rules: &RuleSet,
    options: &ValidationOptions,
) -> GatewayResult<Record> {
    let provided_fields: Vec<String> = record.keys().cloned().collect();

    // Pass 1: required fields, fail fast with all missing-field violations
    let mut violations: Vec<Violation> = Vec::new();
    for name in required {
        let missing = match record.get(*name) {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.trim().is_empty(),
            Some(_) => false,
        };
        if missing {
            violations.push(Violation::new(
                *name,
                "required",
                format!("Missing required field: {}", name),
            ));
        }
    }
    if !violations.is_empty() {
        return Err(GatewayError::validation(violations, provided_fields));
    }

    // Pass 2: clean every provided key, collecting all rule violations
    let mut clean = Record::new();
    for (key, value) in record {
        match value {
            Value::Null => {}
            Value::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match rules.get(key) {
                    Some(rule) => match check_string(key, rule, trimmed) {
                        Ok(cleaned) => {
                            clean.insert(key.clone(), Value::String(cleaned));
                        }
                        Err(violation) => violations.push(violation),
                    },
                    None => {
                        clean.insert(key.clone(), Value::String(trimmed.to_string()));
                    }
                }
            }
            Value::Number(_) => match rules.get(key) {
                None | Some(FieldRule::Number) => {
                    clean.insert(key.clone(), value.clone());
                }
                Some(rule) => violations.push(type_mismatch(key, rule, "number")),
            },
            Value::Bool(_) => match rules.get(key) {
                None => {
                    clean.insert(key.clone(), value.clone());
                }
                Some(rule) => violations.push(type_mismatch(key, rule, "boolean")),
            },
            Value::Array(items) => match rules.get(key) {
                None | Some(FieldRule::TextArray) => {
                    let mut all_strings = true;
                    for (index, item) in items.iter().enumerate() {
                        if !item.is_string() {
                            all_strings = false;
                            violations.push(Violation::new(
                                format!("{}[{}]", key, index),
                                "array_of_string",
                                format!("{}[{}] must be a string", key, index),
                            ));
                        }
                    }
                    if all_strings {
                        clean.insert(key.clone(), value.clone());
                    }
                }
                Some(rule) => violations.push(type_mismatch(key, rule, "array")),
            },
            Value::Object(_) => {
                if options.object_passthrough {
                    clean.insert(key.clone(), value.clone());
                } else {
                    violations.push(Violation::new(
                        key,
                        "object",
                        format!("{} must not be an object", key),
                    ));
                }
            }
        }
    }

    if !violations.is_empty() {
        return Err(GatewayError::validation(violations, provided_fields));
    }

    Ok(clean)
}

fn type_mismatch(field: &str, rule: &FieldRule, actual: &str) -> Violation {
    Violation::new(
        field,
        rule.name(),
        format!("{} must be a {}, got {}", field, rule.expected_type(), actual),
    )
}

fn check_string(field: &str, rule: &FieldRule, trimmed: &str) -> Result<String, Violation> {
    match rule {
        FieldRule::Text { max_length } => {
            if let Some(max) = max_length {
                if trimmed.chars().count() > *max {
                    return Err(Violation::new(
                        field,
                        "text",
                        format!("{} must be at most {} characters", field, max),
                    ));
                }
            }
            Ok(trimmed.to_string())
        }
        FieldRule::Email => {
            if is_valid_email(trimmed) {
                Ok(trimmed.to_string())
            } else {
                Err(Violation::new(
                    field,
                    "email",
                    format!("{} is not a valid email address", field),
                ))
            }
        }
        FieldRule::Phone => {
            if is_valid_phone(trimmed) {
                Ok(trimmed.to_string())
            } else {
                Err(Violation::new(
                    field,
                    "phone",
                    format!("{} is not a valid phone number", field),
                ))
            }
        }
        FieldRule::Date => {
            if is_valid_date(trimmed) {
                Ok(trimmed.to_string())
            } else {
                Err(Violation::new(
                    field,
                    "date",
                    format!("{} is not a valid date", field),
                ))
            }
        }
        // A single free-text string is an accepted interests shape
        FieldRule::TextArray => Ok(trimmed.to_string()),
        FieldRule::Number => Err(type_mismatch(field, rule, "string")),
    }
}
