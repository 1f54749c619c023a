//! Request parameter validation against an endpoint's declared
//! [`Parameter`] list: defaulting, required-ness, typed constraints, and
//! the `prevent_sql_injection` guard for raw-inserted template variables.

use std::collections::HashMap;
use std::sync::OnceLock;

use chrono::NaiveDate;
use chrono::NaiveTime;
use regex::Regex;

use crate::config::model::{Parameter, ValidatorKind, ValidatorSpec};
use crate::errors::{GatewayError, Result};

const SUSPICIOUS_SUBSTRINGS: &[&str] = &["--", "/*", "*/", ";"];
const SUSPICIOUS_KEYWORDS: &[&str] = &["UNION", "DROP", "INSERT", "UPDATE", "DELETE", "EXEC"];

fn keyword_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        let alternation = SUSPICIOUS_KEYWORDS.join("|");
        Regex::new(&format!(r"(?i)\b(?:{alternation})\b")).expect("static pattern is valid")
    })
}

/// Validates and normalises a raw request parameter map against an
/// endpoint's [`Parameter`] declarations, applying defaults and
/// collecting every violation before returning (all
/// violations are collected, not just the first").
pub fn validate_parameters(
    declared: &[Parameter],
    raw: &HashMap<String, String>,
) -> Result<HashMap<String, String>> {
    let mut resolved = HashMap::new();
    let mut violations = HashMap::new();

    for param in declared {
        let value = match raw.get(&param.name) {
            Some(v) => Some(v.clone()),
            None => param.default.clone(),
        };

        let value = match value {
            Some(v) => v,
            None => {
                if param.required {
                    violations.insert(param.name.clone(), "required parameter is missing".to_string());
                }
                continue;
            }
        };

        if let Err(reason) = validate_one(&value, &param.validators) {
            violations.insert(param.name.clone(), reason);
            continue;
        }

        resolved.insert(param.name.clone(), value);
    }

    if !violations.is_empty() {
        return Err(GatewayError::InvalidInput { details: violations });
    }

    Ok(resolved)
}

fn validate_one(value: &str, validators: &[ValidatorSpec]) -> std::result::Result<(), String> {
    for validator in validators {
        validate_against_spec(value, validator)?;
    }
    Ok(())
}

fn validate_against_spec(value: &str, spec: &ValidatorSpec) -> std::result::Result<(), String> {
    if spec.prevent_sql_injection {
        if SUSPICIOUS_SUBSTRINGS.iter().any(|needle| value.contains(needle)) {
            return Err("value contains disallowed characters".to_string());
        }
        if keyword_pattern().is_match(value) {
            return Err("value contains a disallowed SQL keyword".to_string());
        }
    }

    match spec.kind {
        Some(ValidatorKind::Int) => {
            let parsed: i64 = value.parse().map_err(|_| "expected an integer".to_string())?;
            if let Some(min) = spec.min {
                if parsed < min {
                    return Err(format!("value {parsed} is below minimum {min}"));
                }
            }
            if let Some(max) = spec.max {
                if parsed > max {
                    return Err(format!("value {parsed} is above maximum {max}"));
                }
            }
        }
        Some(ValidatorKind::String) => {
            let length = value.chars().count();
            if let Some(min_length) = spec.min_length {
                if length < min_length {
                    return Err(format!("value shorter than minimum length {min_length}"));
                }
            }
            if let Some(max_length) = spec.max_length {
                if length > max_length {
                    return Err(format!("value longer than maximum length {max_length}"));
                }
            }
            if let Some(pattern) = &spec.regex {
                let re = regex::Regex::new(pattern).map_err(|e| e.to_string())?;
                if !re.is_match(value) {
                    return Err(format!("value does not match pattern {pattern}"));
                }
            }
        }
        Some(ValidatorKind::Email) => {
            if !looks_like_email(value) {
                return Err("value is not a well-formed email address".to_string());
            }
        }
        Some(ValidatorKind::Uuid) => {
            uuid::Uuid::parse_str(value).map_err(|_| "value is not a well-formed UUID".to_string())?;
        }
        Some(ValidatorKind::Enum) => {
            if !spec.allowed_values.iter().any(|allowed| allowed == value) {
                return Err(format!(
                    "value must be one of: {}",
                    spec.allowed_values.join(", ")
                ));
            }
        }
        Some(ValidatorKind::Date) => {
            let parsed = NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .map_err(|_| "value is not a well-formed date (YYYY-MM-DD)".to_string())?;
            if let Some(min_str) = &spec.min_str {
                let min = NaiveDate::parse_from_str(min_str, "%Y-%m-%d").map_err(|e| e.to_string())?;
                if parsed < min {
                    return Err(format!("date {value} is before minimum {min_str}"));
                }
            }
            if let Some(max_str) = &spec.max_str {
                let max = NaiveDate::parse_from_str(max_str, "%Y-%m-%d").map_err(|e| e.to_string())?;
                if parsed > max {
                    return Err(format!("date {value} is after maximum {max_str}"));
                }
            }
        }
        Some(ValidatorKind::Time) => {
            let parsed = NaiveTime::parse_from_str(value, "%H:%M:%S")
                .map_err(|_| "value is not a well-formed time (HH:MM:SS)".to_string())?;
            if let Some(min_str) = &spec.min_str {
                let min = NaiveTime::parse_from_str(min_str, "%H:%M:%S").map_err(|e| e.to_string())?;
                if parsed < min {
                    return Err(format!("time {value} is before minimum {min_str}"));
                }
            }
            if let Some(max_str) = &spec.max_str {
                let max = NaiveTime::parse_from_str(max_str, "%H:%M:%S").map_err(|e| e.to_string())?;
                if parsed > max {
                    return Err(format!("time {value} is after maximum {max_str}"));
                }
            }
        }
        None => {}
    }

    Ok(())
}

fn looks_like_email(value: &str) -> bool {
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
}
