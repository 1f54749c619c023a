//! Black-box tests of [`validate_parameters`] against a realistic,
//! multi-parameter endpoint declaration: required/optional mixes,
//! typed constraints, and the injection guard, all validated together
//! rather than one validator in isolation.

use std::collections::HashMap;

use sqlgate::config::model::{ParamLocation, Parameter, ValidatorKind, ValidatorSpec};
use sqlgate::errors::GatewayError;
use sqlgate::validator::validate_parameters;

fn int_param(name: &str, required: bool, min: Option<i64>, max: Option<i64>) -> Parameter {
    Parameter {
        name: name.to_string(),
        location: ParamLocation::Query,
        required,
        default: None,
        validators: vec![ValidatorSpec { kind: Some(ValidatorKind::Int), min, max, ..Default::default() }],
    }
}

fn string_param(name: &str, min_length: Option<usize>, max_length: Option<usize>) -> Parameter {
    Parameter {
        name: name.to_string(),
        location: ParamLocation::Query,
        required: true,
        default: None,
        validators: vec![ValidatorSpec {
            kind: Some(ValidatorKind::String),
            min_length,
            max_length,
            ..Default::default()
        }],
    }
}

#[test]
fn a_full_request_with_mixed_types_resolves_every_field() {
    let params = vec![
        int_param("age", true, Some(0), Some(130)),
        string_param("name", Some(1), Some(50)),
        Parameter {
            name: "role".to_string(),
            location: ParamLocation::Query,
            required: false,
            default: Some("member".to_string()),
            validators: vec![ValidatorSpec {
                kind: Some(ValidatorKind::Enum),
                allowed_values: vec!["member".into(), "admin".into()],
                ..Default::default()
            }],
        },
    ];
    let mut raw = HashMap::new();
    raw.insert("age".to_string(), "29".to_string());
    raw.insert("name".to_string(), "Grace Hopper".to_string());

    let resolved = validate_parameters(&params, &raw).unwrap();
    assert_eq!(resolved.get("age"), Some(&"29".to_string()));
    assert_eq!(resolved.get("name"), Some(&"Grace Hopper".to_string()));
    assert_eq!(resolved.get("role"), Some(&"member".to_string()));
}

#[test]
fn every_violation_across_multiple_parameters_is_collected_at_once() {
    let params = vec![int_param("age", true, Some(0), Some(130)), string_param("name", Some(3), None)];
    let mut raw = HashMap::new();
    raw.insert("age".to_string(), "not-a-number".to_string());
    raw.insert("name".to_string(), "ab".to_string());

    let err = validate_parameters(&params, &raw).unwrap_err();
    let GatewayError::InvalidInput { details } = err else { panic!("expected InvalidInput") };
    assert!(details.contains_key("age"));
    assert!(details.contains_key("name"));
}

#[test]
fn missing_required_parameter_with_no_default_is_rejected() {
    let params = vec![int_param("age", true, None, None)];
    let err = validate_parameters(&params, &HashMap::new()).unwrap_err();
    assert!(matches!(err, GatewayError::InvalidInput { .. }));
}

#[test]
fn sql_injection_guard_rejects_a_comment_terminator_even_when_otherwise_valid() {
    let params = vec![Parameter {
        name: "name".to_string(),
        location: ParamLocation::Query,
        required: true,
        default: None,
        validators: vec![ValidatorSpec { prevent_sql_injection: true, ..Default::default() }],
    }];
    let mut raw = HashMap::new();
    raw.insert("name".to_string(), "robert'); DROP TABLE students;--".to_string());
    let err = validate_parameters(&params, &raw).unwrap_err();
    assert!(matches!(err, GatewayError::InvalidInput { .. }));
}

#[test]
fn injection_guard_can_be_disabled_per_validator() {
    let params = vec![Parameter {
        name: "raw_fragment".to_string(),
        location: ParamLocation::Query,
        required: true,
        default: None,
        validators: vec![ValidatorSpec { prevent_sql_injection: false, ..Default::default() }],
    }];
    let mut raw = HashMap::new();
    raw.insert("raw_fragment".to_string(), "UNION SELECT * FROM secrets".to_string());
    let resolved = validate_parameters(&params, &raw).unwrap();
    assert_eq!(resolved.get("raw_fragment"), Some(&"UNION SELECT * FROM secrets".to_string()));
}

#[test]
fn string_length_bounds_are_counted_in_unicode_code_points() {
    let params = vec![string_param("name", Some(5), Some(5))];
    let mut raw = HashMap::new();
    raw.insert("name".to_string(), "héllo".to_string());
    let resolved = validate_parameters(&params, &raw).unwrap();
    assert_eq!(resolved.get("name"), Some(&"héllo".to_string()));
}

#[test]
fn uuid_validator_rejects_malformed_input() {
    let params = vec![Parameter {
        name: "id".to_string(),
        location: ParamLocation::Path,
        required: true,
        default: None,
        validators: vec![ValidatorSpec { kind: Some(ValidatorKind::Uuid), ..Default::default() }],
    }];
    let mut raw = HashMap::new();
    raw.insert("id".to_string(), "not-a-uuid".to_string());
    assert!(validate_parameters(&params, &raw).is_err());
}
