// ✅ Constraint Validator - type-specific rule checks
// Shared by the schema registry (field definitions) and the transformation
// engine (values produced for a target field).

use crate::engine::TypedValue;
use crate::error::{ErrorCode, FieldError, TransformErrorKind, TransformationError};
use crate::schema::{EnumConstraints, Field, FieldType, NumericConstraints, StringConstraints};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock, RwLock};

// ============================================================================
// FIELD DEFINITION RULES
// ============================================================================

/// Check one field definition. Never fails; an empty list means valid.
pub fn validate(field: &Field) -> Vec<FieldError> {
    match &field.kind {
        FieldType::String(c) => validate_string(&field.name, c),
        FieldType::Integer(c) | FieldType::Decimal(c) => validate_numeric(&field.name, c),
        FieldType::Enum(c) => validate_enum(&field.name, c),
        FieldType::Date(_) | FieldType::Boolean => Vec::new(),
    }
}

fn validate_string(name: &str, c: &StringConstraints) -> Vec<FieldError> {
    let mut errors = Vec::new();

    for (label, bound) in [("min_length", c.min_length), ("max_length", c.max_length)] {
        if let Some(n) = bound {
            if n < 0 {
                errors.push(FieldError::new(
                    name,
                    ErrorCode::NegativeLength,
                    format!("{} must be >= 0, got {}", label, n),
                ));
            }
        }
    }

    if let (Some(min), Some(max)) = (c.min_length, c.max_length) {
        if min > max {
            errors.push(FieldError::new(
                name,
                ErrorCode::MinGtMax,
                format!("min_length {} is greater than max_length {}", min, max),
            ));
        }
    }

    if let Some(pattern) = &c.format {
        if let Err(e) = Regex::new(pattern) {
            errors.push(FieldError::new(
                name,
                ErrorCode::InvalidRegex,
                format!("format '{}' is not a valid regular expression: {}", pattern, e),
            ));
        }
    }

    errors
}

fn validate_numeric(name: &str, c: &NumericConstraints) -> Vec<FieldError> {
    match (c.min_value, c.max_value) {
        (Some(min), Some(max)) if min > max => vec![FieldError::new(
            name,
            ErrorCode::MinGtMax,
            format!("min_value {} is greater than max_value {}", min, max),
        )],
        _ => Vec::new(),
    }
}

fn validate_enum(name: &str, c: &EnumConstraints) -> Vec<FieldError> {
    if c.values.is_empty() {
        return vec![FieldError::new(
            name,
            ErrorCode::EmptyEnum,
            "enum field must declare at least one value",
        )];
    }

    let mut seen = HashSet::new();
    let mut errors = Vec::new();
    for value in &c.values {
        if !seen.insert(value.as_str()) {
            errors.push(FieldError::new(
                name,
                ErrorCode::DuplicateEnumValue,
                format!("enum value '{}' is declared more than once", value),
            ));
        }
    }
    errors
}

/// Check a whole field set: every field's constraints plus unique, non-empty names.
pub fn validate_field_set(fields: &[Field]) -> Vec<FieldError> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();

    for field in fields {
        if field.name.trim().is_empty() {
            errors.push(FieldError::new(
                field.name.as_str(),
                ErrorCode::EmptyFieldName,
                "field name must not be empty",
            ));
        } else if !seen.insert(field.name.as_str()) {
            errors.push(FieldError::new(
                field.name.as_str(),
                ErrorCode::DuplicateField,
                format!("field '{}' is declared more than once", field.name),
            ));
        }
        errors.extend(validate(field));
    }

    errors
}

// ============================================================================
// VALUE RULES
// ============================================================================

/// Check a coerced value against the target field's constraints
pub fn check_value(field: &Field, value: &TypedValue) -> Result<(), TransformationError> {
    let violation = |message: String| {
        Err(TransformationError::new(
            TransformErrorKind::ConstraintViolation,
            format!("{}: {}", field.name, message),
        ))
    };

    match (&field.kind, value) {
        (FieldType::String(c), TypedValue::String(s)) => {
            let len = s.chars().count() as i64;
            if let Some(min) = c.min_length {
                if len < min {
                    return violation(format!("length {} is below min_length {}", len, min));
                }
            }
            if let Some(max) = c.max_length {
                if len > max {
                    return violation(format!("length {} exceeds max_length {}", len, max));
                }
            }
            if let Some(pattern) = &c.format {
                match matches_whole(pattern, s) {
                    Some(true) => {}
                    Some(false) => {
                        return violation(format!("'{}' does not match format '{}'", s, pattern))
                    }
                    None => {
                        return violation(format!("format '{}' is not a valid regular expression", pattern))
                    }
                }
            }
            Ok(())
        }
        (FieldType::Integer(c), TypedValue::Integer(n)) => check_bounds(c, *n as f64, violation),
        (FieldType::Decimal(c), TypedValue::Decimal(n)) => check_bounds(c, *n, violation),
        (FieldType::Enum(c), TypedValue::Enum(s)) => {
            if c.values.iter().any(|v| v == s) {
                Ok(())
            } else {
                violation(format!(
                    "'{}' is not one of [{}]",
                    s,
                    c.values.join(", ")
                ))
            }
        }
        _ => Ok(()),
    }
}

/// A `format` pattern compiled once per distinct pattern text
struct FormatPattern {
    raw: Regex,
    /// `^(?:pattern)$`; absent when wrapping breaks the pattern (e.g. a trailing `(?x)` comment)
    anchored: Option<Regex>,
}

impl FormatPattern {
    fn compile(pattern: &str) -> Option<Self> {
        let raw = Regex::new(pattern).ok()?;
        let anchored = Regex::new(&format!("^(?:{})$", pattern)).ok();
        Some(FormatPattern { raw, anchored })
    }

    fn matches_whole(&self, value: &str) -> bool {
        match &self.anchored {
            Some(re) => re.is_match(value),
            None => self
                .raw
                .find(value)
                .is_some_and(|m| m.start() == 0 && m.end() == value.len()),
        }
    }
}

fn format_cache() -> &'static RwLock<HashMap<String, Arc<FormatPattern>>> {
    static CACHE: OnceLock<RwLock<HashMap<String, Arc<FormatPattern>>>> = OnceLock::new();
    CACHE.get_or_init(|| RwLock::new(HashMap::new()))
}

/// None when `pattern` does not compile
fn matches_whole(pattern: &str, value: &str) -> Option<bool> {
    let cached = format_cache()
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .get(pattern)
        .cloned();

    let compiled = match cached {
        Some(p) => p,
        None => {
            let p = Arc::new(FormatPattern::compile(pattern)?);
            format_cache()
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .insert(pattern.to_string(), p.clone());
            p
        }
    };
    Some(compiled.matches_whole(value))
}

fn check_bounds<F>(c: &NumericConstraints, n: f64, violation: F) -> Result<(), TransformationError>
where
    F: Fn(String) -> Result<(), TransformationError>,
{
    if let Some(min) = c.min_value {
        if n < min {
            return violation(format!("{} is below min_value {}", n, min));
        }
    }
    if let Some(max) = c.max_value {
        if n > max {
            return violation(format!("{} exceeds max_value {}", n, max));
        }
    }
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DateFormat, FieldType};

    fn string_field(min: Option<i64>, max: Option<i64>, format: Option<&str>) -> Field {
        Field::new(
            "code",
            FieldType::String(StringConstraints {
                min_length: min,
                max_length: max,
                format: format.map(String::from),
            }),
        )
    }

    fn codes(errors: &[FieldError]) -> Vec<ErrorCode> {
        errors.iter().map(|e| e.code).collect()
    }

    #[test]
    fn test_string_accepts_ordered_lengths_and_valid_regex() {
        assert!(validate(&string_field(Some(1), Some(5), Some("^[A-Z]{3}$"))).is_empty());
        assert!(validate(&string_field(Some(4), Some(4), None)).is_empty());
        assert!(validate(&string_field(None, Some(2), None)).is_empty());
        assert!(validate(&string_field(None, None, None)).is_empty());
    }

    #[test]
    fn test_string_rejects_min_greater_than_max() {
        let errors = validate(&string_field(Some(6), Some(2), None));
        assert_eq!(codes(&errors), vec![ErrorCode::MinGtMax]);
        assert_eq!(errors[0].field, "code");
    }

    #[test]
    fn test_string_rejects_negative_lengths() {
        let errors = validate(&string_field(Some(-1), Some(-3), None));
        assert!(codes(&errors).contains(&ErrorCode::NegativeLength));
        assert!(codes(&errors).contains(&ErrorCode::MinGtMax));
        assert_eq!(
            codes(&errors).iter().filter(|c| **c == ErrorCode::NegativeLength).count(),
            2
        );
    }

    #[test]
    fn test_string_rejects_invalid_regex() {
        let errors = validate(&string_field(None, None, Some("([A-Z")));
        assert_eq!(codes(&errors), vec![ErrorCode::InvalidRegex]);
    }

    #[test]
    fn test_numeric_bounds() {
        let ok = Field::new(
            "amount",
            FieldType::Decimal(NumericConstraints { min_value: Some(0.0), max_value: Some(10.0) }),
        );
        assert!(validate(&ok).is_empty());

        let bad = Field::new(
            "qty",
            FieldType::Integer(NumericConstraints { min_value: Some(10.0), max_value: Some(1.0) }),
        );
        assert_eq!(codes(&validate(&bad)), vec![ErrorCode::MinGtMax]);
    }

    #[test]
    fn test_enum_rules() {
        assert_eq!(
            codes(&validate(&Field::enumeration("side", Vec::<String>::new()))),
            vec![ErrorCode::EmptyEnum]
        );
        assert_eq!(
            codes(&validate(&Field::enumeration("side", ["BUY", "SELL", "BUY"]))),
            vec![ErrorCode::DuplicateEnumValue]
        );
        assert!(validate(&Field::enumeration("side", ["BUY", "SELL"])).is_empty());
    }

    #[test]
    fn test_date_and_boolean_have_no_rules() {
        assert!(validate(&Field::date("d", DateFormat::Iso)).is_empty());
        assert!(validate(&Field::boolean("b")).is_empty());
    }

    #[test]
    fn test_field_set_detects_duplicate_and_empty_names() {
        let fields = vec![
            Field::string("tradeId"),
            Field::decimal("tradeId"),
            Field::string(" "),
            Field::enumeration("side", Vec::<String>::new()),
        ];
        let errors = validate_field_set(&fields);
        let found = codes(&errors);
        assert!(found.contains(&ErrorCode::DuplicateField));
        assert!(found.contains(&ErrorCode::EmptyFieldName));
        assert!(found.contains(&ErrorCode::EmptyEnum));
    }

    #[test]
    fn test_check_value_string_constraints() {
        let field = string_field(Some(2), Some(4), Some("[A-Z]+"));
        assert!(check_value(&field, &TypedValue::String("ABC".into())).is_ok());

        let too_short = check_value(&field, &TypedValue::String("A".into())).unwrap_err();
        assert_eq!(too_short.kind, TransformErrorKind::ConstraintViolation);

        // format must match the whole value
        assert!(check_value(&field, &TypedValue::String("AB1".into())).is_err());
    }

    #[test]
    fn test_check_value_format_ending_in_verbose_comment() {
        let field = string_field(None, None, Some(r"(?x) [A-Z]{3} \d+ # currency then digits"));
        assert!(validate(&field).is_empty());

        assert!(check_value(&field, &TypedValue::String("USD42".into())).is_ok());
        assert!(check_value(&field, &TypedValue::String("USD42x".into())).is_err());
        assert!(check_value(&field, &TypedValue::String("xUSD42".into())).is_err());
    }

    #[test]
    fn test_check_value_alternation_needs_full_span() {
        let field = string_field(None, None, Some("A|AB"));
        assert!(check_value(&field, &TypedValue::String("AB".into())).is_ok());
        assert!(check_value(&field, &TypedValue::String("ABC".into())).is_err());
    }

    #[test]
    fn test_check_value_unparseable_format_is_a_violation() {
        let field = string_field(None, None, Some("("));
        let err = check_value(&field, &TypedValue::String("x".into())).unwrap_err();
        assert_eq!(err.kind, TransformErrorKind::ConstraintViolation);
    }

    #[test]
    fn test_check_value_numeric_and_enum() {
        let amount = Field::new(
            "amount",
            FieldType::Decimal(NumericConstraints { min_value: Some(0.0), max_value: None }),
        );
        assert!(check_value(&amount, &TypedValue::Decimal(1.5)).is_ok());
        assert!(check_value(&amount, &TypedValue::Decimal(-0.5)).is_err());

        let side = Field::enumeration("side", ["BUY", "SELL"]);
        assert!(check_value(&side, &TypedValue::Enum("BUY".into())).is_ok());
        assert!(check_value(&side, &TypedValue::Enum("HOLD".into())).is_err());
    }
}
