// ⚙️ Transformation Engine - pure evaluation of one transformation step
// apply(transformation, raw_value, target_field) -> typed value or error.
// No state, no I/O: safe to call from any number of threads at once.

use crate::constraints;
use crate::error::{TransformErrorKind, TransformationError};
use crate::mapping::{CaseType, Transformation};
use crate::schema::{DateFormat, Field, FieldType};
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;

// ============================================================================
// TYPED VALUE
// ============================================================================

/// A value coerced to a target field's data type
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TypedValue {
    Null,
    String(String),
    Integer(i64),
    Decimal(f64),
    Boolean(bool),
    /// Rendered in the target field's date_format
    Date(String),
    Enum(String),
}

impl TypedValue {
    pub fn to_json(&self) -> Value {
        match self {
            TypedValue::Null => Value::Null,
            TypedValue::String(s) | TypedValue::Date(s) | TypedValue::Enum(s) => {
                Value::String(s.clone())
            }
            TypedValue::Integer(n) => Value::from(*n),
            TypedValue::Decimal(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            TypedValue::Boolean(b) => Value::Bool(*b),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, TypedValue::Null)
    }
}

// ============================================================================
// APPLY
// ============================================================================

/// Run one transformation, then coerce and check the result against `target`.
pub fn apply(
    transformation: &Transformation,
    raw: &Value,
    target: &Field,
) -> Result<TypedValue, TransformationError> {
    if raw.is_null() {
        return if target.required {
            Err(TransformationError::missing(&target.name))
        } else {
            Ok(TypedValue::Null)
        };
    }

    let typed = match step(transformation, raw, target)? {
        // Rendered once; never re-parsed against the field's own layout
        Stepped::Date(date, layout) if matches!(target.kind, FieldType::Date(_)) => {
            TypedValue::Date(layout.render(date))
        }
        Stepped::Date(date, layout) => coerce(&Value::String(layout.render(date)), target)?,
        Stepped::Value(value) => coerce(&value, target)?,
    };
    constraints::check_value(target, &typed)?;
    Ok(typed)
}

/// Output of the transformation step, before coercion
enum Stepped {
    Value(Value),
    /// Parsed date and the layout it is rendered in
    Date(NaiveDate, DateFormat),
}

/// The transformation itself, before any coercion
fn step(
    transformation: &Transformation,
    raw: &Value,
    target: &Field,
) -> Result<Stepped, TransformationError> {
    let out = match transformation {
        Transformation::Direct => return Ok(Stepped::Value(raw.clone())),

        Transformation::FormatDate(p) => {
            let text = as_text(raw)?;
            let date = p.source_format.parse(&text).ok_or_else(|| {
                TransformationError::new(
                    TransformErrorKind::DateParseError,
                    format!("'{}' does not match date format {}", text, p.source_format),
                )
            })?;
            let layout = p.target_format.unwrap_or_else(|| target_date_format(target));
            return Ok(Stepped::Date(date, layout));
        }

        Transformation::EnumMap(p) => {
            let key = as_text(raw)?;
            p.mapping.get(&key).cloned().ok_or_else(|| {
                TransformationError::new(
                    TransformErrorKind::ValueNotMapped,
                    format!("no enum mapping for '{}'", key),
                )
            })?
        }

        Transformation::Split(p) => {
            let text = as_text(raw)?;
            let tokens: Vec<&str> = text.split(p.delimiter.as_str()).collect();
            match tokens.get(p.index) {
                Some(token) => token.to_string(),
                None => {
                    return Err(TransformationError::new(
                        TransformErrorKind::IndexOutOfRange,
                        format!(
                            "index {} out of range: '{}' splits into {} token(s) on '{}'",
                            p.index,
                            text,
                            tokens.len(),
                            p.delimiter
                        ),
                    ))
                }
            }
        }

        Transformation::Left(p) => as_text(raw)?.chars().take(p.count).collect(),

        Transformation::Right(p) => {
            let chars: Vec<char> = as_text(raw)?.chars().collect();
            let from = chars.len().saturating_sub(p.count);
            chars[from..].iter().collect()
        }

        Transformation::Substring(p) => {
            if p.start < 0 {
                return Err(TransformationError::new(
                    TransformErrorKind::InvalidRange,
                    format!("substring start must be >= 0, got {}", p.start),
                ));
            }
            as_text(raw)?
                .chars()
                .skip(p.start as usize)
                .take(p.length)
                .collect()
        }

        Transformation::Replace(p) => {
            let text = as_text(raw)?;
            if p.find.is_empty() {
                text
            } else if p.replace_all {
                text.replace(&p.find, &p.replace)
            } else {
                text.replacen(&p.find, &p.replace, 1)
            }
        }

        Transformation::Regex(p) => {
            let text = as_text(raw)?;
            let re = p.pattern.regex();
            if p.group >= re.captures_len() {
                return Err(TransformationError::new(
                    TransformErrorKind::InvalidRange,
                    format!(
                        "group {} does not exist; pattern '{}' has {} group(s)",
                        p.group,
                        p.pattern.as_str(),
                        re.captures_len() - 1
                    ),
                ));
            }
            let captures = re.captures(&text).ok_or_else(|| {
                TransformationError::new(
                    TransformErrorKind::NoRegexMatch,
                    format!("'{}' does not match pattern '{}'", text, p.pattern.as_str()),
                )
            })?;
            match captures.get(p.group) {
                Some(m) => m.as_str().to_string(),
                None => {
                    return Err(TransformationError::new(
                        TransformErrorKind::NoRegexMatch,
                        format!("group {} did not participate in the match", p.group),
                    ))
                }
            }
        }

        Transformation::Case(p) => change_case(&as_text(raw)?, p.case_type),
    };

    Ok(Stepped::Value(Value::String(out)))
}

fn target_date_format(target: &Field) -> DateFormat {
    match &target.kind {
        FieldType::Date(c) => c.date_format,
        _ => DateFormat::default(),
    }
}

/// Scalar JSON as text; compound values are not text
fn as_text(raw: &Value) -> Result<String, TransformationError> {
    match raw {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(TransformationError::type_mismatch("text", other)),
    }
}

pub fn change_case(text: &str, case_type: CaseType) -> String {
    match case_type {
        CaseType::Upper => text.to_uppercase(),
        CaseType::Lower => text.to_lowercase(),
        CaseType::Title => {
            // first letter of each whitespace-delimited word, skipping leading punctuation
            let mut out = String::with_capacity(text.len());
            let mut capitalized = false;
            for c in text.chars() {
                if c.is_whitespace() {
                    capitalized = false;
                    out.push(c);
                } else if !capitalized && c.is_alphabetic() {
                    out.extend(c.to_uppercase());
                    capitalized = true;
                } else {
                    out.push(c);
                }
            }
            out
        }
        CaseType::Sentence => {
            let mut out = String::with_capacity(text.len());
            let mut seen_letter = false;
            for c in text.chars() {
                if !seen_letter && c.is_alphabetic() {
                    out.extend(c.to_uppercase());
                    seen_letter = true;
                } else {
                    out.extend(c.to_lowercase());
                }
            }
            out
        }
    }
}

// ============================================================================
// COERCION
// ============================================================================

fn coerce(value: &Value, target: &Field) -> Result<TypedValue, TransformationError> {
    match &target.kind {
        FieldType::String(_) => match value {
            Value::Array(_) | Value::Object(_) => {
                Err(TransformationError::type_mismatch("string", value))
            }
            other => as_text(other).map(TypedValue::String),
        },

        FieldType::Integer(_) => {
            let parsed = match value {
                Value::Number(n) => n.as_i64().or_else(|| {
                    n.as_f64()
                        .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                        .map(|f| f as i64)
                }),
                Value::String(s) => s.trim().parse::<i64>().ok(),
                _ => None,
            };
            parsed
                .map(TypedValue::Integer)
                .ok_or_else(|| TransformationError::type_mismatch("integer", value))
        }

        FieldType::Decimal(_) => {
            let parsed = match value {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
                _ => None,
            };
            parsed
                .map(TypedValue::Decimal)
                .ok_or_else(|| TransformationError::type_mismatch("decimal", value))
        }

        FieldType::Boolean => {
            let parsed = match value {
                Value::Bool(b) => Some(*b),
                Value::Number(n) => match n.as_i64() {
                    Some(0) => Some(false),
                    Some(1) => Some(true),
                    _ => None,
                },
                Value::String(s) => match s.trim().to_lowercase().as_str() {
                    "true" | "1" => Some(true),
                    "false" | "0" => Some(false),
                    _ => None,
                },
                _ => None,
            };
            parsed
                .map(TypedValue::Boolean)
                .ok_or_else(|| TransformationError::type_mismatch("boolean", value))
        }

        FieldType::Date(c) => match value {
            Value::String(s) => c
                .date_format
                .parse(s)
                .map(|d| TypedValue::Date(c.date_format.render(d)))
                .ok_or_else(|| {
                    TransformationError::new(
                        TransformErrorKind::DateParseError,
                        format!("'{}' does not match date format {}", s, c.date_format),
                    )
                }),
            other => Err(TransformationError::type_mismatch("date", other)),
        },

        FieldType::Enum(_) => match value {
            Value::Array(_) | Value::Object(_) => {
                Err(TransformationError::type_mismatch("enum", value))
            }
            other => as_text(other).map(TypedValue::Enum),
        },
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{NumericConstraints, StringConstraints};
    use serde_json::json;

    fn text_field() -> Field {
        Field::string("out")
    }

    fn run(t: Transformation, raw: Value) -> Result<TypedValue, TransformationError> {
        apply(&t, &raw, &text_field())
    }

    fn text(s: &str) -> TypedValue {
        TypedValue::String(s.to_string())
    }

    fn kind_of(result: Result<TypedValue, TransformationError>) -> TransformErrorKind {
        result.unwrap_err().kind
    }

    #[test]
    fn test_direct_coerces_to_target_type() {
        assert_eq!(apply(&Transformation::Direct, &json!("42"), &Field::integer("n")), Ok(TypedValue::Integer(42)));
        assert_eq!(apply(&Transformation::Direct, &json!(100.5), &Field::decimal("d")), Ok(TypedValue::Decimal(100.5)));
        assert_eq!(apply(&Transformation::Direct, &json!("TRUE"), &Field::boolean("b")), Ok(TypedValue::Boolean(true)));
        assert_eq!(apply(&Transformation::Direct, &json!(7), &text_field()), Ok(text("7")));
    }

    #[test]
    fn test_direct_type_mismatch() {
        let err = apply(&Transformation::Direct, &json!("abc"), &Field::integer("n")).unwrap_err();
        assert_eq!(err.kind, TransformErrorKind::TypeMismatch);

        let err = apply(&Transformation::Direct, &json!(1.5), &Field::integer("n")).unwrap_err();
        assert_eq!(err.kind, TransformErrorKind::TypeMismatch);

        let err = apply(&Transformation::Direct, &json!({"a": 1}), &text_field()).unwrap_err();
        assert_eq!(err.kind, TransformErrorKind::TypeMismatch);
    }

    #[test]
    fn test_null_handling() {
        let required = Field::string("id").required();
        let err = apply(&Transformation::Direct, &Value::Null, &required).unwrap_err();
        assert_eq!(err.kind, TransformErrorKind::MissingRequiredField);

        assert_eq!(apply(&Transformation::Direct, &Value::Null, &text_field()), Ok(TypedValue::Null));
    }

    #[test]
    fn test_format_date() {
        let iso = Field::date("settle", DateFormat::Iso);
        let t = Transformation::format_date(DateFormat::DayMonthYearSlash, Some(DateFormat::Iso));
        assert_eq!(apply(&t, &json!("15/01/2024"), &iso), Ok(TypedValue::Date("2024-01-15".into())));

        // target format falls back to the field's date_format
        let t = Transformation::format_date(DateFormat::DayMonthYearSlash, None);
        let us = Field::date("settle", DateFormat::MonthDayYearDash);
        assert_eq!(apply(&t, &json!("01/02/2024"), &us), Ok(TypedValue::Date("02-01-2024".into())));

        let err = apply(&t, &json!("2024-01-15"), &iso).unwrap_err();
        assert_eq!(err.kind, TransformErrorKind::DateParseError);
    }

    #[test]
    fn test_format_date_explicit_target_format_wins_over_field_layout() {
        let eu = Field::date("settle", DateFormat::DayMonthYearDash);
        let t = Transformation::format_date(DateFormat::DayMonthYearSlash, Some(DateFormat::Iso));
        assert_eq!(apply(&t, &json!("15/01/2024"), &eu), Ok(TypedValue::Date("2024-01-15".into())));

        // only a source parse failure is a DateParseError
        assert_eq!(kind_of(apply(&t, &json!("2024-01-15"), &eu)), TransformErrorKind::DateParseError);
    }

    #[test]
    fn test_direct_into_date_field_requires_matching_layout() {
        let iso = Field::date("settle", DateFormat::Iso);
        assert_eq!(apply(&Transformation::Direct, &json!("2024-02-01"), &iso), Ok(TypedValue::Date("2024-02-01".into())));
        assert_eq!(
            kind_of(apply(&Transformation::Direct, &json!("01/02/2024"), &iso)),
            TransformErrorKind::DateParseError
        );
    }

    #[test]
    fn test_enum_map() {
        let side = Field::enumeration("gender", ["MALE", "FEMALE"]);
        let t = Transformation::enum_map([("M", "MALE")]);
        assert_eq!(apply(&t, &json!("M"), &side), Ok(TypedValue::Enum("MALE".into())));
        assert_eq!(kind_of(apply(&t, &json!("F"), &side)), TransformErrorKind::ValueNotMapped);
    }

    #[test]
    fn test_split() {
        assert_eq!(run(Transformation::split(",", 1), json!("A,B,C")), Ok(text("B")));
        assert_eq!(run(Transformation::split("::", 0), json!("x::y")), Ok(text("x")));
        assert_eq!(
            kind_of(run(Transformation::split(",", 5), json!("A,B,C"))),
            TransformErrorKind::IndexOutOfRange
        );
    }

    #[test]
    fn test_left_right_clamp() {
        assert_eq!(run(Transformation::left(3), json!("hello")), Ok(text("hel")));
        assert_eq!(run(Transformation::left(10), json!("hi")), Ok(text("hi")));
        assert_eq!(run(Transformation::right(3), json!("hello")), Ok(text("llo")));
        assert_eq!(run(Transformation::right(10), json!("hi")), Ok(text("hi")));
        assert_eq!(run(Transformation::left(0), json!("hi")), Ok(text("")));
    }

    #[test]
    fn test_substring() {
        assert_eq!(run(Transformation::substring(1, 3), json!("abcdef")), Ok(text("bcd")));
        assert_eq!(run(Transformation::substring(4, 10), json!("abcdef")), Ok(text("ef")));
        assert_eq!(run(Transformation::substring(10, 2), json!("abc")), Ok(text("")));
        assert_eq!(
            kind_of(run(Transformation::substring(-1, 2), json!("abc"))),
            TransformErrorKind::InvalidRange
        );
    }

    #[test]
    fn test_replace_first_or_all() {
        assert_eq!(run(Transformation::replace("-", "", true), json!("a-b-c")), Ok(text("abc")));
        assert_eq!(run(Transformation::replace("-", "+", false), json!("a-b-c")), Ok(text("a+b-c")));
        // literal, not a pattern
        assert_eq!(run(Transformation::replace(".", "!", true), json!("a.b")), Ok(text("a!b")));
    }

    #[test]
    fn test_regex() {
        let t = Transformation::regex(r"([A-Z]{3})/([A-Z]{3})", 2).unwrap();
        assert_eq!(run(t, json!("EUR/USD")), Ok(text("USD")));

        let whole = Transformation::regex(r"\d+", 0).unwrap();
        assert_eq!(run(whole, json!("ref 12345 x")), Ok(text("12345")));

        let t = Transformation::regex(r"\d+", 0).unwrap();
        assert_eq!(kind_of(run(t, json!("none"))), TransformErrorKind::NoRegexMatch);

        let bad_group = Transformation::Regex(crate::mapping::RegexParams {
            pattern: crate::mapping::Pattern::new(r"(\d+)").unwrap(),
            group: 3,
        });
        assert_eq!(kind_of(run(bad_group, json!("12"))), TransformErrorKind::InvalidRange);
    }

    #[test]
    fn test_case_types() {
        assert_eq!(change_case("hello World", CaseType::Upper), "HELLO WORLD");
        assert_eq!(change_case("Hello World", CaseType::Lower), "hello world");
        assert_eq!(change_case("hello  big world", CaseType::Title), "Hello  Big World");
        assert_eq!(change_case("(hello) 'world", CaseType::Title), "(Hello) 'World");
        assert_eq!(change_case("hELLO wORLD", CaseType::Sentence), "Hello world");
        assert_eq!(change_case("  123 abc", CaseType::Sentence), "  123 Abc");
    }

    #[test]
    fn test_upper_case_is_idempotent() {
        for s in ["mixed Case", "ßtraße", "already UPPER", "", "123 abc"] {
            let once = change_case(s, CaseType::Upper);
            let twice = change_case(&once, CaseType::Upper);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_string_ops_on_numbers_use_text_form() {
        assert_eq!(run(Transformation::left(2), json!(12345)), Ok(text("12")));
    }

    #[test]
    fn test_constraint_violation_after_transform() {
        let short = Field::new(
            "ccy",
            FieldType::String(StringConstraints {
                min_length: None,
                max_length: Some(3),
                format: None,
            }),
        );
        let err = apply(&Transformation::Direct, &json!("EURO"), &short).unwrap_err();
        assert_eq!(err.kind, TransformErrorKind::ConstraintViolation);

        let positive = Field::new(
            "qty",
            FieldType::Integer(NumericConstraints { min_value: Some(1.0), max_value: None }),
        );
        assert_eq!(
            kind_of(apply(&Transformation::Direct, &json!(0), &positive)),
            TransformErrorKind::ConstraintViolation
        );
    }

    #[test]
    fn test_typed_value_json() {
        assert_eq!(TypedValue::Decimal(100.5).to_json(), json!(100.5));
        assert_eq!(TypedValue::Date("2024-02-01".into()).to_json(), json!("2024-02-01"));
        assert_eq!(serde_json::to_value(TypedValue::Integer(3)).unwrap(), json!(3));
        assert_eq!(serde_json::to_value(TypedValue::Null).unwrap(), Value::Null);
    }
}
