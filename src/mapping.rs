// 🔀 Mapping Definitions - source field set + per-field transformation pipeline
// Transformation parameters are one concrete record per kind and are checked
// when the transformation is built, not when it is applied.

use crate::constraints;
use crate::error::{ErrorCode, FieldError, ValidationError};
use crate::schema::{DataType, DateFormat, Field, FieldType, SystemModel};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

// ============================================================================
// TRANSFORMATION PARAMETERS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FormatDateParams {
    pub source_format: DateFormat,
    /// Falls back to the target field's date_format
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_format: Option<DateFormat>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnumMapParams {
    pub mapping: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SplitParams {
    pub delimiter: String,
    #[serde(default)]
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CountParams {
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubstringParams {
    pub start: i64,
    pub length: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReplaceParams {
    pub find: String,
    #[serde(default)]
    pub replace: String,
    #[serde(default = "default_true")]
    pub replace_all: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegexParams {
    pub pattern: Pattern,
    #[serde(default)]
    pub group: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseType {
    Upper,
    Lower,
    Title,
    Sentence,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CaseParams {
    pub case_type: CaseType,
}

/// A compiled regular expression that serializes as its source text
#[derive(Debug, Clone)]
pub struct Pattern(Regex);

impl Pattern {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(Pattern)
    }

    pub fn regex(&self) -> &Regex {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Serialize for Pattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Pattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        Pattern::new(&source).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// TRANSFORMATION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformationKind {
    Direct,
    FormatDate,
    EnumMap,
    Split,
    Left,
    Right,
    Substring,
    Replace,
    Regex,
    Case,
}

impl TransformationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransformationKind::Direct => "direct",
            TransformationKind::FormatDate => "format_date",
            TransformationKind::EnumMap => "enum_map",
            TransformationKind::Split => "split",
            TransformationKind::Left => "left",
            TransformationKind::Right => "right",
            TransformationKind::Substring => "substring",
            TransformationKind::Replace => "replace",
            TransformationKind::Regex => "regex",
            TransformationKind::Case => "case",
        }
    }

    /// Which target data type this kind may feed
    pub fn compatible_with(&self, data_type: DataType) -> bool {
        match self {
            TransformationKind::Direct => true,
            TransformationKind::FormatDate => data_type == DataType::Date,
            TransformationKind::EnumMap => data_type == DataType::Enum,
            _ => data_type == DataType::String,
        }
    }
}

impl fmt::Display for TransformationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A declarative, pure value-conversion step.
/// Wire shape: `{ "type": "<kind>", "params": { ... } }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TransformationRecord", into = "TransformationRecord")]
pub enum Transformation {
    Direct,
    FormatDate(FormatDateParams),
    EnumMap(EnumMapParams),
    Split(SplitParams),
    Left(CountParams),
    Right(CountParams),
    Substring(SubstringParams),
    Replace(ReplaceParams),
    Regex(RegexParams),
    Case(CaseParams),
}

impl Transformation {
    pub fn kind(&self) -> TransformationKind {
        match self {
            Transformation::Direct => TransformationKind::Direct,
            Transformation::FormatDate(_) => TransformationKind::FormatDate,
            Transformation::EnumMap(_) => TransformationKind::EnumMap,
            Transformation::Split(_) => TransformationKind::Split,
            Transformation::Left(_) => TransformationKind::Left,
            Transformation::Right(_) => TransformationKind::Right,
            Transformation::Substring(_) => TransformationKind::Substring,
            Transformation::Replace(_) => TransformationKind::Replace,
            Transformation::Regex(_) => TransformationKind::Regex,
            Transformation::Case(_) => TransformationKind::Case,
        }
    }

    pub fn format_date(source_format: DateFormat, target_format: Option<DateFormat>) -> Self {
        Transformation::FormatDate(FormatDateParams {
            source_format,
            target_format,
        })
    }

    pub fn enum_map<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Transformation::EnumMap(EnumMapParams {
            mapping: pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        })
    }

    pub fn split(delimiter: impl Into<String>, index: usize) -> Self {
        Transformation::Split(SplitParams {
            delimiter: delimiter.into(),
            index,
        })
    }

    pub fn left(count: usize) -> Self {
        Transformation::Left(CountParams { count })
    }

    pub fn right(count: usize) -> Self {
        Transformation::Right(CountParams { count })
    }

    pub fn substring(start: i64, length: usize) -> Self {
        Transformation::Substring(SubstringParams { start, length })
    }

    pub fn replace(find: impl Into<String>, replace: impl Into<String>, replace_all: bool) -> Self {
        Transformation::Replace(ReplaceParams {
            find: find.into(),
            replace: replace.into(),
            replace_all,
        })
    }

    pub fn regex(pattern: &str, group: usize) -> Result<Self, regex::Error> {
        Ok(Transformation::Regex(RegexParams {
            pattern: Pattern::new(pattern)?,
            group,
        }))
    }

    pub fn case(case_type: CaseType) -> Self {
        Transformation::Case(CaseParams { case_type })
    }

    /// Parameter problems that make this step unusable regardless of target
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        match self {
            Transformation::Split(p) if p.delimiter.is_empty() => {
                problems.push("split delimiter must not be empty".to_string());
            }
            Transformation::Substring(p) if p.start < 0 => {
                problems.push(format!("substring start must be >= 0, got {}", p.start));
            }
            Transformation::Replace(p) if p.find.is_empty() => {
                problems.push("replace find text must not be empty".to_string());
            }
            Transformation::Regex(p) if p.group > p.pattern.regex().captures_len() - 1 => {
                problems.push(format!(
                    "regex group {} does not exist in pattern '{}'",
                    p.group,
                    p.pattern.as_str()
                ));
            }
            Transformation::EnumMap(p) if p.mapping.is_empty() => {
                problems.push("enum_map mapping must not be empty".to_string());
            }
            _ => {}
        }
        problems
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TransformationRecord {
    #[serde(rename = "type")]
    kind: TransformationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    params: Option<serde_json::Value>,
}

impl TryFrom<TransformationRecord> for Transformation {
    type Error = String;

    fn try_from(record: TransformationRecord) -> Result<Self, Self::Error> {
        let raw = match record.params {
            None | Some(serde_json::Value::Null) => serde_json::json!({}),
            Some(v) => v,
        };
        let bad = |e: serde_json::Error| format!("invalid params for {}: {}", record.kind, e);

        let transformation = match record.kind {
            TransformationKind::Direct => Transformation::Direct,
            TransformationKind::FormatDate => {
                Transformation::FormatDate(serde_json::from_value(raw).map_err(bad)?)
            }
            TransformationKind::EnumMap => {
                Transformation::EnumMap(serde_json::from_value(raw).map_err(bad)?)
            }
            TransformationKind::Split => Transformation::Split(serde_json::from_value(raw).map_err(bad)?),
            TransformationKind::Left => Transformation::Left(serde_json::from_value(raw).map_err(bad)?),
            TransformationKind::Right => Transformation::Right(serde_json::from_value(raw).map_err(bad)?),
            TransformationKind::Substring => {
                Transformation::Substring(serde_json::from_value(raw).map_err(bad)?)
            }
            TransformationKind::Replace => {
                Transformation::Replace(serde_json::from_value(raw).map_err(bad)?)
            }
            TransformationKind::Regex => Transformation::Regex(serde_json::from_value(raw).map_err(bad)?),
            TransformationKind::Case => Transformation::Case(serde_json::from_value(raw).map_err(bad)?),
        };

        match transformation.problems().first() {
            Some(problem) => Err(problem.clone()),
            None => Ok(transformation),
        }
    }
}

impl From<Transformation> for TransformationRecord {
    fn from(t: Transformation) -> Self {
        let kind = t.kind();
        let params = match &t {
            Transformation::Direct => None,
            Transformation::FormatDate(p) => serde_json::to_value(p).ok(),
            Transformation::EnumMap(p) => serde_json::to_value(p).ok(),
            Transformation::Split(p) => serde_json::to_value(p).ok(),
            Transformation::Left(p) | Transformation::Right(p) => serde_json::to_value(p).ok(),
            Transformation::Substring(p) => serde_json::to_value(p).ok(),
            Transformation::Replace(p) => serde_json::to_value(p).ok(),
            Transformation::Regex(p) => serde_json::to_value(p).ok(),
            Transformation::Case(p) => serde_json::to_value(p).ok(),
        };
        TransformationRecord { kind, params }
    }
}

// ============================================================================
// FIELD MAPPING + MAPPING
// ============================================================================

/// One source→target pairing plus an optional transformation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub source_field: String,
    pub target_field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transformation: Option<Transformation>,
}

impl FieldMapping {
    pub fn direct(source: impl Into<String>, target: impl Into<String>) -> Self {
        FieldMapping {
            source_field: source.into(),
            target_field: target.into(),
            transformation: None,
        }
    }

    pub fn with_transformation(
        source: impl Into<String>,
        target: impl Into<String>,
        transformation: Transformation,
    ) -> Self {
        FieldMapping {
            source_field: source.into(),
            target_field: target.into(),
            transformation: Some(transformation),
        }
    }

    /// Missing transformation behaves as `direct`
    pub fn kind(&self) -> TransformationKind {
        self.transformation
            .as_ref()
            .map(|t| t.kind())
            .unwrap_or(TransformationKind::Direct)
    }
}

/// Links one source system's field set to a System Model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mapping {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Source-system identifier
    pub bank_id: String,
    pub system_model_id: String,
    /// Model version at the time this mapping was saved
    #[serde(default)]
    pub system_model_version: String,
    /// Model field fingerprint at the time this mapping was saved
    #[serde(default)]
    pub system_model_fingerprint: String,
    pub source_fields: Vec<Field>,
    pub mappings: Vec<FieldMapping>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Mapping {
    pub fn new(
        name: impl Into<String>,
        bank_id: impl Into<String>,
        system_model_id: impl Into<String>,
        source_fields: Vec<Field>,
        mappings: Vec<FieldMapping>,
    ) -> Self {
        let now = Utc::now();
        Mapping {
            id: String::new(),
            name: name.into(),
            description: String::new(),
            bank_id: bank_id.into(),
            system_model_id: system_model_id.into(),
            system_model_version: String::new(),
            system_model_fingerprint: String::new(),
            source_fields,
            mappings,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn source_field(&self, name: &str) -> Option<&Field> {
        self.source_fields.iter().find(|f| f.name == name)
    }

    pub fn is_source_referenced(&self, name: &str) -> bool {
        self.mappings.iter().any(|m| m.source_field == name)
    }
}

// ============================================================================
// MAPPING VALIDATION
// ============================================================================

/// Rules checked in order; the first failing rule short-circuits.
/// `model` is the resolved System Model, or None when the id did not resolve.
pub fn validate_mapping(mapping: &Mapping, model: Option<&SystemModel>) -> Result<(), ValidationError> {
    if mapping.name.trim().is_empty() {
        return Err(single("name", ErrorCode::EmptyName, "mapping name must not be empty"));
    }
    if mapping.bank_id.trim().is_empty() {
        return Err(single("bank_id", ErrorCode::EmptyBankId, "bank_id must not be empty"));
    }
    let model = match model {
        Some(m) => m,
        None => {
            return Err(single(
                "system_model_id",
                ErrorCode::UnknownSystemModel,
                format!("system model '{}' does not exist", mapping.system_model_id),
            ))
        }
    };
    if mapping.source_fields.is_empty() {
        return Err(single(
            "source_fields",
            ErrorCode::EmptySourceFields,
            "at least one source field is required",
        ));
    }
    let field_errors = constraints::validate_field_set(&mapping.source_fields);
    if !field_errors.is_empty() {
        return Err(ValidationError::new(field_errors));
    }
    if mapping.mappings.is_empty() {
        return Err(single(
            "mappings",
            ErrorCode::EmptyMappings,
            "at least one field mapping is required",
        ));
    }

    let errors = field_mapping_errors(mapping, model);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::new(errors))
    }
}

fn single(field: &str, code: ErrorCode, message: impl Into<String>) -> ValidationError {
    ValidationError::single(FieldError::new(field, code, message))
}

/// Dangling source/target names only
pub fn dangling_references(mapping: &Mapping, model: &SystemModel) -> Vec<FieldError> {
    let mut errors = Vec::new();
    for (i, fm) in mapping.mappings.iter().enumerate() {
        let label = format!("mappings[{}]", i);
        if mapping.source_field(&fm.source_field).is_none() {
            errors.push(FieldError::new(
                label.as_str(),
                ErrorCode::UnknownSourceField,
                format!("source field '{}' is not in the source field set", fm.source_field),
            ));
        }
        if !model.has_field(&fm.target_field) {
            errors.push(FieldError::new(
                label.as_str(),
                ErrorCode::UnknownTargetField,
                format!(
                    "target field '{}' is not in system model '{}'",
                    fm.target_field, model.id
                ),
            ));
        }
    }
    errors
}

fn field_mapping_errors(mapping: &Mapping, model: &SystemModel) -> Vec<FieldError> {
    let mut errors = dangling_references(mapping, model);
    let mut seen_sources = HashSet::new();
    let mut seen_targets = HashSet::new();

    for (i, fm) in mapping.mappings.iter().enumerate() {
        let label = format!("mappings[{}]", i);

        if !seen_sources.insert(fm.source_field.as_str()) {
            errors.push(FieldError::new(
                label.as_str(),
                ErrorCode::DuplicateSource,
                format!("source field '{}' is already mapped", fm.source_field),
            ));
        }
        if !seen_targets.insert(fm.target_field.as_str()) {
            errors.push(FieldError::new(
                label.as_str(),
                ErrorCode::DuplicateTarget,
                format!("target field '{}' is already mapped", fm.target_field),
            ));
        }

        if let Some(target) = model.field(&fm.target_field) {
            errors.extend(transformation_errors(&label, fm, target));
        }
    }

    errors
}

fn transformation_errors(label: &str, fm: &FieldMapping, target: &Field) -> Vec<FieldError> {
    let mut errors = Vec::new();
    let kind = fm.kind();

    if !kind.compatible_with(target.data_type()) {
        errors.push(FieldError::new(
            label,
            ErrorCode::IncompatibleTransformation,
            format!(
                "{} cannot produce a {} value for '{}'",
                kind,
                target.data_type(),
                target.name
            ),
        ));
        return errors;
    }

    let transformation = match &fm.transformation {
        Some(t) => t,
        None => return errors,
    };

    for problem in transformation.problems() {
        errors.push(FieldError::new(label, ErrorCode::InvalidTransformation, problem));
    }

    match (transformation, &target.kind) {
        (Transformation::EnumMap(p), FieldType::Enum(c)) => {
            for value in p.mapping.values() {
                if !c.values.contains(value) {
                    errors.push(FieldError::new(
                        label,
                        ErrorCode::InvalidTransformation,
                        format!("enum_map produces '{}' which is not a value of '{}'", value, target.name),
                    ));
                }
            }
        }
        (Transformation::FormatDate(p), FieldType::Date(c)) => {
            if let Some(fmt) = p.target_format {
                if fmt != c.date_format {
                    errors.push(FieldError::new(
                        label,
                        ErrorCode::InvalidTransformation,
                        format!(
                            "target_format {} differs from '{}' date_format {}",
                            fmt, target.name, c.date_format
                        ),
                    ));
                }
            }
        }
        _ => {}
    }

    errors
}

// ============================================================================
// TESTS
// ============================================================================
