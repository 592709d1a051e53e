// 📐 Shape Layer - Fields, constraints and System Models
// A Field's constraints are keyed by its data type, so a date field can never
// carry a max_length and a boolean can never carry anything at all.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

// ============================================================================
// DATA TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    String,
    Integer,
    Decimal,
    Boolean,
    Date,
    Enum,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::String => "string",
            DataType::Integer => "integer",
            DataType::Decimal => "decimal",
            DataType::Boolean => "boolean",
            DataType::Date => "date",
            DataType::Enum => "enum",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// DATE FORMAT VOCABULARY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DateOrder {
    DayMonthYear,
    MonthDayYear,
    YearMonthDay,
}

/// The fixed set of date layouts a field or transformation may name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum DateFormat {
    #[serde(rename = "DD-MM-YYYY")]
    DayMonthYearDash,
    #[serde(rename = "MM-DD-YYYY")]
    MonthDayYearDash,
    #[default]
    #[serde(rename = "YYYY-MM-DD")]
    Iso,
    #[serde(rename = "DD/MM/YYYY")]
    DayMonthYearSlash,
    #[serde(rename = "MM/DD/YYYY")]
    MonthDayYearSlash,
}

impl DateFormat {
    pub const ALL: [DateFormat; 5] = [
        DateFormat::DayMonthYearDash,
        DateFormat::MonthDayYearDash,
        DateFormat::Iso,
        DateFormat::DayMonthYearSlash,
        DateFormat::MonthDayYearSlash,
    ];

    pub fn token(&self) -> &'static str {
        match self {
            DateFormat::DayMonthYearDash => "DD-MM-YYYY",
            DateFormat::MonthDayYearDash => "MM-DD-YYYY",
            DateFormat::Iso => "YYYY-MM-DD",
            DateFormat::DayMonthYearSlash => "DD/MM/YYYY",
            DateFormat::MonthDayYearSlash => "MM/DD/YYYY",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.token() == token)
    }

    fn order(&self) -> DateOrder {
        match self {
            DateFormat::DayMonthYearDash | DateFormat::DayMonthYearSlash => DateOrder::DayMonthYear,
            DateFormat::MonthDayYearDash | DateFormat::MonthDayYearSlash => DateOrder::MonthDayYear,
            DateFormat::Iso => DateOrder::YearMonthDay,
        }
    }

    fn separator(&self) -> char {
        match self {
            DateFormat::DayMonthYearSlash | DateFormat::MonthDayYearSlash => '/',
            _ => '-',
        }
    }

    /// Parse strictly: exact digit widths, exact separator, real calendar date.
    pub fn parse(&self, input: &str) -> Option<NaiveDate> {
        let sep = self.separator();
        let parts: Vec<&str> = input.split(sep).collect();
        if parts.len() != 3 {
            return None;
        }

        let widths = match self.order() {
            DateOrder::YearMonthDay => [4, 2, 2],
            _ => [2, 2, 4],
        };
        for (part, width) in parts.iter().zip(widths) {
            if part.len() != width || !part.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
        }

        let nums: Vec<u32> = parts.iter().filter_map(|p| p.parse().ok()).collect();
        if nums.len() != 3 {
            return None;
        }

        let (year, month, day) = match self.order() {
            DateOrder::DayMonthYear => (nums[2], nums[1], nums[0]),
            DateOrder::MonthDayYear => (nums[2], nums[0], nums[1]),
            DateOrder::YearMonthDay => (nums[0], nums[1], nums[2]),
        };
        NaiveDate::from_ymd_opt(year as i32, month, day)
    }

    pub fn render(&self, date: NaiveDate) -> String {
        let pattern = match self {
            DateFormat::DayMonthYearDash => "%d-%m-%Y",
            DateFormat::MonthDayYearDash => "%m-%d-%Y",
            DateFormat::Iso => "%Y-%m-%d",
            DateFormat::DayMonthYearSlash => "%d/%m/%Y",
            DateFormat::MonthDayYearSlash => "%m/%d/%Y",
        };
        date.format(pattern).to_string()
    }
}

impl fmt::Display for DateFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

// ============================================================================
// CONSTRAINTS (one record per data type)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StringConstraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<i64>,
    /// Regular expression every value must match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NumericConstraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DateConstraints {
    #[serde(default)]
    pub date_format: DateFormat,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnumConstraints {
    #[serde(default)]
    pub values: Vec<String>,
}

/// Data type together with the constraints that type admits
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    String(StringConstraints),
    Integer(NumericConstraints),
    Decimal(NumericConstraints),
    Boolean,
    Date(DateConstraints),
    Enum(EnumConstraints),
}

impl FieldType {
    pub fn data_type(&self) -> DataType {
        match self {
            FieldType::String(_) => DataType::String,
            FieldType::Integer(_) => DataType::Integer,
            FieldType::Decimal(_) => DataType::Decimal,
            FieldType::Boolean => DataType::Boolean,
            FieldType::Date(_) => DataType::Date,
            FieldType::Enum(_) => DataType::Enum,
        }
    }

    /// Unconstrained variant of a data type
    pub fn plain(data_type: DataType) -> Self {
        match data_type {
            DataType::String => FieldType::String(StringConstraints::default()),
            DataType::Integer => FieldType::Integer(NumericConstraints::default()),
            DataType::Decimal => FieldType::Decimal(NumericConstraints::default()),
            DataType::Boolean => FieldType::Boolean,
            DataType::Date => FieldType::Date(DateConstraints::default()),
            DataType::Enum => FieldType::Enum(EnumConstraints::default()),
        }
    }
}

// ============================================================================
// FIELD
// ============================================================================

/// A named, typed attribute of a System Model or a source field set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "FieldRecord", into = "FieldRecord")]
pub struct Field {
    pub name: String,
    pub description: String,
    pub required: bool,
    pub kind: FieldType,
}

impl Field {
    pub fn new(name: impl Into<String>, kind: FieldType) -> Self {
        Field {
            name: name.into(),
            description: String::new(),
            required: false,
            kind,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::plain(DataType::String))
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::plain(DataType::Integer))
    }

    pub fn decimal(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::plain(DataType::Decimal))
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Boolean)
    }

    pub fn date(name: impl Into<String>, date_format: DateFormat) -> Self {
        Self::new(name, FieldType::Date(DateConstraints { date_format }))
    }

    pub fn enumeration<I, S>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            name,
            FieldType::Enum(EnumConstraints {
                values: values.into_iter().map(Into::into).collect(),
            }),
        )
    }

    /// Builder: mark as required
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Builder: add description
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    pub fn data_type(&self) -> DataType {
        self.kind.data_type()
    }
}

/// Wire shape of a Field: `{ name, data_type, description, required, constraints }`
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FieldRecord {
    name: String,
    data_type: DataType,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    constraints: Option<serde_json::Value>,
}

impl TryFrom<FieldRecord> for Field {
    type Error = String;

    fn try_from(record: FieldRecord) -> Result<Self, Self::Error> {
        // Missing, null and {} all mean "no constraints"
        let raw = match record.constraints {
            None | Some(serde_json::Value::Null) => serde_json::json!({}),
            Some(v) => v,
        };
        let bad = |e: serde_json::Error| {
            format!(
                "invalid constraints for {} field '{}': {}",
                record.data_type, record.name, e
            )
        };

        let kind = match record.data_type {
            DataType::String => FieldType::String(serde_json::from_value(raw).map_err(bad)?),
            DataType::Integer => FieldType::Integer(serde_json::from_value(raw).map_err(bad)?),
            DataType::Decimal => FieldType::Decimal(serde_json::from_value(raw).map_err(bad)?),
            DataType::Date => FieldType::Date(serde_json::from_value(raw).map_err(bad)?),
            DataType::Enum => FieldType::Enum(serde_json::from_value(raw).map_err(bad)?),
            DataType::Boolean => {
                let empty = raw.as_object().map(|m| m.is_empty()).unwrap_or(false);
                if !empty {
                    return Err(format!(
                        "boolean field '{}' does not accept constraints",
                        record.name
                    ));
                }
                FieldType::Boolean
            }
        };

        Ok(Field {
            name: record.name,
            description: record.description.unwrap_or_default(),
            required: record.required,
            kind,
        })
    }
}

impl From<Field> for FieldRecord {
    fn from(field: Field) -> Self {
        let data_type = field.data_type();
        let constraints = match &field.kind {
            FieldType::String(c) => serde_json::to_value(c).ok(),
            FieldType::Integer(c) | FieldType::Decimal(c) => serde_json::to_value(c).ok(),
            FieldType::Date(c) => serde_json::to_value(c).ok(),
            FieldType::Enum(c) => serde_json::to_value(c).ok(),
            FieldType::Boolean => None,
        };
        FieldRecord {
            name: field.name,
            data_type,
            description: if field.description.is_empty() {
                None
            } else {
                Some(field.description)
            },
            required: field.required,
            constraints,
        }
    }
}

// ============================================================================
// SYSTEM MODEL
// ============================================================================

/// A versioned target record schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemModel {
    /// Empty on create means "assign a UUID"
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Free-form, usually semver
    #[serde(default)]
    pub version: String,
    pub fields: Vec<Field>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl SystemModel {
    pub fn new(name: impl Into<String>, version: impl Into<String>, fields: Vec<Field>) -> Self {
        let now = Utc::now();
        SystemModel {
            id: String::new(),
            name: name.into(),
            description: String::new(),
            version: version.into(),
            fields,
            created_at: now,
            updated_at: now,
        }
    }

    /// Builder: set a caller-chosen id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Builder: add description
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// SHA-256 over the canonical JSON of the field list.
    /// Changes whenever a field is added, removed, renamed or retyped.
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::to_string(&self.fields).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

// ============================================================================
// TESTS
// ============================================================================
