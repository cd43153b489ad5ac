//! Value types shared by the OData and Data API call surfaces.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ApiError, Result};

/// Primary key of an OData entity.
///
/// Text and UUID keys are quoted in the URL (`Table('key')`), numeric keys
/// are not (`Table(42)`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordKey {
    Text(String),
    Uuid(Uuid),
    Number(i64),
}

impl RecordKey {
    /// The parenthesised key segment appended to a table name.
    pub fn to_path_segment(&self) -> String {
        match self {
            RecordKey::Text(text) => format!("('{}')", escape_quotes(text)),
            RecordKey::Uuid(id) => format!("('{id:X}')"),
            RecordKey::Number(n) => format!("({n})"),
        }
    }
}

impl From<&str> for RecordKey {
    fn from(value: &str) -> Self {
        RecordKey::Text(value.to_string())
    }
}

impl From<String> for RecordKey {
    fn from(value: String) -> Self {
        RecordKey::Text(value)
    }
}

impl From<Uuid> for RecordKey {
    fn from(value: Uuid) -> Self {
        RecordKey::Uuid(value)
    }
}

impl From<i64> for RecordKey {
    fn from(value: i64) -> Self {
        RecordKey::Number(value)
    }
}

impl From<i32> for RecordKey {
    fn from(value: i32) -> Self {
        RecordKey::Number(value.into())
    }
}

/// OData comparison operator used in `$filter` expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOption {
    Equal,
    NotEqual,
    Greater,
    GreaterOrEqual,
    Less,
    LessOrEqual,
}

impl FilterOption {
    pub fn as_str(self) -> &'static str {
        match self {
            FilterOption::Equal => "eq",
            FilterOption::NotEqual => "ne",
            FilterOption::Greater => "gt",
            FilterOption::GreaterOrEqual => "ge",
            FilterOption::Less => "lt",
            FilterOption::LessOrEqual => "le",
        }
    }
}

/// Right-hand side of a filter comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    /// Sent inside single quotes after percent-encoding of the whole URL.
    /// `&`, `=` and `+` are URL-safe and pass through unencoded, so a value
    /// containing them must be pre-escaped by the caller (`A%26B` for
    /// `A&B`); existing `%XX` escapes are preserved.
    Text(String),
    Integer(i64),
    Decimal(f64),
    Boolean(bool),
}

impl fmt::Display for FilterValue {
    /// Text is single-quoted with embedded quotes doubled; everything else is bare.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterValue::Text(text) => write!(f, "'{}'", escape_quotes(text)),
            FilterValue::Integer(n) => write!(f, "{n}"),
            FilterValue::Decimal(n) => write!(f, "{n}"),
            FilterValue::Boolean(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::Text(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        FilterValue::Text(value)
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        FilterValue::Integer(value)
    }
}

impl From<i32> for FilterValue {
    fn from(value: i32) -> Self {
        FilterValue::Integer(value.into())
    }
}

impl From<f64> for FilterValue {
    fn from(value: f64) -> Self {
        FilterValue::Decimal(value)
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        FilterValue::Boolean(value)
    }
}

/// `$filter={field} {op} {value}`. Non-finite decimals have no OData
/// literal and fail with `Serialization`.
pub fn filter_query(field: &str, option: FilterOption, value: &FilterValue) -> Result<String> {
    if let FilterValue::Decimal(n) = value {
        if !n.is_finite() {
            return Err(ApiError::Serialization(format!("filter value for {field} is not finite: {n}")));
        }
    }
    Ok(format!("$filter={field} {} {value}", option.as_str()))
}

fn escape_quotes(text: &str) -> String {
    text.replace('\'', "''")
}

/// Outcome of a script run through the OData `Script.*` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptResult {
    pub code: Option<i64>,
    pub result_parameter: Option<String>,
    pub message: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ScriptCall<'a, P: ?Sized> {
    pub script_parameter_value: &'a P,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ScriptResponse {
    pub script_result: ScriptResult,
}

/// One Data API record: the typed field data plus FileMaker's record metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record<T> {
    pub field_data: T,
    pub record_id: String,
    #[serde(default)]
    pub mod_id: String,
}

/// Identifiers returned by Data API create and edit calls.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordRef {
    #[serde(default)]
    pub record_id: Option<String>,
    #[serde(default)]
    pub mod_id: Option<String>,
}
