//! Typed cell values.
//!
//! A [`Cell`] is the envelope the grid reads: the typed value, a precomputed
//! display string, the owning column's options and a few flags. The value is a
//! closed tagged union whose tag always equals the column's [`CellKind`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::CellKind;

/// Tagged cell value. `None` / empty vec / `Null` mean "unset".
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Text(Option<String>),
    LongText(Option<String>),
    Email(Option<String>),
    Url(Option<String>),
    Number(Option<f64>),
    Rating(Option<f64>),
    Slider(Option<f64>),
    OpinionScale(Option<f64>),
    SingleChoice(Option<String>),
    MultiChoice(Vec<String>),
    DropDown(Vec<String>),
    List(Vec<String>),
    Ranking(Vec<RankingItem>),
    FileUpload(Vec<FileEntry>),
    PhoneNumber(Option<PhoneNumber>),
    Address(Option<Address>),
    Currency(Option<Currency>),
    ZipCode(Option<ZipCode>),
    YesNo(Option<bool>),
    /// Wire string, kept unmodified.
    Date(Option<String>),
    Time(Option<TimeOfDay>),
    CreatedTime(Option<String>),
    /// Formula result as computed by the server.
    Formula(Value),
    Enrichment(Option<String>),
}

impl CellValue {
    pub fn kind(&self) -> CellKind {
        match self {
            CellValue::Text(_) => CellKind::Text,
            CellValue::LongText(_) => CellKind::LongText,
            CellValue::Email(_) => CellKind::Email,
            CellValue::Url(_) => CellKind::Url,
            CellValue::Number(_) => CellKind::Number,
            CellValue::Rating(_) => CellKind::Rating,
            CellValue::Slider(_) => CellKind::Slider,
            CellValue::OpinionScale(_) => CellKind::OpinionScale,
            CellValue::SingleChoice(_) => CellKind::SingleChoice,
            CellValue::MultiChoice(_) => CellKind::MultiChoice,
            CellValue::DropDown(_) => CellKind::DropDown,
            CellValue::List(_) => CellKind::List,
            CellValue::Ranking(_) => CellKind::Ranking,
            CellValue::FileUpload(_) => CellKind::FileUpload,
            CellValue::PhoneNumber(_) => CellKind::PhoneNumber,
            CellValue::Address(_) => CellKind::Address,
            CellValue::Currency(_) => CellKind::Currency,
            CellValue::ZipCode(_) => CellKind::ZipCode,
            CellValue::YesNo(_) => CellKind::YesNo,
            CellValue::Date(_) => CellKind::Date,
            CellValue::Time(_) => CellKind::Time,
            CellValue::CreatedTime(_) => CellKind::CreatedTime,
            CellValue::Formula(_) => CellKind::Formula,
            CellValue::Enrichment(_) => CellKind::Enrichment,
        }
    }

    /// The unset value for a kind.
    pub fn empty(kind: CellKind) -> Self {
        match kind {
            CellKind::Text => CellValue::Text(None),
            CellKind::LongText => CellValue::LongText(None),
            CellKind::Email => CellValue::Email(None),
            CellKind::Url => CellValue::Url(None),
            CellKind::Number => CellValue::Number(None),
            CellKind::Rating => CellValue::Rating(None),
            CellKind::Slider => CellValue::Slider(None),
            CellKind::OpinionScale => CellValue::OpinionScale(None),
            CellKind::SingleChoice => CellValue::SingleChoice(None),
            CellKind::MultiChoice => CellValue::MultiChoice(Vec::new()),
            CellKind::DropDown => CellValue::DropDown(Vec::new()),
            CellKind::List => CellValue::List(Vec::new()),
            CellKind::Ranking => CellValue::Ranking(Vec::new()),
            CellKind::FileUpload => CellValue::FileUpload(Vec::new()),
            CellKind::PhoneNumber => CellValue::PhoneNumber(None),
            CellKind::Address => CellValue::Address(None),
            CellKind::Currency => CellValue::Currency(None),
            CellKind::ZipCode => CellValue::ZipCode(None),
            CellKind::YesNo => CellValue::YesNo(None),
            CellKind::Date => CellValue::Date(None),
            CellKind::Time => CellValue::Time(None),
            CellKind::CreatedTime => CellValue::CreatedTime(None),
            CellKind::Formula => CellValue::Formula(Value::Null),
            CellKind::Enrichment => CellValue::Enrichment(None),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == CellValue::empty(self.kind())
    }
}

/// Auxiliary state of server-computed cells, kept apart from the value.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ComputedMeta {
    pub error: Option<String>,
    pub loading: bool,
    pub expression: Option<String>,
}

/// A UI-ready cell.
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub value: CellValue,
    pub display_data: String,
    pub options: Arc<FieldOptions>,
    pub read_only: bool,
    /// Set when the wire value could not be parsed; `display_data` then
    /// holds the raw input.
    pub invalid: bool,
    pub computed: Option<ComputedMeta>,
}

impl Cell {
    pub fn kind(&self) -> CellKind {
        self.value.kind()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    pub fn is_loading(&self) -> bool {
        self.computed.as_ref().is_some_and(|m| m.loading)
    }
}

// ───────────────────────────────────────────────────────────────────
// Options
// ───────────────────────────────────────────────────────────────────

/// Type-specific column options. Unknown keys are ignored.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FieldOptions {
    pub choices: Vec<String>,
    pub max_rating: Option<f64>,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    /// Decimal places for numeric display.
    pub precision: Option<u32>,
    pub date_format: Option<DateFormat>,
    /// Source expression of a formula column.
    pub expression: Option<String>,
    pub currency_code: Option<String>,
    pub currency_symbol: Option<String>,
}

impl FieldOptions {
    pub const DEFAULT_MAX_RATING: f64 = 5.0;

    /// Parse options leniently; malformed options fall back to defaults.
    pub fn from_wire(raw: &Value) -> Self {
        match raw {
            Value::Null => Self::default(),
            Value::String(s) if s.trim().is_empty() => Self::default(),
            Value::String(s) => serde_json::from_str(s).unwrap_or_else(|e| {
                log::warn!("Ignoring malformed field options: {e}");
                Self::default()
            }),
            other => serde_json::from_value(other.clone()).unwrap_or_else(|e| {
                log::warn!("Ignoring malformed field options: {e}");
                Self::default()
            }),
        }
    }

    pub fn max_rating(&self) -> f64 {
        self.max_rating.unwrap_or(Self::DEFAULT_MAX_RATING)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DatePattern {
    #[default]
    #[serde(rename = "DDMMYYYY")]
    DayMonthYear,
    #[serde(rename = "MMDDYYYY")]
    MonthDayYear,
    #[serde(rename = "YYYYMMDD")]
    YearMonthDay,
}

/// Date display settings of a date column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DateFormat {
    pub format: DatePattern,
    pub separator: String,
    pub include_time: bool,
    pub is_twenty_four_hour: bool,
}

impl Default for DateFormat {
    fn default() -> Self {
        Self {
            format: DatePattern::default(),
            separator: "/".to_string(),
            include_time: false,
            is_twenty_four_hour: false,
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Structured values
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PhoneNumber {
    pub country_code: String,
    pub country_number: String,
    pub phone_number: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Address {
    pub address_line_one: String,
    pub address_line_two: String,
    pub zip_code: String,
    pub city: String,
    pub state: String,
    pub country: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Currency {
    pub currency_code: String,
    pub currency_symbol: String,
    pub currency_value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ZipCode {
    pub country_code: String,
    pub zip_code: String,
}

/// Time of day; `meridiem` is empty for 24-hour values.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeOfDay {
    pub time: String,
    pub meridiem: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingItem {
    pub id: String,
    pub rank: u32,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FileEntry {
    pub url: String,
    pub mime_type: String,
    pub name: String,
}

/// Structured values whose all-blank form means "unset".
pub(crate) trait Blank {
    fn is_blank(&self) -> bool;
}

impl Blank for PhoneNumber {
    fn is_blank(&self) -> bool {
        self.phone_number.trim().is_empty()
    }
}

impl Blank for Address {
    fn is_blank(&self) -> bool {
        [
            &self.address_line_one,
            &self.address_line_two,
            &self.zip_code,
            &self.city,
            &self.state,
            &self.country,
        ]
        .iter()
        .all(|s| s.trim().is_empty())
    }
}

impl Blank for Currency {
    fn is_blank(&self) -> bool {
        self.currency_value.trim().is_empty()
    }
}

impl Blank for ZipCode {
    fn is_blank(&self) -> bool {
        self.zip_code.trim().is_empty()
    }
}

impl Blank for TimeOfDay {
    fn is_blank(&self) -> bool {
        self.time.trim().is_empty()
    }
}
