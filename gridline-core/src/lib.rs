//! # gridline-core: Table model for the Gridline sync engine
//!
//! Everything here is pure data and pure functions: no I/O, no async.
//!
//! ```text
//!   wire payloads ──► projection ──► Column / Record / RowHeader
//!                        │
//!                        ▼
//!                      codec  (Value ⇄ Cell, total)
//!
//!   RowHeader.order_value ──► ordering   (insertion points, midpoints)
//!   GroupPoint[]          ──► grouping   (linear rows + index map)
//! ```
//!
//! ## Modules
//!
//! - [`cell`]: `Cell` envelope, `CellValue` tagged union, field options
//! - [`codec`]: decode/encode between wire values and cells
//! - [`projection`]: snapshot / created-row / row-update formatters
//! - [`ordering`]: fractional order values and insertion indices
//! - [`grouping`]: group points → renderable linear rows
//! - [`view`]: active view description (filter/sort/group/column meta)

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub mod cell;
pub mod codec;
pub mod grouping;
pub mod ordering;
pub mod projection;
pub mod view;

pub use cell::{
    Address, Cell, CellValue, ComputedMeta, Currency, DateFormat, DatePattern, FieldOptions,
    FileEntry, PhoneNumber, RankingItem, TimeOfDay, ZipCode,
};
pub use codec::{decode, empty_cell, encode_for_wire, redecode};
pub use grouping::{GroupPoint, GroupProjection, LinearRow, LinearRowKind};
pub use projection::{
    ColumnDefaults, FieldPayload, FieldValuePayload, RawRow, RowPatchSet, RowUpdatePayload,
    TableProjection,
};
pub use view::{ColumnMeta, GroupSpec, KanbanOptions, SortOrder, SortSpec, View, ViewType};

/// Prefix of row ids minted locally before the server has confirmed them.
pub const OPTIMISTIC_ID_PREFIX: &str = "tmp-";

// ───────────────────────────────────────────────────────────────────
// Field types
// ───────────────────────────────────────────────────────────────────

/// Wire type tag of a field, as sent by the server.
///
/// Unknown tags are preserved so they can be echoed back, and render as text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FieldType {
    ShortText,
    LongText,
    Email,
    Url,
    Number,
    Rating,
    Slider,
    OpinionScale,
    Scq,
    Mcq,
    DropDown,
    List,
    Ranking,
    FilePicker,
    PhoneNumber,
    Address,
    Currency,
    ZipCode,
    YesNo,
    Date,
    Time,
    CreatedTime,
    Formula,
    Enrichment,
    Unknown(String),
}

impl FieldType {
    pub fn from_wire(tag: &str) -> Self {
        match tag.trim().to_ascii_uppercase().as_str() {
            "SHORT_TEXT" => Self::ShortText,
            "LONG_TEXT" => Self::LongText,
            "EMAIL" => Self::Email,
            "URL" => Self::Url,
            "NUMBER" => Self::Number,
            "RATING" => Self::Rating,
            "SLIDER" => Self::Slider,
            "OPINION_SCALE" => Self::OpinionScale,
            "SCQ" => Self::Scq,
            "MCQ" => Self::Mcq,
            "DROP_DOWN" => Self::DropDown,
            "LIST" => Self::List,
            "RANKING" => Self::Ranking,
            "FILE_PICKER" => Self::FilePicker,
            "PHONE_NUMBER" => Self::PhoneNumber,
            "ADDRESS" => Self::Address,
            "CURRENCY" => Self::Currency,
            "ZIP_CODE" => Self::ZipCode,
            "YES_NO" => Self::YesNo,
            "DATE" => Self::Date,
            "TIME" => Self::Time,
            "CREATED_TIME" => Self::CreatedTime,
            "FORMULA" => Self::Formula,
            "ENRICHMENT" => Self::Enrichment,
            _ => Self::Unknown(tag.to_string()),
        }
    }

    pub fn as_wire(&self) -> &str {
        match self {
            Self::ShortText => "SHORT_TEXT",
            Self::LongText => "LONG_TEXT",
            Self::Email => "EMAIL",
            Self::Url => "URL",
            Self::Number => "NUMBER",
            Self::Rating => "RATING",
            Self::Slider => "SLIDER",
            Self::OpinionScale => "OPINION_SCALE",
            Self::Scq => "SCQ",
            Self::Mcq => "MCQ",
            Self::DropDown => "DROP_DOWN",
            Self::List => "LIST",
            Self::Ranking => "RANKING",
            Self::FilePicker => "FILE_PICKER",
            Self::PhoneNumber => "PHONE_NUMBER",
            Self::Address => "ADDRESS",
            Self::Currency => "CURRENCY",
            Self::ZipCode => "ZIP_CODE",
            Self::YesNo => "YES_NO",
            Self::Date => "DATE",
            Self::Time => "TIME",
            Self::CreatedTime => "CREATED_TIME",
            Self::Formula => "FORMULA",
            Self::Enrichment => "ENRICHMENT",
            Self::Unknown(tag) => tag,
        }
    }

    /// Rendering type derived from the wire type.
    pub fn cell_kind(&self) -> CellKind {
        match self {
            Self::ShortText | Self::Unknown(_) => CellKind::Text,
            Self::LongText => CellKind::LongText,
            Self::Email => CellKind::Email,
            Self::Url => CellKind::Url,
            Self::Number => CellKind::Number,
            Self::Rating => CellKind::Rating,
            Self::Slider => CellKind::Slider,
            Self::OpinionScale => CellKind::OpinionScale,
            Self::Scq => CellKind::SingleChoice,
            Self::Mcq => CellKind::MultiChoice,
            Self::DropDown => CellKind::DropDown,
            Self::List => CellKind::List,
            Self::Ranking => CellKind::Ranking,
            Self::FilePicker => CellKind::FileUpload,
            Self::PhoneNumber => CellKind::PhoneNumber,
            Self::Address => CellKind::Address,
            Self::Currency => CellKind::Currency,
            Self::ZipCode => CellKind::ZipCode,
            Self::YesNo => CellKind::YesNo,
            Self::Date => CellKind::Date,
            Self::Time => CellKind::Time,
            Self::CreatedTime => CellKind::CreatedTime,
            Self::Formula => CellKind::Formula,
            Self::Enrichment => CellKind::Enrichment,
        }
    }
}

impl From<String> for FieldType {
    fn from(tag: String) -> Self {
        Self::from_wire(&tag)
    }
}

impl From<FieldType> for String {
    fn from(ty: FieldType) -> Self {
        ty.as_wire().to_string()
    }
}

/// Rendering type of a column; every cell in the column carries the same tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CellKind {
    Text,
    LongText,
    Email,
    Url,
    Number,
    Rating,
    Slider,
    OpinionScale,
    SingleChoice,
    MultiChoice,
    DropDown,
    List,
    Ranking,
    FileUpload,
    PhoneNumber,
    Address,
    Currency,
    ZipCode,
    YesNo,
    Date,
    Time,
    CreatedTime,
    Formula,
    Enrichment,
}

impl CellKind {
    pub const ALL: [CellKind; 24] = [
        CellKind::Text,
        CellKind::LongText,
        CellKind::Email,
        CellKind::Url,
        CellKind::Number,
        CellKind::Rating,
        CellKind::Slider,
        CellKind::OpinionScale,
        CellKind::SingleChoice,
        CellKind::MultiChoice,
        CellKind::DropDown,
        CellKind::List,
        CellKind::Ranking,
        CellKind::FileUpload,
        CellKind::PhoneNumber,
        CellKind::Address,
        CellKind::Currency,
        CellKind::ZipCode,
        CellKind::YesNo,
        CellKind::Date,
        CellKind::Time,
        CellKind::CreatedTime,
        CellKind::Formula,
        CellKind::Enrichment,
    ];

    /// Server-computed kinds. The client never edits these.
    pub fn is_computed(self) -> bool {
        matches!(self, CellKind::Formula | CellKind::Enrichment)
    }

    pub fn is_read_only(self) -> bool {
        self.is_computed() || self == CellKind::CreatedTime
    }
}

// ───────────────────────────────────────────────────────────────────
// Columns
// ───────────────────────────────────────────────────────────────────

/// Schema entry for one column.
///
/// `id` (the field's `dbFieldName`) and `raw_id` (the server field id) never
/// change once the column exists; everything else is an attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub id: String,
    pub raw_id: i64,
    pub name: String,
    pub field_type: FieldType,
    pub kind: CellKind,
    pub options: Arc<FieldOptions>,
    pub order: f64,
    pub width: f64,
    pub text_wrap: bool,
    pub hidden: bool,
}

impl Column {
    pub fn read_only(&self) -> bool {
        self.kind.is_read_only()
    }

    /// Apply persisted per-view presentation metadata.
    pub fn apply_meta(&mut self, meta: &ColumnMeta) {
        if let Some(width) = meta.width {
            self.width = width;
        }
        if let Some(wrap) = meta.text_wrap {
            self.text_wrap = wrap;
        }
        if let Some(hidden) = meta.is_hidden {
            self.hidden = hidden;
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Rows
// ───────────────────────────────────────────────────────────────────

/// Row identity: a confirmed server id or a local optimistic placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RowId {
    Server(i64),
    Optimistic(Uuid),
}

impl RowId {
    pub fn optimistic() -> Self {
        RowId::Optimistic(Uuid::new_v4())
    }

    pub fn server_id(&self) -> Option<i64> {
        match self {
            RowId::Server(id) => Some(*id),
            RowId::Optimistic(_) => None,
        }
    }

    pub fn is_optimistic(&self) -> bool {
        matches!(self, RowId::Optimistic(_))
    }

    /// Parse the string form produced by `Display`.
    pub fn parse(s: &str) -> Option<Self> {
        if let Some(rest) = s.strip_prefix(OPTIMISTIC_ID_PREFIX) {
            return Uuid::parse_str(rest).ok().map(RowId::Optimistic);
        }
        s.trim().parse::<i64>().ok().map(RowId::Server)
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowId::Server(id) => write!(f, "{id}"),
            RowId::Optimistic(id) => write!(f, "{OPTIMISTIC_ID_PREFIX}{id}"),
        }
    }
}

/// One data row: a cell per column plus raw side-channel values.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: RowId,
    pub cells: HashMap<String, Cell>,
    /// Values the server sent that no current column claims (e.g.
    /// `__created_time`), kept for columns created after the fetch.
    pub raw: HashMap<String, Value>,
}

impl Record {
    pub fn new(id: RowId) -> Self {
        Self {
            id,
            cells: HashMap::new(),
            raw: HashMap::new(),
        }
    }

    pub fn cell(&self, column_id: &str) -> Option<&Cell> {
        self.cells.get(column_id)
    }
}

/// Row height class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RowHeight {
    #[default]
    Short,
    Medium,
    Tall,
    ExtraTall,
}

/// Per-row presentation metadata, derived from the record list.
#[derive(Debug, Clone, PartialEq)]
pub struct RowHeader {
    pub id: RowId,
    pub row_index: usize,
    /// 1-based index shown in the gutter.
    pub display_index: usize,
    pub height: RowHeight,
    pub order_value: f64,
}

impl RowHeader {
    pub fn new(id: RowId, row_index: usize, height: RowHeight, order_value: f64) -> Self {
        Self {
            id,
            row_index,
            display_index: row_index + 1,
            height,
            order_value,
        }
    }
}
