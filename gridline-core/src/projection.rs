//! Formatters turning server payloads into table state.
//!
//! Three entry points, one per kind of server message:
//!
//! - [`format_snapshot`]: full field + row list → columns, records, headers
//! - [`format_created_row`]: one freshly created row → record + order value
//! - [`format_row_updates`]: batched `(row, [(field, value)])` → cell patches
//!
//! Field ids in updates are resolved against `Column::raw_id`, never by
//! position. Rows or fields the client does not have are skipped: the event
//! targets state that is not loaded yet.

use std::borrow::Borrow;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::codec::{decode, empty_cell};
use crate::view::order_key;
use crate::{Cell, CellKind, Column, FieldOptions, FieldType, Record, RowHeader, RowId, View};

/// A row as sent by the server: `dbFieldName → value`, plus `__`-prefixed
/// system keys.
pub type RawRow = serde_json::Map<String, Value>;

/// Server key holding the numeric row id.
pub const ROW_ID_KEY: &str = "__id";
/// Server key holding the row creation timestamp.
pub const CREATED_TIME_KEY: &str = "__created_time";

// ───────────────────────────────────────────────────────────────────
// Wire payloads
// ───────────────────────────────────────────────────────────────────

/// Field descriptor as sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldPayload {
    #[serde(deserialize_with = "lenient_id")]
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub db_field_name: String,
    #[serde(default)]
    pub order: Option<f64>,
    #[serde(default)]
    pub options: Value,
}

/// One row's worth of changed fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowUpdatePayload {
    #[serde(deserialize_with = "lenient_id")]
    pub row_id: i64,
    #[serde(default)]
    pub fields_info: Vec<FieldValuePayload>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldValuePayload {
    #[serde(deserialize_with = "lenient_id")]
    pub field_id: i64,
    #[serde(default)]
    pub data: Value,
}

/// Accept an id sent either as a JSON number or a numeric string.
pub fn lenient_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    let raw = Value::deserialize(deserializer)?;
    id_from_value(&raw).ok_or_else(|| serde::de::Error::custom(format!("expected numeric id, got {raw}")))
}

/// Same as [`lenient_id`] for a list of ids.
pub fn lenient_ids<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<i64>, D::Error> {
    let raw = Vec::<Value>::deserialize(deserializer)?;
    raw.iter()
        .map(|v| id_from_value(v).ok_or_else(|| serde::de::Error::custom(format!("expected numeric id, got {v}"))))
        .collect()
}

pub fn id_from_value(raw: &Value) -> Option<i64> {
    match raw {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// ───────────────────────────────────────────────────────────────────
// Column defaults
// ───────────────────────────────────────────────────────────────────

/// Default column widths (px) per rendering type, used when the view has no
/// persisted width.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnDefaults {
    pub text: f64,
    pub long_text: f64,
    pub numeric: f64,
    pub choice: f64,
    pub structured: f64,
    pub date: f64,
    pub computed: f64,
}

impl Default for ColumnDefaults {
    fn default() -> Self {
        Self {
            text: 180.0,
            long_text: 260.0,
            numeric: 120.0,
            choice: 200.0,
            structured: 240.0,
            date: 160.0,
            computed: 200.0,
        }
    }
}

impl ColumnDefaults {
    pub fn width_for(&self, kind: CellKind) -> f64 {
        match kind {
            CellKind::Text | CellKind::Email | CellKind::Url | CellKind::SingleChoice => self.text,
            CellKind::LongText => self.long_text,
            CellKind::Number
            | CellKind::Rating
            | CellKind::Slider
            | CellKind::OpinionScale
            | CellKind::YesNo => self.numeric,
            CellKind::MultiChoice
            | CellKind::DropDown
            | CellKind::List
            | CellKind::Ranking
            | CellKind::FileUpload => self.choice,
            CellKind::PhoneNumber | CellKind::Address | CellKind::Currency | CellKind::ZipCode => {
                self.structured
            }
            CellKind::Date | CellKind::Time | CellKind::CreatedTime => self.date,
            CellKind::Formula | CellKind::Enrichment => self.computed,
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Snapshot
// ───────────────────────────────────────────────────────────────────

/// Columns, records and row headers built from one fetch.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TableProjection {
    pub columns: Vec<Column>,
    pub records: Vec<Record>,
    pub row_headers: Vec<RowHeader>,
}

/// Build a column from a field descriptor.
pub fn format_field(
    field: &FieldPayload,
    fallback_order: f64,
    view: Option<&View>,
    defaults: &ColumnDefaults,
) -> Column {
    let kind = field.field_type.cell_kind();
    let mut column = Column {
        id: field.db_field_name.clone(),
        raw_id: field.id,
        name: field.name.clone(),
        field_type: field.field_type.clone(),
        kind,
        options: Arc::new(FieldOptions::from_wire(&field.options)),
        order: field.order.unwrap_or(fallback_order),
        width: defaults.width_for(kind),
        text_wrap: false,
        hidden: false,
    };
    if let Some(meta) = view.and_then(|v| v.column_meta_for(field.id)) {
        column.apply_meta(meta);
    }
    column
}

/// Build the full table from a fetch.
pub fn format_snapshot(
    fields: &[FieldPayload],
    rows: &[RawRow],
    view: Option<&View>,
    defaults: &ColumnDefaults,
) -> TableProjection {
    let mut seen_fields = HashSet::new();
    let mut columns: Vec<Column> = Vec::with_capacity(fields.len());
    for (index, field) in fields.iter().enumerate() {
        if !seen_fields.insert(field.id) || columns.iter().any(|c| c.id == field.db_field_name) {
            log::warn!("Duplicate field {} ({}) in snapshot, keeping first", field.id, field.db_field_name);
            continue;
        }
        columns.push(format_field(field, (index + 1) as f64, view, defaults));
    }
    columns.sort_by(|a, b| a.order.total_cmp(&b.order));

    let view_order_key = view.map(View::order_key);
    let height = view.map(|v| v.row_height).unwrap_or_default();

    let mut seen_rows = HashSet::new();
    let mut records = Vec::with_capacity(rows.len());
    let mut row_headers = Vec::with_capacity(rows.len());
    for (position, row) in rows.iter().enumerate() {
        let Some(id) = row.get(ROW_ID_KEY).and_then(id_from_value) else {
            log::warn!("Skipping snapshot row {position} without a numeric {ROW_ID_KEY}");
            continue;
        };
        if !seen_rows.insert(id) {
            log::warn!("Duplicate row {id} in snapshot, keeping first");
            continue;
        }
        let order_value = row_order_value(row, view_order_key.as_deref(), Some(position));
        let record = record_from_row(RowId::Server(id), row, &columns);
        row_headers.push(RowHeader::new(record.id, records.len(), height, order_value));
        records.push(record);
    }

    TableProjection {
        columns,
        records,
        row_headers,
    }
}

fn record_from_row(id: RowId, row: &RawRow, columns: &[Column]) -> Record {
    let mut record = Record::new(id);
    for column in columns {
        let cell = match row.get(&column.id) {
            Some(raw) => decode(raw, column),
            None => empty_cell(column.kind, column.options.clone()),
        };
        record.cells.insert(column.id.clone(), cell);
    }
    for (key, value) in row {
        if !record.cells.contains_key(key) {
            record.raw.insert(key.clone(), value.clone());
        }
    }
    record
}

/// Order value of a row: per-view order key, else numeric id, else position.
pub fn row_order_value(row: &RawRow, view_order_key: Option<&str>, position: Option<usize>) -> f64 {
    view_order_key
        .and_then(|key| row.get(key))
        .and_then(Value::as_f64)
        .or_else(|| row.get(ROW_ID_KEY).and_then(id_from_value).map(|id| id as f64))
        .or(position.map(|p| p as f64))
        .unwrap_or(0.0)
}

// ───────────────────────────────────────────────────────────────────
// Created row
// ───────────────────────────────────────────────────────────────────

/// Build a record for a freshly created row.
///
/// Columns the payload omits get empty cells; this covers a column created
/// concurrently with the row. Returns `None` when the row carries no id.
pub fn format_created_row(row: &RawRow, columns: &[Column], view_id: Option<&str>) -> Option<(Record, f64)> {
    let id = row.get(ROW_ID_KEY).and_then(id_from_value)?;
    let key = view_id.map(order_key);
    let order_value = row_order_value(row, key.as_deref(), None);
    Some((record_from_row(RowId::Server(id), row, columns), order_value))
}

/// Cell for `column` in a record that predates the column.
pub fn backfill_cell(record: &Record, column: &Column) -> Cell {
    let raw = record.raw.get(&column.id).or_else(|| {
        (column.kind == CellKind::CreatedTime)
            .then(|| record.raw.get(CREATED_TIME_KEY))
            .flatten()
    });
    match raw {
        Some(raw) => decode(raw, column),
        None => empty_cell(column.kind, column.options.clone()),
    }
}

// ───────────────────────────────────────────────────────────────────
// Row updates
// ───────────────────────────────────────────────────────────────────

/// Decoded cell patches for a batch of row updates.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RowPatchSet {
    /// Row → `(column id, new cell)`, in arrival order, last write wins.
    pub patches: HashMap<RowId, Vec<(String, Cell)>>,
    /// Columns whose loading indicator the update clears.
    pub clear_loading: Vec<String>,
    /// Formula columns touched by the update.
    pub formula_fields: Vec<String>,
}

impl RowPatchSet {
    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    /// Raw field ids are not kept; callers that need them resolve via columns.
    pub fn touched_columns(&self) -> HashSet<&str> {
        self.patches
            .values()
            .flat_map(|cells| cells.iter().map(|(id, _)| id.as_str()))
            .collect()
    }
}

/// Decode only the changed cells of a batch of row updates.
pub fn format_row_updates<R: Borrow<Record>>(
    updates: &[RowUpdatePayload],
    columns: &[Column],
    records: &[R],
) -> RowPatchSet {
    let by_raw: HashMap<i64, &Column> = columns.iter().map(|c| (c.raw_id, c)).collect();
    let known: HashSet<RowId> = records.iter().map(|r| r.borrow().id).collect();

    let mut set = RowPatchSet::default();
    for update in updates {
        let row_id = RowId::Server(update.row_id);
        if !known.contains(&row_id) {
            log::debug!("Update for unloaded row {row_id}, skipping");
            continue;
        }
        for field in &update.fields_info {
            let Some(column) = by_raw.get(&field.field_id) else {
                log::debug!("Update for unknown field {} on row {row_id}, skipping", field.field_id);
                continue;
            };
            let cell = decode(&field.data, column);
            let patch = set.patches.entry(row_id).or_default();
            match patch.iter_mut().find(|(id, _)| *id == column.id) {
                Some(existing) => existing.1 = cell,
                None => patch.push((column.id.clone(), cell)),
            }
            if column.kind.is_computed() && !set.clear_loading.contains(&column.id) {
                set.clear_loading.push(column.id.clone());
            }
            if column.kind == CellKind::Formula && !set.formula_fields.contains(&column.id) {
                set.formula_fields.push(column.id.clone());
            }
        }
    }
    set
}
