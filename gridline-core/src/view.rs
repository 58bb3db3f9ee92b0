//! The active lens over a table.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::RowHeight;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViewType {
    #[default]
    Grid,
    Kanban,
    Gallery,
    Form,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortSpec {
    pub field_id: i64,
    #[serde(default)]
    pub order: SortOrder,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSpec {
    pub field_id: i64,
    #[serde(default)]
    pub order: SortOrder,
}

/// Persisted per-view presentation of one column. `None` leaves the
/// attribute untouched when merged.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ColumnMeta {
    pub width: Option<f64>,
    pub text_wrap: Option<bool>,
    pub is_hidden: Option<bool>,
}

impl ColumnMeta {
    pub fn merge(&mut self, patch: &ColumnMeta) {
        if patch.width.is_some() {
            self.width = patch.width;
        }
        if patch.text_wrap.is_some() {
            self.text_wrap = patch.text_wrap;
        }
        if patch.is_hidden.is_some() {
            self.is_hidden = patch.is_hidden;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KanbanOptions {
    /// Raw id of the field whose values form the stacks.
    pub stacking_field_id: i64,
}

/// A filter/sort/group/column configuration over a table.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct View {
    pub id: String,
    pub table_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub view_type: ViewType,
    /// Opaque filter tree; `null`, `{}` and `[]` mean "no filter".
    pub filter: Value,
    pub sort: Vec<SortSpec>,
    pub group: Vec<GroupSpec>,
    /// Keyed by the raw field id in string form.
    pub column_meta: HashMap<String, ColumnMeta>,
    pub frozen_columns: u32,
    pub row_height: RowHeight,
    pub kanban: Option<KanbanOptions>,
}

impl View {
    pub fn has_filter(&self) -> bool {
        match &self.filter {
            Value::Null => false,
            // `{"childs": []}` is how an emptied filter tree comes back.
            Value::Object(map) => match map.get("childs") {
                Some(Value::Array(childs)) if map.len() == 1 => !childs.is_empty(),
                _ => !map.is_empty(),
            },
            Value::Array(items) => !items.is_empty(),
            Value::String(s) => !s.trim().is_empty(),
            _ => true,
        }
    }

    /// Grid view with no filter, sort or grouping: the only projection that
    /// can absorb peer row/field mutations without a refetch.
    pub fn accepts_live_mutations(&self) -> bool {
        self.view_type == ViewType::Grid
            && !self.has_filter()
            && self.sort.is_empty()
            && self.group.is_empty()
    }

    pub fn needs_group_points(&self) -> bool {
        !self.group.is_empty() || self.view_type == ViewType::Kanban
    }

    pub fn is_stacking_field(&self, raw_field_id: i64) -> bool {
        self.view_type == ViewType::Kanban
            && self
                .kanban
                .as_ref()
                .is_some_and(|k| k.stacking_field_id == raw_field_id)
    }

    pub fn column_meta_for(&self, raw_field_id: i64) -> Option<&ColumnMeta> {
        self.column_meta.get(&raw_field_id.to_string())
    }

    /// Key under which rows carry their order within this view.
    pub fn order_key(&self) -> String {
        order_key(&self.id)
    }
}

pub fn order_key(view_id: &str) -> String {
    format!("_row_view_{view_id}")
}
