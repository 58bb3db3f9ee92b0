//! Authoritative in-memory table state.
//!
//! [`TableStore`] holds what one client knows about the active table: columns,
//! records, row headers, group points and views. It only exposes setters and
//! derived reads; all I/O and event policy lives in [`crate::engine`].
//!
//! Invariant: `records` and `row_headers` have the same length and the same
//! row at every index. Every setter keeps them aligned.
//!
//! Renderers never touch the store. They read an immutable
//! [`TableSnapshot`] that the engine publishes after each change. Records are
//! shared with published snapshots and copied on write, one row at a time.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use gridline_core::codec::redecode;
use gridline_core::ordering::{column_insertion_index, renumber};
use gridline_core::projection::backfill_cell;
use gridline_core::{
    Cell, Column, ColumnMeta, ComputedMeta, GroupPoint, GroupProjection, GroupSpec, Record,
    RowHeader, RowId, SortSpec, TableProjection, View,
};

use crate::config::EngineConfig;
use crate::engine::SyncPhase;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("{records} records but {headers} row headers")]
    Misaligned { records: usize, headers: usize },
    #[error("row header {index} belongs to {header}, record is {record}")]
    HeaderMismatch { index: usize, header: RowId, record: RowId },
}

/// Server-reported state of a computed column.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FormulaState {
    pub error: Option<String>,
    pub loading: bool,
}

/// A row taken out of the store, with the position it had.
#[derive(Debug, Clone, PartialEq)]
pub struct RemovedRow {
    pub index: usize,
    pub record: Record,
    pub header: RowHeader,
}

#[derive(Debug, Default)]
pub struct TableStore {
    columns: Vec<Column>,
    records: Vec<Arc<Record>>,
    row_headers: Vec<RowHeader>,
    group_points: Option<Vec<GroupPoint>>,
    views: Vec<View>,
    view: Option<View>,
    stale: bool,
    /// Column id → computed state.
    formula_state: HashMap<String, FormulaState>,
    version: u64,
}

impl TableStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(&mut self) {
        self.version += 1;
    }

    // ── Reads ────────────────────────────────────────────────────────────

    /// Incremented by every setter that changed something.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn visible_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| !c.hidden)
    }

    pub fn column(&self, id: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.id == id)
    }

    pub fn column_by_raw(&self, raw_id: i64) -> Option<&Column> {
        self.columns.iter().find(|c| c.raw_id == raw_id)
    }

    pub fn records(&self) -> &[Arc<Record>] {
        &self.records
    }

    pub fn row_headers(&self) -> &[RowHeader] {
        &self.row_headers
    }

    pub fn row_index(&self, id: RowId) -> Option<usize> {
        self.records.iter().position(|r| r.id == id)
    }

    pub fn record(&self, id: RowId) -> Option<&Record> {
        self.records.iter().find(|r| r.id == id).map(Arc::as_ref)
    }

    pub fn header(&self, id: RowId) -> Option<&RowHeader> {
        self.row_headers.iter().find(|h| h.id == id)
    }

    pub fn group_points(&self) -> Option<&[GroupPoint]> {
        self.group_points.as_deref()
    }

    pub fn view(&self) -> Option<&View> {
        self.view.as_ref()
    }

    pub fn views(&self) -> &[View] {
        &self.views
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn formula_state(&self, column_id: &str) -> Option<&FormulaState> {
        self.formula_state.get(column_id)
    }

    // ── Table ────────────────────────────────────────────────────────────

    /// Replace columns, records and row headers wholesale.
    pub fn replace_table(&mut self, table: TableProjection) -> Result<(), StoreError> {
        let TableProjection {
            columns,
            records,
            mut row_headers,
        } = table;
        if records.len() != row_headers.len() {
            return Err(StoreError::Misaligned {
                records: records.len(),
                headers: row_headers.len(),
            });
        }
        if let Some((index, (record, header))) = records
            .iter()
            .zip(&row_headers)
            .enumerate()
            .find(|(_, (r, h))| r.id != h.id)
        {
            return Err(StoreError::HeaderMismatch {
                index,
                header: header.id,
                record: record.id,
            });
        }
        renumber(&mut row_headers);
        self.columns = columns;
        self.records = records.into_iter().map(Arc::new).collect();
        self.row_headers = row_headers;
        let known: HashSet<&str> = self.columns.iter().map(|c| c.id.as_str()).collect();
        self.formula_state.retain(|id, _| known.contains(id.as_str()));
        let ids: Vec<String> = self.formula_state.keys().cloned().collect();
        self.apply_formula_state(&ids);
        self.stale = false;
        self.bump();
        Ok(())
    }

    /// Drop every column and row, e.g. when switching tables.
    pub fn clear_table(&mut self) {
        self.columns.clear();
        self.records.clear();
        self.row_headers.clear();
        self.group_points = None;
        self.formula_state.clear();
        self.stale = false;
        self.bump();
    }

    pub fn set_group_points(&mut self, points: Option<Vec<GroupPoint>>) {
        self.group_points = points;
        self.bump();
    }

    pub fn set_stale(&mut self, stale: bool) {
        if self.stale != stale {
            self.stale = stale;
            self.bump();
        }
    }

    // ── Rows ─────────────────────────────────────────────────────────────

    /// Insert a row at `index` (clamped). Returns the index used.
    pub fn insert_row(&mut self, index: usize, record: Record, order_value: f64) -> usize {
        let index = index.min(self.records.len());
        let height = self.view.as_ref().map(|v| v.row_height).unwrap_or_default();
        let header = RowHeader::new(record.id, index, height, order_value);
        self.records.insert(index, Arc::new(record));
        self.row_headers.insert(index, header);
        renumber(&mut self.row_headers);
        self.bump();
        index
    }

    /// Replace the row `target` in place, possibly under a new id.
    pub fn replace_row(&mut self, target: RowId, record: Record, order_value: Option<f64>) -> bool {
        let Some(index) = self.row_index(target) else {
            return false;
        };
        let header = &mut self.row_headers[index];
        header.id = record.id;
        if let Some(order) = order_value {
            header.order_value = order;
        }
        self.records[index] = Arc::new(record);
        self.bump();
        true
    }

    /// Remove every row in `ids` that is present. Returned rows are ordered
    /// by their former index.
    pub fn remove_rows(&mut self, ids: &[RowId]) -> Vec<RemovedRow> {
        let targets: HashSet<RowId> = ids.iter().copied().collect();
        let mut removed = Vec::new();
        let mut index = 0;
        let mut former = 0;
        while index < self.records.len() {
            if targets.contains(&self.records[index].id) {
                removed.push(RemovedRow {
                    index: former,
                    record: Arc::unwrap_or_clone(self.records.remove(index)),
                    header: self.row_headers.remove(index),
                });
            } else {
                index += 1;
            }
            former += 1;
        }
        if !removed.is_empty() {
            renumber(&mut self.row_headers);
            self.bump();
        }
        removed
    }

    /// Put rows back where they were. Rows already present are skipped.
    pub fn restore_rows(&mut self, mut rows: Vec<RemovedRow>) {
        rows.sort_by_key(|r| r.index);
        let mut restored = false;
        for row in rows {
            if self.row_index(row.record.id).is_some() {
                continue;
            }
            let index = row.index.min(self.records.len());
            self.records.insert(index, Arc::new(row.record));
            self.row_headers.insert(index, row.header);
            restored = true;
        }
        if restored {
            renumber(&mut self.row_headers);
            self.bump();
        }
    }

    /// Write cells into one row. Unknown rows and columns are skipped.
    pub fn patch_cells(&mut self, row: RowId, cells: Vec<(String, Cell)>) -> bool {
        let Some(index) = self.row_index(row) else {
            log::debug!("Patch for missing row {row}");
            return false;
        };
        let known: HashSet<&str> = self.columns.iter().map(|c| c.id.as_str()).collect();
        let changes: Vec<(String, Cell)> = cells
            .into_iter()
            .filter(|(id, cell)| {
                known.contains(id.as_str()) && self.records[index].cells.get(id) != Some(cell)
            })
            .collect();
        if changes.is_empty() {
            return false;
        }
        Arc::make_mut(&mut self.records[index]).cells.extend(changes);
        self.bump();
        true
    }

    /// Mark the computed cells of one row as loading until its echo arrives.
    pub fn mark_row_loading(&mut self, row: RowId) {
        let computed = self.computed_column_ids();
        let Some(index) = self.row_index(row) else {
            return;
        };
        let record = Arc::make_mut(&mut self.records[index]);
        for id in computed {
            if let Some(meta) = record.cells.get_mut(&id).and_then(|c| c.computed.as_mut()) {
                meta.loading = true;
            }
        }
        self.bump();
    }

    /// Drop row-level loading marks on `rows`. Cells fall back to the
    /// column's reported formula state.
    pub fn settle_rows(&mut self, rows: &[RowId]) {
        self.settle(|id| rows.contains(&id));
    }

    /// [`settle_rows`](Self::settle_rows) for every loaded row.
    pub fn settle_all_rows(&mut self) {
        self.settle(|_| true);
    }

    fn settle(&mut self, include: impl Fn(RowId) -> bool) {
        let computed: Vec<(String, bool)> = self
            .computed_column_ids()
            .into_iter()
            .map(|id| {
                let loading = self.formula_state.get(&id).is_some_and(|s| s.loading);
                (id, loading)
            })
            .collect();
        let mut changed = false;
        for record in &mut self.records {
            if !include(record.id) {
                continue;
            }
            let stuck = |record: &Record| {
                computed.iter().any(|(id, loading)| {
                    record
                        .cells
                        .get(id)
                        .and_then(|c| c.computed.as_ref())
                        .is_some_and(|m| m.loading != *loading)
                })
            };
            if !stuck(&**record) {
                continue;
            }
            let record = Arc::make_mut(record);
            for (id, loading) in &computed {
                if let Some(meta) = record.cells.get_mut(id).and_then(|c| c.computed.as_mut()) {
                    meta.loading = *loading;
                }
            }
            changed = true;
        }
        if changed {
            self.bump();
        }
    }

    fn computed_column_ids(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| c.kind.is_computed())
            .map(|c| c.id.clone())
            .collect()
    }

    // ── Computed state ───────────────────────────────────────────────────

    /// Record server-reported formula state and apply it to every cell of
    /// the affected columns.
    pub fn set_formula_state(&mut self, states: Vec<(String, FormulaState)>) {
        let ids: Vec<String> = states.iter().map(|(id, _)| id.clone()).collect();
        self.formula_state.extend(states);
        self.apply_formula_state(&ids);
        self.bump();
    }

    /// A computed value arrived for these columns.
    pub fn clear_loading(&mut self, column_ids: &[String]) {
        let mut changed = false;
        for id in column_ids {
            if let Some(state) = self.formula_state.get_mut(id) {
                changed |= state.loading;
                state.loading = false;
            }
        }
        if changed {
            self.bump();
        }
    }

    /// Re-apply stored formula state to freshly decoded cells.
    pub fn refresh_formula_cells(&mut self, column_ids: &[String]) {
        self.apply_formula_state(column_ids);
        self.bump();
    }

    fn apply_formula_state(&mut self, column_ids: &[String]) {
        for id in column_ids {
            let Some(state) = self.formula_state.get(id) else {
                continue;
            };
            let expression = self
                .columns
                .iter()
                .find(|c| &c.id == id)
                .and_then(|c| c.options.expression.clone());
            let meta = ComputedMeta {
                error: state.error.clone(),
                loading: state.loading,
                expression,
            };
            for record in &mut self.records {
                let Some(cell) = record.cells.get(id) else {
                    continue;
                };
                if cell.computed.as_ref() == Some(&meta) {
                    continue;
                }
                if let Some(cell) = Arc::make_mut(record).cells.get_mut(id) {
                    cell.computed = Some(meta.clone());
                }
            }
        }
    }

    // ── Columns ──────────────────────────────────────────────────────────

    /// Insert a column at its order position and backfill every record.
    /// A column whose field is already present is updated instead.
    pub fn insert_column(&mut self, column: Column) -> usize {
        if self
            .columns
            .iter()
            .any(|c| c.raw_id == column.raw_id || c.id == column.id)
        {
            let raw_id = column.raw_id;
            self.update_column(column);
            return self.columns.iter().position(|c| c.raw_id == raw_id).unwrap_or(0);
        }
        for record in &mut self.records {
            let cell = backfill_cell(record, &column);
            let record = Arc::make_mut(record);
            record.raw.remove(&column.id);
            record.cells.insert(column.id.clone(), cell);
        }
        let index = column_insertion_index(&self.columns, column.order);
        self.columns.insert(index, column);
        self.bump();
        index
    }

    /// Update a column's attributes. Identity (`id`, `raw_id`) never changes;
    /// cells are re-decoded when the type or options change.
    pub fn update_column(&mut self, incoming: Column) -> bool {
        let Some(index) = self.columns.iter().position(|c| c.raw_id == incoming.raw_id) else {
            log::debug!("Update for unknown field {}", incoming.raw_id);
            return false;
        };
        let existing = &mut self.columns[index];
        let retyped = existing.kind != incoming.kind || existing.options != incoming.options;
        let reorder = existing.order != incoming.order;
        existing.name = incoming.name;
        existing.field_type = incoming.field_type;
        existing.kind = incoming.kind;
        existing.options = incoming.options;
        existing.order = incoming.order;
        existing.width = incoming.width;
        existing.text_wrap = incoming.text_wrap;
        existing.hidden = incoming.hidden;

        if retyped {
            let column = existing.clone();
            for record in &mut self.records {
                let Some(cell) = record.cells.get(&column.id) else {
                    continue;
                };
                let cell = redecode(cell, &column);
                Arc::make_mut(record).cells.insert(column.id.clone(), cell);
            }
            self.apply_formula_state(&[column.id]);
        }
        if reorder {
            self.columns.sort_by(|a, b| a.order.total_cmp(&b.order));
        }
        self.bump();
        true
    }

    /// Remove columns by raw field id. Returns the removed column ids.
    pub fn remove_columns(&mut self, raw_ids: &[i64]) -> Vec<String> {
        let targets: HashSet<i64> = raw_ids.iter().copied().collect();
        let removed: Vec<String> = self
            .columns
            .iter()
            .filter(|c| targets.contains(&c.raw_id))
            .map(|c| c.id.clone())
            .collect();
        if removed.is_empty() {
            return removed;
        }
        self.columns.retain(|c| !targets.contains(&c.raw_id));
        for record in &mut self.records {
            if removed.iter().any(|id| record.cells.contains_key(id)) {
                let record = Arc::make_mut(record);
                for id in &removed {
                    record.cells.remove(id);
                }
            }
        }
        for id in &removed {
            self.formula_state.remove(id);
        }
        self.bump();
        removed
    }

    // ── Views ────────────────────────────────────────────────────────────

    pub fn set_views(&mut self, views: Vec<View>) {
        self.views = views;
        self.bump();
    }

    /// Make `view` the active view.
    pub fn set_view(&mut self, view: View) {
        if let Some(known) = self.views.iter_mut().find(|v| v.id == view.id) {
            *known = view.clone();
        }
        self.view = Some(view);
        self.bump();
    }

    fn with_view(&mut self, f: impl FnOnce(&mut View)) {
        if let Some(view) = self.view.as_mut() {
            f(view);
            let updated = view.clone();
            if let Some(known) = self.views.iter_mut().find(|v| v.id == updated.id) {
                *known = updated;
            }
            self.bump();
        }
    }

    pub fn set_sort(&mut self, sort: Vec<SortSpec>) {
        self.with_view(|v| v.sort = sort);
    }

    pub fn set_group(&mut self, group: Vec<GroupSpec>) {
        self.with_view(|v| v.group = group);
    }

    /// Merge column meta (keyed by raw field id) into the active view and
    /// its columns.
    pub fn apply_column_meta(&mut self, meta: &HashMap<String, ColumnMeta>, frozen_columns: Option<u32>) {
        self.with_view(|v| {
            for (field_id, patch) in meta {
                v.column_meta.entry(field_id.clone()).or_default().merge(patch);
            }
            if let Some(frozen) = frozen_columns {
                v.frozen_columns = frozen;
            }
        });
        for column in &mut self.columns {
            if let Some(patch) = meta.get(&column.raw_id.to_string()) {
                column.apply_meta(patch);
            }
        }
        self.bump();
    }

    // ── Derived ──────────────────────────────────────────────────────────

    /// Linear row projection of the current records.
    pub fn projection(&self, config: &EngineConfig, collapsed: &HashSet<String>) -> GroupProjection {
        let height = self.view.as_ref().map(|v| v.row_height).unwrap_or_default();
        let row_height = config.row_heights.px(height);
        let grouped = self.view.as_ref().is_some_and(View::needs_group_points);
        match (&self.group_points, grouped) {
            (Some(points), true) => GroupProjection::project_with_collapsed(
                points,
                config.include_append_row,
                config.header_height,
                row_height,
                collapsed,
            ),
            _ => GroupProjection::flat(self.records.len(), row_height, config.include_append_row),
        }
    }

    pub fn snapshot(&self, phase: SyncPhase, config: &EngineConfig, collapsed: &HashSet<String>) -> TableSnapshot {
        TableSnapshot {
            version: self.version,
            phase,
            view: self.view.clone(),
            columns: self.columns.clone(),
            records: self.records.clone(),
            row_headers: self.row_headers.clone(),
            projection: self.projection(config, collapsed),
            stale: self.stale,
        }
    }
}

/// Immutable view of the table handed to renderers.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TableSnapshot {
    pub version: u64,
    pub phase: SyncPhase,
    pub view: Option<View>,
    pub columns: Vec<Column>,
    pub records: Vec<Arc<Record>>,
    pub row_headers: Vec<RowHeader>,
    pub projection: GroupProjection,
    /// New data is available that the active view could not absorb.
    pub stale: bool,
}

impl TableSnapshot {
    pub fn is_loading(&self) -> bool {
        self.phase != SyncPhase::Synchronized
    }

    pub fn visible_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| !c.hidden)
    }

    pub fn record_at(&self, linear: usize) -> Option<&Record> {
        self.records
            .get(self.projection.linear_to_real(linear)?)
            .map(Arc::as_ref)
    }

    pub fn cell_at(&self, linear: usize, column_id: &str) -> Option<&Cell> {
        self.record_at(linear)?.cell(column_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridline_core::codec::decode;
    use gridline_core::projection::format_snapshot;
    use gridline_core::{CellValue, ColumnDefaults, FieldPayload, RawRow};
    use serde_json::json;

    fn table(rows: serde_json::Value) -> TableProjection {
        let fields: Vec<FieldPayload> = serde_json::from_value(json!([
            {"id": 1, "type": "SHORT_TEXT", "dbFieldName": "name", "order": 1},
            {"id": 2, "type": "FORMULA", "dbFieldName": "total", "order": 2,
             "options": {"expression": "{n} * 2"}},
        ]))
        .unwrap();
        let rows: Vec<RawRow> = serde_json::from_value(rows).unwrap();
        format_snapshot(&fields, &rows, None, &ColumnDefaults::default())
    }

    fn store_with(rows: serde_json::Value) -> TableStore {
        let mut store = TableStore::new();
        store.replace_table(table(rows)).unwrap();
        store
    }

    fn assert_aligned(store: &TableStore) {
        assert_eq!(store.records().len(), store.row_headers().len());
        for (i, (r, h)) in store.records().iter().zip(store.row_headers()).enumerate() {
            assert_eq!(r.id, h.id);
            assert_eq!(h.row_index, i);
            assert_eq!(h.display_index, i + 1);
        }
    }

    #[test]
    fn test_replace_table_rejects_misaligned() {
        let mut t = table(json!([{"__id": 1}, {"__id": 2}]));
        t.row_headers.pop();
        let mut store = TableStore::new();
        assert_eq!(
            store.replace_table(t),
            Err(StoreError::Misaligned { records: 2, headers: 1 })
        );

        let mut t = table(json!([{"__id": 1}, {"__id": 2}]));
        t.row_headers.swap(0, 1);
        assert!(matches!(store.replace_table(t), Err(StoreError::HeaderMismatch { index: 0, .. })));
        assert_eq!(store.version(), 0);
    }

    #[test]
    fn test_insert_replace_remove_keep_alignment() {
        let mut store = store_with(json!([{"__id": 1}, {"__id": 2}, {"__id": 3}]));

        let tmp = RowId::optimistic();
        assert_eq!(store.insert_row(1, Record::new(tmp), 1.5), 1);
        assert_aligned(&store);

        assert!(store.replace_row(tmp, Record::new(RowId::Server(9)), Some(1.5)));
        assert_eq!(store.records()[1].id, RowId::Server(9));
        assert!(store.row_index(tmp).is_none());
        assert_aligned(&store);

        let removed = store.remove_rows(&[RowId::Server(1), RowId::Server(3), RowId::Server(404)]);
        assert_eq!(removed.len(), 2);
        assert_eq!(removed[0].index, 0);
        assert_eq!(removed[1].index, 3);
        assert_aligned(&store);
        assert_eq!(store.records().len(), 2);

        store.restore_rows(removed);
        assert_aligned(&store);
        let ids: Vec<RowId> = store.records().iter().map(|r| r.id).collect();
        assert_eq!(
            ids,
            vec![RowId::Server(1), RowId::Server(9), RowId::Server(2), RowId::Server(3)]
        );
    }

    #[test]
    fn test_insert_row_clamps_index() {
        let mut store = store_with(json!([{"__id": 1}]));
        assert_eq!(store.insert_row(99, Record::new(RowId::Server(2)), 2.0), 1);
        assert_aligned(&store);
    }

    #[test]
    fn test_patch_cells_is_idempotent() {
        let mut store = store_with(json!([{"__id": 1, "name": "a"}]));
        let column = store.column("name").unwrap().clone();
        let cell = decode(&json!("b"), &column);

        assert!(store.patch_cells(RowId::Server(1), vec![("name".into(), cell.clone())]));
        let version = store.version();
        assert!(!store.patch_cells(RowId::Server(1), vec![("name".into(), cell)]));
        assert_eq!(store.version(), version);
        assert!(!store.patch_cells(RowId::Server(2), Vec::new()));
        assert_eq!(
            store.record(RowId::Server(1)).unwrap().cell("name").unwrap().value,
            CellValue::Text(Some("b".into()))
        );
    }

    #[test]
    fn test_formula_state_applies_to_every_cell() {
        let mut store = store_with(json!([{"__id": 1}, {"__id": 2}]));
        store.set_formula_state(vec![(
            "total".into(),
            FormulaState {
                error: Some("#REF".into()),
                loading: true,
            },
        )]);
        for record in store.records() {
            let meta = record.cell("total").unwrap().computed.as_ref().unwrap();
            assert_eq!(meta.error.as_deref(), Some("#REF"));
            assert!(meta.loading);
            assert_eq!(meta.expression.as_deref(), Some("{n} * 2"));
        }
        store.clear_loading(&["total".into()]);
        assert!(!store.formula_state("total").unwrap().loading);
    }

    #[test]
    fn test_column_lifecycle() {
        let mut store = store_with(json!([{"__id": 1, "late": 5}]));
        let field: FieldPayload =
            serde_json::from_value(json!({"id": 3, "type": "NUMBER", "dbFieldName": "late", "order": 1.5}))
                .unwrap();
        let column = gridline_core::projection::format_field(&field, 3.0, None, &ColumnDefaults::default());

        assert_eq!(store.insert_column(column.clone()), 1);
        let record = store.record(RowId::Server(1)).unwrap();
        assert_eq!(record.cell("late").unwrap().value, CellValue::Number(Some(5.0)));
        assert!(!record.raw.contains_key("late"));

        let mut renamed = column.clone();
        renamed.id = "renamed".into();
        renamed.name = "Late".into();
        renamed.order = 9.0;
        assert!(store.update_column(renamed));
        let last = store.columns().last().unwrap();
        assert_eq!(last.id, "late");
        assert_eq!(last.name, "Late");

        assert_eq!(store.remove_columns(&[3]), vec!["late".to_string()]);
        assert!(store.record(RowId::Server(1)).unwrap().cell("late").is_none());
        assert!(store.remove_columns(&[3]).is_empty());
    }

    #[test]
    fn test_column_type_change_redecodes_cells() {
        let mut store = store_with(json!([{"__id": 1, "name": "12"}]));
        let mut column = store.column("name").unwrap().clone();
        column.field_type = gridline_core::FieldType::Number;
        column.kind = gridline_core::CellKind::Number;
        store.update_column(column);
        let cell = store.record(RowId::Server(1)).unwrap().cell("name").unwrap();
        assert_eq!(cell.value, CellValue::Number(Some(12.0)));
    }

    #[test]
    fn test_column_meta_merges_into_view_and_columns() {
        let mut store = store_with(json!([]));
        store.set_view(View {
            id: "v".into(),
            ..View::default()
        });
        let mut meta = HashMap::new();
        meta.insert(
            "1".to_string(),
            ColumnMeta {
                width: Some(321.0),
                ..ColumnMeta::default()
            },
        );
        store.apply_column_meta(&meta, Some(2));
        assert_eq!(store.column("name").unwrap().width, 321.0);
        let view = store.view().unwrap();
        assert_eq!(view.frozen_columns, 2);
        assert_eq!(view.column_meta_for(1).unwrap().width, Some(321.0));
    }

    #[test]
    fn test_projection_flat_without_grouping() {
        let mut store = store_with(json!([{"__id": 1}, {"__id": 2}]));
        store.set_group_points(Some(vec![GroupPoint::Leaf]));
        let config = EngineConfig::default();
        let projection = store.projection(&config, &HashSet::new());
        // No view groups, so points are ignored.
        assert_eq!(projection.len(), 3);

        let snapshot = store.snapshot(SyncPhase::Synchronized, &config, &HashSet::new());
        assert!(!snapshot.is_loading());
        assert_eq!(snapshot.record_at(1).unwrap().id, RowId::Server(2));
        assert!(snapshot.record_at(2).is_none());
    }

    #[test]
    fn test_settle_rows_clears_row_loading() {
        let mut store = store_with(json!([{"__id": 1}, {"__id": 2}]));
        store.mark_row_loading(RowId::Server(1));
        store.mark_row_loading(RowId::Server(2));
        let loading = |store: &TableStore, row| {
            store.record(RowId::Server(row)).unwrap().cell("total").unwrap().is_loading()
        };
        assert!(loading(&store, 1));

        store.settle_rows(&[RowId::Server(1)]);
        assert!(!loading(&store, 1));
        assert!(loading(&store, 2));

        // Column-level state still wins over a settled row.
        store.set_formula_state(vec![("total".into(), FormulaState { error: None, loading: true })]);
        store.settle_all_rows();
        assert!(loading(&store, 1));
        assert!(loading(&store, 2));
    }

    #[test]
    fn test_type_round_trip_keeps_invalid_input() {
        let mut store = store_with(json!([{"__id": 1, "name": "abc"}]));
        let text = store.column("name").unwrap().clone();
        let mut number = text.clone();
        number.field_type = gridline_core::FieldType::Number;
        number.kind = gridline_core::CellKind::Number;

        store.update_column(number);
        let cell = store.record(RowId::Server(1)).unwrap().cell("name").unwrap();
        assert!(cell.invalid);

        store.update_column(text);
        let cell = store.record(RowId::Server(1)).unwrap().cell("name").unwrap();
        assert_eq!(cell.value, CellValue::Text(Some("abc".into())));
    }

    #[test]
    fn test_snapshot_shares_untouched_rows() {
        let mut store = store_with(json!([{"__id": 1, "name": "a"}, {"__id": 2, "name": "b"}]));
        let config = EngineConfig::default();
        let before = store.snapshot(SyncPhase::Synchronized, &config, &HashSet::new());

        let cell = decode(&json!("c"), store.column("name").unwrap());
        store.patch_cells(RowId::Server(2), vec![("name".into(), cell)]);
        let after = store.snapshot(SyncPhase::Synchronized, &config, &HashSet::new());

        assert!(Arc::ptr_eq(&before.records[0], &after.records[0]));
        assert!(!Arc::ptr_eq(&before.records[1], &after.records[1]));
        assert_eq!(before.records[1].cell("name").unwrap().display_data, "b");
    }
}
