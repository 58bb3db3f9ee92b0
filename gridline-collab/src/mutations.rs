//! Optimistic local edits.
//!
//! Every mutation updates the [`TableStore`](crate::store::TableStore) first,
//! publishes, and only then talks to the server. Creates go out as `row_create`
//! with a `tmp-` placeholder on screen until the echo arrives; updates batch
//! every touched field of a row into one `row_update` entry. Edits to a
//! placeholder are held back and sent when the echo names its server id.

use std::collections::HashMap;

use serde_json::Value;

use gridline_core::codec::{decode, empty_cell, encode_for_wire};
use gridline_core::ordering::order_between;
use gridline_core::{Cell, ColumnMeta, FieldValuePayload, Record, RowId, RowUpdatePayload};

use crate::api::{ApiError, DeletionApi};
use crate::connection::Connection;
use crate::engine::{Notice, SyncEngine, ViewKey};
use crate::protocol::{
    ColumnMetaPatch, ColumnMetaRequest, OutboundEvent, ProtocolError, RowCreateRequest, RowOrder,
    RowUpdateRequest,
};
use crate::store::RemovedRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPosition {
    Above,
    Below,
}

/// One user edit: the new cell for `column_id` in `row`.
#[derive(Debug, Clone, PartialEq)]
pub struct CellEdit {
    pub row: RowId,
    pub column_id: String,
    pub cell: Cell,
}

impl CellEdit {
    pub fn new(row: RowId, column_id: impl Into<String>, cell: Cell) -> Self {
        Self {
            row,
            column_id: column_id.into(),
            cell,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MutationError {
    #[error("not connected")]
    NotConnected,
    #[error("no active view")]
    NoActiveView,
    #[error("unknown column {0}")]
    UnknownColumn(String),
    #[error("no record at linear row {0}")]
    NoRecordAt(usize),
    #[error("transport error: {0}")]
    Transport(#[from] ProtocolError),
    /// The server refused a delete. `removed` holds the rows taken off
    /// screen so the caller can put them back with `restore_rows`.
    #[error("delete rejected: {source}")]
    Rejected {
        source: ApiError,
        removed: Vec<RemovedRow>,
    },
}

/// Rows already taken off screen, waiting for the server to confirm the
/// delete.
#[derive(Debug)]
pub struct PendingDelete {
    table_id: String,
    record_ids: Vec<i64>,
    removed: Vec<RemovedRow>,
}

impl PendingDelete {
    pub fn table_id(&self) -> &str {
        &self.table_id
    }

    /// Server ids to delete. Empty when only placeholders were removed.
    pub fn record_ids(&self) -> &[i64] {
        &self.record_ids
    }
}

impl<C: Connection> SyncEngine<C> {
    fn active_key(&self) -> Result<ViewKey, MutationError> {
        self.key.clone().ok_or(MutationError::NoActiveView)
    }

    fn require_connection(&self, action: &str) -> Result<(), MutationError> {
        if self.conn.is_connected() {
            return Ok(());
        }
        self.notify(Notice::Warning(format!("Offline: could not {action}")));
        Err(MutationError::NotConnected)
    }

    /// Insert an optimistic row next to `anchor` (or at the end) and ask the
    /// server to create it. Returns the placeholder id.
    ///
    /// `seed` holds initial wire values keyed by column id; read-only and
    /// unknown columns are ignored.
    pub fn create_row(
        &mut self,
        anchor: Option<RowId>,
        position: InsertPosition,
        seed: Vec<(String, Value)>,
    ) -> Result<RowId, MutationError> {
        let key = self.active_key()?;
        self.require_connection("create a row")?;

        let headers = self.store.row_headers();
        let anchor_index = anchor.and_then(|id| self.store.row_index(id));
        let (index, before, after) = match (anchor_index, position) {
            (Some(i), InsertPosition::Above) => (
                i,
                i.checked_sub(1).map(|p| headers[p].order_value),
                Some(headers[i].order_value),
            ),
            (Some(i), InsertPosition::Below) => (
                i + 1,
                Some(headers[i].order_value),
                headers.get(i + 1).map(|h| h.order_value),
            ),
            (None, _) => (headers.len(), headers.last().map(|h| h.order_value), None),
        };
        let order_value = order_between(before, after);

        let placeholder = RowId::optimistic();
        let mut record = Record::new(placeholder);
        let mut fields_info = Vec::new();
        for column in self.store.columns() {
            let seeded = seed
                .iter()
                .find(|(id, _)| *id == column.id)
                .filter(|_| !column.read_only());
            let cell = match seeded {
                Some((_, raw)) => {
                    fields_info.push(FieldValuePayload {
                        field_id: column.raw_id,
                        data: raw.clone(),
                    });
                    decode(raw, column)
                }
                None => empty_cell(column.kind, column.options.clone()),
            };
            record.cells.insert(column.id.clone(), cell);
        }

        let order = anchor_index.map(|i| RowOrder {
            view_id: key.view_id.clone(),
            anchor_row_id: self.store.row_headers()[i].id.server_id(),
            is_above: position == InsertPosition::Above,
            order_value,
        });
        let request = RowCreateRequest {
            table_id: key.table_id,
            base_id: key.base_id,
            view_id: key.view_id,
            socket_id: self.conn.connection_id().to_string(),
            fields_info,
            order,
        };

        self.store.insert_row(index, record, order_value);
        self.pending_creates.push(placeholder);
        if let Err(e) = self.conn.emit(OutboundEvent::RowCreate(request)) {
            self.store.remove_rows(&[placeholder]);
            self.pending_creates.retain(|id| *id != placeholder);
            self.placeholder_edits.remove(&placeholder);
            self.notify(Notice::Error(format!("Could not create row: {e}")));
            self.publish();
            return Err(e.into());
        }
        log::debug!("Created placeholder {placeholder} at {index}");
        self.publish();
        Ok(placeholder)
    }

    /// Apply edits locally and send them as one `row_update`. Returns the
    /// number of rows sent.
    ///
    /// Edits to placeholder rows are queued and go out with the server id
    /// once the create is echoed.
    pub fn update_cells(&mut self, edits: Vec<CellEdit>) -> Result<usize, MutationError> {
        let key = self.active_key()?;
        let mut column_values: Vec<RowUpdatePayload> = Vec::new();

        for edit in edits {
            let Some(column) = self.store.column(&edit.column_id) else {
                log::debug!("Edit for unknown column {}", edit.column_id);
                continue;
            };
            if column.read_only() {
                log::debug!("Edit for read-only column {}", column.id);
                continue;
            }
            if edit.cell.kind() != column.kind {
                log::warn!(
                    "Edit for {} carries {:?}, column is {:?}",
                    column.id,
                    edit.cell.kind(),
                    column.kind
                );
                continue;
            }
            let raw_id = column.raw_id;
            if self.store.row_index(edit.row).is_none() {
                log::debug!("Edit for missing row {}", edit.row);
                continue;
            }

            let Some(row_id) = edit.row.server_id() else {
                let queued = self.placeholder_edits.entry(edit.row).or_default();
                queued.retain(|(id, _)| *id != edit.column_id);
                queued.push((edit.column_id.clone(), edit.cell.clone()));
                self.store.patch_cells(edit.row, vec![(edit.column_id, edit.cell)]);
                continue;
            };
            let field = FieldValuePayload {
                field_id: raw_id,
                data: encode_for_wire(&edit.cell),
            };
            self.store
                .patch_cells(edit.row, vec![(edit.column_id, edit.cell)]);
            match column_values.iter_mut().find(|u| u.row_id == row_id) {
                Some(update) => match update.fields_info.iter_mut().find(|f| f.field_id == raw_id) {
                    Some(existing) => *existing = field,
                    None => update.fields_info.push(field),
                },
                None => column_values.push(RowUpdatePayload {
                    row_id,
                    fields_info: vec![field],
                }),
            }
        }
        self.publish();

        if column_values.is_empty() {
            return Ok(0);
        }
        self.require_connection("save changes")?;
        let rows = column_values.len();
        self.send_row_update(key, column_values)?;
        Ok(rows)
    }

    /// Emit one `row_update`. Computed cells of the sent rows show a loading
    /// state until the echo settles them.
    fn send_row_update(&mut self, key: ViewKey, column_values: Vec<RowUpdatePayload>) -> Result<(), MutationError> {
        let rows: Vec<RowId> = column_values.iter().map(|u| RowId::Server(u.row_id)).collect();
        let request = RowUpdateRequest {
            table_id: key.table_id,
            base_id: key.base_id,
            view_id: key.view_id,
            socket_id: self.conn.connection_id().to_string(),
            column_values,
        };
        if let Err(e) = self.conn.emit(OutboundEvent::RowUpdate(request)) {
            self.notify(Notice::Error(format!("Could not save changes: {e}")));
            return Err(e.into());
        }
        for row in rows {
            self.store.mark_row_loading(row);
        }
        self.publish();
        Ok(())
    }

    /// Move edits queued on `placeholder` onto its confirmed row and send
    /// them as one `row_update`.
    pub(crate) fn flush_placeholder_edits(&mut self, placeholder: RowId, confirmed: RowId) {
        let Some(cells) = self.placeholder_edits.remove(&placeholder) else {
            return;
        };
        let (Some(row_id), Some(key)) = (confirmed.server_id(), self.key.clone()) else {
            return;
        };
        let fields_info: Vec<FieldValuePayload> = cells
            .iter()
            .filter_map(|(column_id, cell)| {
                let column = self.store.column(column_id)?;
                Some(FieldValuePayload {
                    field_id: column.raw_id,
                    data: encode_for_wire(cell),
                })
            })
            .collect();
        self.store.patch_cells(confirmed, cells);
        if fields_info.is_empty() {
            return;
        }
        log::debug!("Sending {} queued edits for {placeholder} as {confirmed}", fields_info.len());
        if self.require_connection("save changes").is_err() {
            return;
        }
        let update = RowUpdatePayload { row_id, fields_info };
        // Failures are already reported as a notice.
        let _ = self.send_row_update(key, vec![update]);
    }

    /// Edit addressed by linear (rendered) row index.
    pub fn update_cell_at(
        &mut self,
        linear: usize,
        column_id: &str,
        cell: Cell,
    ) -> Result<usize, MutationError> {
        let empty = Default::default();
        let collapsed = self.collapsed_groups().unwrap_or(&empty);
        let row = self
            .store
            .projection(&self.config, collapsed)
            .linear_to_real(linear)
            .and_then(|real| self.store.records().get(real))
            .map(|r| r.id)
            .ok_or(MutationError::NoRecordAt(linear))?;
        self.update_cells(vec![CellEdit::new(row, column_id, cell)])
    }

    /// Remove rows locally, then ask the server to delete them. On rejection
    /// the removed rows come back inside [`MutationError::Rejected`].
    pub async fn delete_rows<A: DeletionApi + ?Sized>(
        &mut self,
        ids: &[RowId],
        api: &A,
    ) -> Result<usize, MutationError> {
        let pending = self.begin_delete(ids)?;
        let result = if pending.record_ids.is_empty() {
            Ok(())
        } else {
            api.delete_records(&pending.table_id, &pending.record_ids).await
        };
        self.finish_delete(pending, result)
    }

    /// Local half of a delete: take the rows off screen.
    pub fn begin_delete(&mut self, ids: &[RowId]) -> Result<PendingDelete, MutationError> {
        let key = self.active_key()?;
        let removed = self.store.remove_rows(ids);
        self.pending_creates.retain(|id| !ids.contains(id));
        self.placeholder_edits.retain(|id, _| !ids.contains(id));
        self.publish();

        let record_ids = removed.iter().filter_map(|r| r.record.id.server_id()).collect();
        Ok(PendingDelete {
            table_id: key.table_id,
            record_ids,
            removed,
        })
    }

    /// Apply the server's answer to a delete started with
    /// [`begin_delete`](Self::begin_delete).
    pub fn finish_delete(
        &mut self,
        pending: PendingDelete,
        result: Result<(), ApiError>,
    ) -> Result<usize, MutationError> {
        let PendingDelete {
            record_ids, removed, ..
        } = pending;
        match result {
            Ok(()) => {
                log::debug!("Deleted {} rows", record_ids.len());
                Ok(removed.len())
            }
            Err(source) => {
                self.notify(Notice::Error(format!("Could not delete rows: {source}")));
                Err(MutationError::Rejected { source, removed })
            }
        }
    }

    /// Put rows back at their former positions.
    pub fn restore_rows(&mut self, removed: Vec<RemovedRow>) {
        self.store.restore_rows(removed);
        self.publish();
    }

    /// Resize, wrap or hide a column for everyone on this view.
    pub fn update_column_meta(&mut self, column_id: &str, patch: ColumnMeta) -> Result<(), MutationError> {
        let raw_id = self
            .store
            .column(column_id)
            .map(|c| c.raw_id)
            .ok_or_else(|| MutationError::UnknownColumn(column_id.to_string()))?;
        let meta = HashMap::from([(raw_id.to_string(), patch.clone())]);
        self.store.apply_column_meta(&meta, None);
        self.publish();
        self.send_column_meta(
            vec![ColumnMetaPatch {
                field_id: raw_id,
                meta: patch,
            }],
            None,
        )
    }

    pub fn freeze_columns(&mut self, count: u32) -> Result<(), MutationError> {
        self.active_key()?;
        self.store.apply_column_meta(&HashMap::new(), Some(count));
        self.publish();
        self.send_column_meta(Vec::new(), Some(count))
    }

    fn send_column_meta(
        &mut self,
        column_meta: Vec<ColumnMetaPatch>,
        frozen_columns: Option<u32>,
    ) -> Result<(), MutationError> {
        let key = self.active_key()?;
        self.require_connection("save the column layout")?;
        let request = ColumnMetaRequest {
            table_id: key.table_id,
            base_id: key.base_id,
            view_id: key.view_id,
            socket_id: self.conn.connection_id().to_string(),
            column_meta,
            frozen_columns,
        };
        self.conn.emit(OutboundEvent::UpdateColumnMeta(request))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::protocol::InboundEvent;
    use crate::rooms::{LoopbackConnection, LoopbackHub};
    use gridline_core::CellValue;
    use serde_json::json;

    fn synced() -> (LoopbackHub, SyncEngine<LoopbackConnection>) {
        let hub = LoopbackHub::new();
        let (conn, _rx) = hub.connect();
        let mut engine = SyncEngine::new(conn, EngineConfig::default());
        engine.activate(ViewKey::new("t1", "b1", "v1"));
        engine.handle_frame(
            &json!({
                "event": "recordsFetched",
                "data": {
                    "fields": [
                        {"id": 1, "type": "SHORT_TEXT", "dbFieldName": "name"},
                        {"id": 2, "type": "NUMBER", "dbFieldName": "n"}
                    ],
                    "records": [
                        {"__id": 1, "name": "a", "n": 1},
                        {"__id": 2, "name": "b", "n": 2}
                    ],
                    "viewId": "v1"
                }
            })
            .to_string(),
        );
        hub.take_emitted();
        (hub, engine)
    }

    fn number(engine: &SyncEngine<LoopbackConnection>, value: f64) -> Cell {
        let column = engine.store().column("n").unwrap();
        decode(&json!(value), column)
    }

    #[test]
    fn test_create_row_between_neighbours() {
        let (hub, mut engine) = synced();
        let id = engine
            .create_row(Some(RowId::Server(1)), InsertPosition::Below, vec![("n".into(), json!(7))])
            .unwrap();

        assert!(id.is_optimistic());
        assert_eq!(engine.store().row_index(id), Some(1));
        assert_eq!(engine.store().header(id).unwrap().order_value, 1.5);
        let cell = engine.store().record(id).unwrap().cell("n").unwrap();
        assert_eq!(cell.value, CellValue::Number(Some(7.0)));

        let emitted = hub.take_emitted();
        assert_eq!(emitted.len(), 1);
        let OutboundEvent::RowCreate(request) = &emitted[0].1 else {
            panic!("expected row_create");
        };
        assert_eq!(request.fields_info.len(), 1);
        let order = request.order.as_ref().unwrap();
        assert_eq!(order.anchor_row_id, Some(1));
        assert!(!order.is_above);
    }

    #[test]
    fn test_create_row_at_end_without_anchor() {
        let (_hub, mut engine) = synced();
        let id = engine.create_row(None, InsertPosition::Below, Vec::new()).unwrap();
        assert_eq!(engine.store().row_index(id), Some(2));
        assert_eq!(engine.store().header(id).unwrap().order_value, 3.0);
    }

    #[test]
    fn test_update_cells_batches_per_row() {
        let (hub, mut engine) = synced();
        let edits = vec![
            CellEdit::new(RowId::Server(1), "n", number(&engine, 10.0)),
            CellEdit::new(RowId::Server(1), "n", number(&engine, 11.0)),
            CellEdit::new(RowId::Server(2), "n", number(&engine, 20.0)),
        ];
        assert_eq!(engine.update_cells(edits).unwrap(), 2);

        let emitted = hub.take_emitted();
        let OutboundEvent::RowUpdate(request) = &emitted[0].1 else {
            panic!("expected row_update");
        };
        assert_eq!(request.column_values.len(), 2);
        assert_eq!(request.column_values[0].fields_info.len(), 1);
        assert_eq!(request.column_values[0].fields_info[0].data, json!(11.0));

        let cell = engine.store().record(RowId::Server(1)).unwrap().cell("n").unwrap();
        assert_eq!(cell.value, CellValue::Number(Some(11.0)));
    }

    #[test]
    fn test_update_cells_skips_mismatched_and_optimistic() {
        let (hub, mut engine) = synced();
        let tmp = engine.create_row(None, InsertPosition::Below, Vec::new()).unwrap();
        hub.take_emitted();

        let text = decode(&json!("x"), engine.store().column("name").unwrap());
        let edits = vec![
            CellEdit::new(RowId::Server(1), "n", text),
            CellEdit::new(tmp, "n", number(&engine, 5.0)),
            CellEdit::new(RowId::Server(1), "missing", number(&engine, 5.0)),
        ];
        assert_eq!(engine.update_cells(edits).unwrap(), 0);
        assert!(hub.emitted().is_empty());
        let cell = engine.store().record(tmp).unwrap().cell("n").unwrap();
        assert_eq!(cell.value, CellValue::Number(Some(5.0)));
    }

    fn echo_created(engine: &mut SyncEngine<LoopbackConnection>, row_id: i64) {
        let socket = engine.connection().connection_id().to_string();
        engine.handle_frame(
            &json!({
                "event": "created_row",
                "data": {"table_id": "t1", "socket_id": socket, "row": {"__id": row_id}}
            })
            .to_string(),
        );
    }

    #[test]
    fn test_placeholder_edit_is_sent_after_echo() {
        let (hub, mut engine) = synced();
        let tmp = engine.create_row(None, InsertPosition::Below, Vec::new()).unwrap();
        let edit = CellEdit::new(tmp, "n", number(&engine, 55.0));
        assert_eq!(engine.update_cells(vec![edit]).unwrap(), 0);
        hub.take_emitted();

        echo_created(&mut engine, 3);

        let cell = engine.store().record(RowId::Server(3)).unwrap().cell("n").unwrap();
        assert_eq!(cell.value, CellValue::Number(Some(55.0)));
        let emitted = hub.take_emitted();
        assert_eq!(emitted.len(), 1);
        let OutboundEvent::RowUpdate(request) = &emitted[0].1 else {
            panic!("expected row_update");
        };
        assert_eq!(request.column_values.len(), 1);
        assert_eq!(request.column_values[0].row_id, 3);
        assert_eq!(request.column_values[0].fields_info[0].field_id, 2);
        assert_eq!(request.column_values[0].fields_info[0].data, json!(55.0));
    }

    #[test]
    fn test_echo_confirms_most_recent_placeholder() {
        let (hub, mut engine) = synced();
        let first = engine.create_row(None, InsertPosition::Below, Vec::new()).unwrap();
        let second = engine.create_row(None, InsertPosition::Below, Vec::new()).unwrap();
        let edit = CellEdit::new(second, "n", number(&engine, 8.0));
        engine.update_cells(vec![edit]).unwrap();
        hub.take_emitted();

        echo_created(&mut engine, 3);
        assert!(engine.store().row_index(second).is_none());
        assert!(engine.store().row_index(first).is_some());
        let emitted = hub.take_emitted();
        let OutboundEvent::RowUpdate(request) = &emitted[0].1 else {
            panic!("expected row_update");
        };
        assert_eq!(request.column_values[0].row_id, 3);

        echo_created(&mut engine, 4);
        assert!(engine.store().row_index(first).is_none());
        assert!(hub.take_emitted().is_empty());
    }

    #[test]
    fn test_update_cell_at_linear_index() {
        let (_hub, mut engine) = synced();
        let cell = number(&engine, 99.0);
        assert_eq!(engine.update_cell_at(1, "n", cell).unwrap(), 1);
        let stored = engine.store().record(RowId::Server(2)).unwrap().cell("n").unwrap();
        assert_eq!(stored.value, CellValue::Number(Some(99.0)));

        // The trailing append row carries no record.
        let cell = number(&engine, 1.0);
        assert!(matches!(
            engine.update_cell_at(2, "n", cell),
            Err(MutationError::NoRecordAt(2))
        ));
    }

    #[tokio::test]
    async fn test_create_while_disconnected_warns() {
        let (hub, mut engine) = synced();
        let mut notices = engine.take_notice_rx().unwrap();
        hub.disconnect(engine.connection().connection_id());
        engine.handle(InboundEvent::Disconnect);

        let result = engine.create_row(None, InsertPosition::Below, Vec::new());
        assert!(matches!(result, Err(MutationError::NotConnected)));
        assert_eq!(engine.store().records().len(), 2);
        assert!(matches!(notices.recv().await, Some(Notice::Warning(_))));
    }

    #[test]
    fn test_update_column_meta_applies_and_emits() {
        let (hub, mut engine) = synced();
        let patch = ColumnMeta {
            width: Some(320.0),
            ..ColumnMeta::default()
        };
        engine.update_column_meta("name", patch).unwrap();
        assert_eq!(engine.store().column("name").unwrap().width, 320.0);

        let emitted = hub.take_emitted();
        let OutboundEvent::UpdateColumnMeta(request) = &emitted[0].1 else {
            panic!("expected update_column_meta");
        };
        assert_eq!(request.column_meta[0].field_id, 1);
        assert!(matches!(
            engine.update_column_meta("nope", ColumnMeta::default()),
            Err(MutationError::UnknownColumn(_))
        ));
    }
}
