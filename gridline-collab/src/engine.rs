//! Socket reconciliation.
//!
//! [`SyncEngine`] owns the [`TableStore`] and the connection, and decides for
//! every inbound event whether and how it applies to the active view.
//!
//! ```text
//!  Disconnected ──connect/activate──► JoinedRooms ──getRecord──► SnapshotRequested
//!       ▲                                                               │
//!       └──────────── disconnect ◄──── Synchronized ◄──recordsFetched───┘
//! ```
//!
//! Handlers take `&mut self` and run to completion, so every handler sees
//! the current state. Only the default view (grid, no filter/sort/group)
//! absorbs peer row and field events; other views get a staleness flag and
//! wait for a manual refresh.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, watch};

use gridline_core::ordering::insertion_index_by_order;
use gridline_core::projection::{format_created_row, format_field, format_row_updates, format_snapshot};
use gridline_core::{Cell, FieldPayload, RowId, View};

use crate::api::{ApiError, ViewsApi};
use crate::config::EngineConfig;
use crate::connection::Connection;
use crate::protocol::{
    ColumnMetaPayload, CreatedRowPayload, DeletedFieldsPayload, DeletedRecordsPayload,
    FormulaErrorsPayload, GetRecordRequest, GroupByUpdatedPayload, GroupPointsPayload,
    GroupPointsRequest, InboundEvent, OutboundEvent, SnapshotPayload, SortUpdatedPayload,
    TablePing, UpdatedRowPayload,
};
use crate::store::{FormulaState, TableSnapshot, TableStore};

/// The `(table, view)` pair the engine is synchronizing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ViewKey {
    pub table_id: String,
    pub base_id: String,
    pub view_id: String,
}

impl ViewKey {
    pub fn new(table_id: impl Into<String>, base_id: impl Into<String>, view_id: impl Into<String>) -> Self {
        Self {
            table_id: table_id.into(),
            base_id: base_id.into(),
            view_id: view_id.into(),
        }
    }
}

impl fmt::Display for ViewKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.table_id, self.view_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SyncPhase {
    #[default]
    Disconnected,
    JoinedRooms,
    SnapshotRequested,
    Synchronized,
}

/// Transient user-facing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Info(String),
    Warning(String),
    Error(String),
}

pub struct SyncEngine<C: Connection> {
    pub(crate) conn: C,
    pub(crate) config: EngineConfig,
    pub(crate) store: TableStore,
    phase: SyncPhase,
    pub(crate) key: Option<ViewKey>,
    rooms: Vec<String>,
    /// Snapshot requests awaiting a response, with their send time.
    in_flight: HashMap<ViewKey, Instant>,
    /// Group keys the user collapsed, per view.
    collapsed: HashMap<ViewKey, HashSet<String>>,
    collapse_generation: u64,
    /// Optimistic placeholders awaiting their echo, oldest first.
    pub(crate) pending_creates: Vec<RowId>,
    /// Edits made to a placeholder, sent once its server id is known.
    pub(crate) placeholder_edits: HashMap<RowId, Vec<(String, Cell)>>,
    snapshot_tx: watch::Sender<Arc<TableSnapshot>>,
    published: Option<(u64, SyncPhase, u64)>,
    notice_tx: mpsc::Sender<Notice>,
    notice_rx: Option<mpsc::Receiver<Notice>>,
}

impl<C: Connection> SyncEngine<C> {
    pub fn new(conn: C, config: EngineConfig) -> Self {
        let (snapshot_tx, _) = watch::channel(Arc::new(TableSnapshot::default()));
        let (notice_tx, notice_rx) = mpsc::channel(config.notice_capacity.max(1));
        Self {
            conn,
            config,
            store: TableStore::new(),
            phase: SyncPhase::Disconnected,
            key: None,
            rooms: Vec::new(),
            in_flight: HashMap::new(),
            collapsed: HashMap::new(),
            collapse_generation: 0,
            pending_creates: Vec::new(),
            placeholder_edits: HashMap::new(),
            snapshot_tx,
            published: None,
            notice_tx,
            notice_rx: Some(notice_rx),
        }
    }

    // ── Accessors ────────────────────────────────────────────────────────

    pub fn store(&self) -> &TableStore {
        &self.store
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    pub fn key(&self) -> Option<&ViewKey> {
        self.key.as_ref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn connection(&self) -> &C {
        &self.conn
    }

    /// Rooms currently joined.
    pub fn rooms(&self) -> &[String] {
        &self.rooms
    }

    pub fn is_snapshot_in_flight(&self) -> bool {
        self.key.as_ref().is_some_and(|k| self.in_flight.contains_key(k))
    }

    pub fn collapsed_groups(&self) -> Option<&HashSet<String>> {
        self.key.as_ref().and_then(|k| self.collapsed.get(k))
    }

    /// Receive every published [`TableSnapshot`].
    pub fn subscribe(&self) -> watch::Receiver<Arc<TableSnapshot>> {
        self.snapshot_tx.subscribe()
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> Arc<TableSnapshot> {
        self.snapshot_tx.borrow().clone()
    }

    /// Take the notice receiver (can only be called once).
    pub fn take_notice_rx(&mut self) -> Option<mpsc::Receiver<Notice>> {
        self.notice_rx.take()
    }

    // ── Plumbing ─────────────────────────────────────────────────────────

    pub(crate) fn notify(&self, notice: Notice) {
        if let Err(e) = self.notice_tx.try_send(notice) {
            log::warn!("Notice dropped: {e}");
        }
    }

    /// Emit, logging failures. Returns whether the event went out.
    pub(crate) fn emit(&self, event: OutboundEvent) -> bool {
        let name = event.name();
        match self.conn.emit(event) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Failed to emit {name}: {e}");
                false
            }
        }
    }

    /// Publish a fresh snapshot if anything changed since the last one.
    pub(crate) fn publish(&mut self) {
        let stamp = (self.store.version(), self.phase, self.collapse_generation);
        if self.published == Some(stamp) {
            return;
        }
        self.published = Some(stamp);
        let empty = HashSet::new();
        let collapsed = self
            .key
            .as_ref()
            .and_then(|k| self.collapsed.get(k))
            .unwrap_or(&empty);
        let snapshot = self.store.snapshot(self.phase, &self.config, collapsed);
        self.snapshot_tx.send_replace(Arc::new(snapshot));
    }

    fn is_self(&self, socket_id: Option<&str>) -> bool {
        socket_id == Some(self.conn.connection_id())
    }

    fn targets_active_table(&self, table_id: Option<&str>) -> bool {
        match (&self.key, table_id) {
            (None, _) => false,
            (Some(key), Some(table_id)) => key.table_id == table_id,
            (Some(_), None) => true,
        }
    }

    fn targets_active_view(&self, view_id: Option<&str>) -> bool {
        match (&self.key, view_id) {
            (None, _) => false,
            (Some(key), Some(view_id)) => key.view_id == view_id,
            (Some(_), None) => true,
        }
    }

    fn on_default_view(&self) -> bool {
        self.store.view().is_some_and(View::accepts_live_mutations)
    }

    fn mark_stale(&mut self, event: &str) {
        log::debug!("{event} not applicable to the active view, marking stale");
        self.store.set_stale(true);
        // Echoes for rows on this view will not be applied.
        self.store.settle_all_rows();
    }

    pub(crate) fn forget_placeholders(&mut self) {
        if !self.placeholder_edits.is_empty() {
            log::debug!("Dropping edits for {} unconfirmed rows", self.placeholder_edits.len());
        }
        self.pending_creates.clear();
        self.placeholder_edits.clear();
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    /// Make `key` the active view: leave the old rooms, join the new ones and
    /// request a snapshot.
    pub fn activate(&mut self, key: ViewKey) {
        if self.key.as_ref() == Some(&key) {
            if let Some(view) = self.store.views().iter().find(|v| v.id == key.view_id).cloned() {
                if self.store.view() != Some(&view) {
                    self.store.set_view(view);
                }
            }
            if self.phase == SyncPhase::Disconnected {
                self.join_and_request();
            } else {
                log::debug!("{key} already active");
            }
            self.publish();
            return;
        }
        if let Some(old) = self.key.take() {
            log::info!("Switching from {old} to {key}");
            self.in_flight.remove(&old);
        }
        self.store.clear_table();
        self.forget_placeholders();
        let view = self
            .store
            .views()
            .iter()
            .find(|v| v.id == key.view_id)
            .cloned()
            .unwrap_or_else(|| View {
                id: key.view_id.clone(),
                table_id: key.table_id.clone(),
                ..View::default()
            });
        self.store.set_view(view);
        self.key = Some(key);
        self.join_and_request();
        self.publish();
    }

    /// Fetch the table's views and activate `view_id`, or the first view.
    pub async fn load_views<A: ViewsApi + ?Sized>(
        &mut self,
        api: &A,
        table_id: &str,
        base_id: &str,
        view_id: Option<&str>,
    ) -> Result<ViewKey, ApiError> {
        let views = api.fetch_views(table_id, base_id).await?;
        self.apply_views(views, table_id, base_id, view_id)
    }

    /// Install fetched views and activate `view_id`, or the first view.
    pub(crate) fn apply_views(
        &mut self,
        views: Vec<View>,
        table_id: &str,
        base_id: &str,
        view_id: Option<&str>,
    ) -> Result<ViewKey, ApiError> {
        let chosen = view_id
            .and_then(|id| views.iter().find(|v| v.id == id))
            .or_else(|| views.first())
            .map(|v| v.id.clone())
            .ok_or_else(|| ApiError::NoViews(table_id.to_string()))?;
        log::info!("Loaded {} views for table {table_id}", views.len());
        self.store.set_views(views);
        let key = ViewKey::new(table_id, base_id, chosen);
        self.activate(key.clone());
        Ok(key)
    }

    fn join_and_request(&mut self) {
        let Some(key) = self.key.clone() else {
            return;
        };
        if !self.conn.is_connected() {
            log::debug!("Not connected, deferring join for {key}");
            self.phase = SyncPhase::Disconnected;
            return;
        }
        for room in std::mem::take(&mut self.rooms) {
            self.emit(OutboundEvent::LeaveRoom(room));
        }
        for room in [key.table_id.clone(), key.view_id.clone()] {
            if self.emit(OutboundEvent::JoinRoom(room.clone())) {
                self.rooms.push(room);
            }
        }
        self.phase = SyncPhase::JoinedRooms;
        log::info!("Joined rooms for {key}");
        self.request_snapshot(false);
    }

    /// Ask for a full snapshot unless one is already in flight for the
    /// active view. Returns whether a request was sent.
    pub fn request_snapshot(&mut self, force_refresh: bool) -> bool {
        let Some(key) = self.key.clone() else {
            return false;
        };
        if !self.conn.is_connected() {
            return false;
        }
        if let Some(sent) = self.in_flight.get(&key) {
            if sent.elapsed() < self.config.snapshot_timeout {
                log::debug!("Snapshot for {key} already in flight");
                return false;
            }
            log::info!("Snapshot request for {key} timed out, re-requesting");
        }
        let request = GetRecordRequest {
            table_id: key.table_id.clone(),
            base_id: key.base_id.clone(),
            view_id: key.view_id.clone(),
            should_refresh: force_refresh,
        };
        if !self.emit(OutboundEvent::GetRecord(request)) {
            return false;
        }
        self.in_flight.insert(key, Instant::now());
        self.phase = SyncPhase::SnapshotRequested;
        true
    }

    fn request_group_points(&mut self) {
        let Some(key) = self.key.clone() else {
            return;
        };
        if !self.conn.is_connected() {
            return;
        }
        self.emit(OutboundEvent::GetGroupPoints(GroupPointsRequest {
            table_id: key.table_id,
            base_id: key.base_id,
            view_id: key.view_id,
        }));
    }

    fn on_connect(&mut self) {
        if self.phase != SyncPhase::Disconnected {
            log::debug!("Connect while already joined, ignoring");
            return;
        }
        log::info!("Connected as {}", self.conn.connection_id());
        if let Some(key) = &self.key {
            self.in_flight.remove(key);
        }
        // Memberships died with the old socket.
        self.rooms.clear();
        self.join_and_request();
    }

    fn on_disconnect(&mut self) {
        log::info!("Disconnected");
        self.phase = SyncPhase::Disconnected;
        self.rooms.clear();
        self.in_flight.clear();
    }

    /// User-initiated pull: clear the stale flag and force a new snapshot.
    pub fn refresh(&mut self) -> bool {
        let Some(key) = self.key.clone() else {
            return false;
        };
        self.in_flight.remove(&key);
        self.store.set_stale(false);
        let sent = self.request_snapshot(true);
        self.publish();
        sent
    }

    /// Flip the local collapsed state of a group. Returns the new state.
    pub fn toggle_group_collapsed(&mut self, group_key: &str) -> bool {
        let Some(key) = self.key.clone() else {
            return false;
        };
        let set = self.collapsed.entry(key).or_default();
        let collapsed = if set.remove(group_key) {
            false
        } else {
            set.insert(group_key.to_string());
            true
        };
        self.collapse_generation += 1;
        self.publish();
        collapsed
    }

    // ── Inbound ──────────────────────────────────────────────────────────

    /// Decode and handle one text frame. Malformed frames are dropped.
    pub fn handle_frame(&mut self, text: &str) {
        match InboundEvent::decode(text) {
            Ok(event) => self.handle(event),
            Err(e) => log::warn!("Dropping malformed frame: {e}"),
        }
    }

    pub fn handle(&mut self, event: InboundEvent) {
        log::trace!("Inbound {}", event.name());
        match event {
            InboundEvent::RecordsFetched(payload) => self.on_records_fetched(payload),
            InboundEvent::GroupPointsFetched(payload) => self.on_group_points(payload),
            InboundEvent::CreatedRow(payload) => self.on_created_row(payload),
            InboundEvent::UpdatedRow(payload) => self.on_updated_row(payload),
            InboundEvent::DeletedRecords(payload) => self.on_deleted_records(payload),
            InboundEvent::CreatedField(payload) => {
                self.on_created_fields(payload.table_id.as_deref(), vec![payload.field])
            }
            InboundEvent::CreatedFields(payload) => {
                self.on_created_fields(payload.table_id.as_deref(), payload.fields)
            }
            InboundEvent::UpdatedField(payload) => {
                self.on_updated_field(payload.table_id.as_deref(), payload.field)
            }
            InboundEvent::DeletedFields(payload) => self.on_deleted_fields(payload),
            InboundEvent::SortUpdated(payload) => self.on_sort_updated(payload),
            InboundEvent::GroupByUpdated(payload) => self.on_group_by_updated(payload),
            InboundEvent::UpdatedColumnMeta(payload) => self.on_column_meta(payload),
            InboundEvent::FormulaFieldErrors(payload) => self.on_formula_errors(payload),
            InboundEvent::RecordsChanged(ping) => self.on_table_ping("records_changed", ping),
            InboundEvent::FieldsChanged(ping) => self.on_table_ping("fields_changed", ping),
            InboundEvent::Connect => self.on_connect(),
            InboundEvent::Disconnect => self.on_disconnect(),
        }
        self.publish();
    }

    fn on_records_fetched(&mut self, payload: SnapshotPayload) {
        let Some(key) = self.key.clone() else {
            log::debug!("Snapshot with no active view, discarding");
            return;
        };
        if payload.view_id.as_deref().is_some_and(|v| v != key.view_id) {
            log::debug!("Discarding snapshot for inactive view {:?}", payload.view_id);
            return;
        }
        self.in_flight.remove(&key);
        let table = format_snapshot(
            &payload.fields,
            &payload.records,
            self.store.view(),
            &self.config.column_defaults,
        );
        if let Err(e) = self.store.replace_table(table) {
            log::warn!("Rejected snapshot for {key}: {e}");
            return;
        }
        self.forget_placeholders();

        let grouped = self.store.view().is_some_and(View::needs_group_points);
        match (grouped, payload.group_points) {
            (true, Some(points)) => self.store.set_group_points(Some(points)),
            (true, None) => {
                self.store.set_group_points(None);
                self.request_group_points();
            }
            (false, _) => self.store.set_group_points(None),
        }
        self.phase = SyncPhase::Synchronized;
        log::info!(
            "Synchronized {key}: {} columns, {} rows",
            self.store.columns().len(),
            self.store.records().len()
        );
    }

    fn on_group_points(&mut self, payload: GroupPointsPayload) {
        if !self.targets_active_view(payload.view_id.as_deref()) {
            log::debug!("Discarding group points for inactive view {:?}", payload.view_id);
            return;
        }
        if self.store.view().is_some_and(View::needs_group_points) {
            self.store.set_group_points(Some(payload.group_points));
        }
    }

    fn on_created_row(&mut self, payload: CreatedRowPayload) {
        if !self.targets_active_table(payload.table_id.as_deref()) {
            return;
        }
        let own = self.is_self(payload.socket_id.as_deref());
        // Our own placeholder is on screen whatever the view; reconcile it.
        if !self.on_default_view() && !(own && !self.pending_creates.is_empty()) {
            self.mark_stale("created_row");
            return;
        }
        let view_id = self.key.as_ref().map(|k| k.view_id.as_str());
        let Some((record, order)) = format_created_row(&payload.row, self.store.columns(), view_id) else {
            log::warn!("Dropping created_row without a row id");
            return;
        };
        let id = record.id;
        if self.store.row_index(id).is_some() {
            self.store.replace_row(id, record, Some(order));
            return;
        }
        if own {
            while let Some(placeholder) = self.pending_creates.pop() {
                if self.store.replace_row(placeholder, record.clone(), Some(order)) {
                    log::debug!("Row {placeholder} confirmed as {id}");
                    self.flush_placeholder_edits(placeholder, id);
                    return;
                }
                self.placeholder_edits.remove(&placeholder);
            }
            log::debug!("No placeholder left for own row {id}, inserting");
        }
        let index = insertion_index_by_order(order, self.store.row_headers());
        self.store.insert_row(index, record, order);
    }

    fn on_updated_row(&mut self, payload: UpdatedRowPayload) {
        if !self.targets_active_table(payload.table_id.as_deref()) {
            return;
        }
        let moves_stack = self.store.view().is_some_and(|view| {
            payload
                .updates
                .iter()
                .flat_map(|u| &u.fields_info)
                .any(|f| view.is_stacking_field(f.field_id))
        });
        let rows: Vec<RowId> = payload.updates.iter().map(|u| RowId::Server(u.row_id)).collect();
        if !self.on_default_view() && !moves_stack {
            self.mark_stale("updated_row");
            return;
        }
        let set = format_row_updates(&payload.updates, self.store.columns(), self.store.records());
        if set.is_empty() {
            log::debug!("updated_row touched no loaded row");
        }
        for (row, cells) in set.patches {
            self.store.patch_cells(row, cells);
        }
        self.store.clear_loading(&set.clear_loading);
        if !set.formula_fields.is_empty() {
            self.store.refresh_formula_cells(&set.formula_fields);
        }
        self.store.settle_rows(&rows);
        if moves_stack {
            self.request_group_points();
        }
    }

    fn on_deleted_records(&mut self, payload: DeletedRecordsPayload) {
        if !self.targets_active_table(payload.table_id.as_deref()) {
            return;
        }
        if self.is_self(payload.socket_id.as_deref()) {
            log::debug!("Ignoring own deleted_records echo");
            return;
        }
        if !self.on_default_view() {
            self.mark_stale("deleted_records");
            return;
        }
        let ids: Vec<RowId> = payload.record_ids.into_iter().map(RowId::Server).collect();
        let removed = self.store.remove_rows(&ids);
        log::debug!("Removed {} of {} deleted rows", removed.len(), ids.len());
    }

    fn on_created_fields(&mut self, table_id: Option<&str>, fields: Vec<FieldPayload>) {
        if !self.targets_active_table(table_id) {
            return;
        }
        if !self.on_default_view() {
            self.mark_stale("created_field");
            return;
        }
        for field in fields {
            let next_order = self
                .store
                .columns()
                .iter()
                .map(|c| c.order)
                .fold(0.0, f64::max)
                + 1.0;
            let column = format_field(&field, next_order, self.store.view(), &self.config.column_defaults);
            self.store.insert_column(column);
        }
    }

    fn on_updated_field(&mut self, table_id: Option<&str>, field: FieldPayload) {
        if !self.targets_active_table(table_id) {
            return;
        }
        if !self.on_default_view() {
            self.mark_stale("updated_field");
            return;
        }
        let Some(current_order) = self.store.column_by_raw(field.id).map(|c| c.order) else {
            log::debug!("updated_field for unknown field {}", field.id);
            return;
        };
        let column = format_field(&field, current_order, self.store.view(), &self.config.column_defaults);
        self.store.update_column(column);
    }

    fn on_deleted_fields(&mut self, payload: DeletedFieldsPayload) {
        if !self.targets_active_table(payload.table_id.as_deref()) {
            return;
        }
        if !self.on_default_view() {
            self.mark_stale("deleted_fields");
            return;
        }
        self.store.remove_columns(&payload.field_ids);
    }

    fn on_sort_updated(&mut self, payload: SortUpdatedPayload) {
        if !self.targets_active_view(payload.view_id.as_deref()) {
            return;
        }
        self.store.set_sort(payload.sort);
        // Row order is computed server-side.
        if let Some(key) = &self.key {
            self.in_flight.remove(key);
        }
        self.request_snapshot(true);
    }

    fn on_group_by_updated(&mut self, payload: GroupByUpdatedPayload) {
        if !self.targets_active_view(payload.view_id.as_deref()) {
            return;
        }
        self.store.set_group(payload.group);
        if let Some(key) = &self.key {
            if self.collapsed.remove(key).is_some() {
                self.collapse_generation += 1;
            }
            self.in_flight.remove(key);
        }
        if self.store.view().is_some_and(View::needs_group_points) {
            self.request_group_points();
        } else {
            self.store.set_group_points(None);
        }
        // Leaves are consumed in record order, which follows the grouping.
        self.request_snapshot(true);
    }

    fn on_column_meta(&mut self, payload: ColumnMetaPayload) {
        if self.is_self(payload.socket_id.as_deref()) {
            log::debug!("Ignoring own column meta echo");
            return;
        }
        if !self.targets_active_view(payload.view_id.as_deref()) {
            return;
        }
        self.store
            .apply_column_meta(&payload.column_meta, payload.frozen_columns);
    }

    fn on_formula_errors(&mut self, payload: FormulaErrorsPayload) {
        if !self.targets_active_table(payload.table_id.as_deref()) {
            return;
        }
        let states: Vec<(String, FormulaState)> = payload
            .errors
            .into_iter()
            .filter_map(|e| {
                let column = self.store.column_by_raw(e.field_id)?;
                Some((
                    column.id.clone(),
                    FormulaState {
                        error: e.error,
                        loading: e.loading,
                    },
                ))
            })
            .collect();
        if !states.is_empty() {
            self.store.set_formula_state(states);
        }
    }

    fn on_table_ping(&mut self, event: &str, ping: TablePing) {
        if self.targets_active_table(ping.table_id.as_deref()) && !self.on_default_view() {
            self.mark_stale(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rooms::LoopbackHub;
    use serde_json::json;

    fn engine() -> (LoopbackHub, SyncEngine<crate::rooms::LoopbackConnection>) {
        let hub = LoopbackHub::new();
        let (conn, _rx) = hub.connect();
        (hub, SyncEngine::new(conn, EngineConfig::default()))
    }

    fn count(hub: &LoopbackHub, name: &str) -> usize {
        hub.emitted().iter().filter(|(_, e)| e.name() == name).count()
    }

    #[test]
    fn test_activate_joins_rooms_and_requests_snapshot() {
        let (hub, mut engine) = engine();
        engine.activate(ViewKey::new("t1", "b1", "v1"));

        assert_eq!(engine.phase(), SyncPhase::SnapshotRequested);
        assert_eq!(engine.rooms(), ["t1".to_string(), "v1".to_string()]);
        assert!(hub.is_member("t1", engine.connection().connection_id()));
        assert_eq!(count(&hub, "getRecord"), 1);
        assert!(engine.is_snapshot_in_flight());
    }

    #[test]
    fn test_activate_while_disconnected_defers() {
        let (hub, mut engine) = engine();
        hub.disconnect(engine.connection().connection_id());
        engine.activate(ViewKey::new("t1", "b1", "v1"));
        assert_eq!(engine.phase(), SyncPhase::Disconnected);
        assert!(hub.emitted().is_empty());

        hub.reconnect(engine.connection().connection_id());
        engine.handle(InboundEvent::Connect);
        assert_eq!(engine.phase(), SyncPhase::SnapshotRequested);
        assert_eq!(count(&hub, "getRecord"), 1);
    }

    #[test]
    fn test_malformed_frame_is_dropped() {
        let (_hub, mut engine) = engine();
        engine.activate(ViewKey::new("t1", "b1", "v1"));
        let version = engine.store().version();
        engine.handle_frame("{\"event\": \"updated_row\", \"data\": 12}");
        engine.handle_frame("garbage");
        assert_eq!(engine.store().version(), version);
    }

    #[test]
    fn test_snapshot_marks_synchronized_and_publishes() {
        let (_hub, mut engine) = engine();
        let rx = engine.subscribe();
        engine.activate(ViewKey::new("t1", "b1", "v1"));
        engine.handle_frame(
            &json!({
                "event": "recordsFetched",
                "data": {
                    "fields": [{"id": 1, "type": "NUMBER", "dbFieldName": "n"}],
                    "records": [{"__id": 1, "n": "42"}],
                    "viewId": "v1"
                }
            })
            .to_string(),
        );
        assert_eq!(engine.phase(), SyncPhase::Synchronized);
        assert!(!engine.is_snapshot_in_flight());
        let snapshot = rx.borrow().clone();
        assert_eq!(snapshot.records.len(), 1);
        assert_eq!(snapshot.phase, SyncPhase::Synchronized);
        assert!(!snapshot.is_loading());
    }

    #[test]
    fn test_toggle_group_collapsed() {
        let (_hub, mut engine) = engine();
        assert!(!engine.toggle_group_collapsed("a"));
        engine.activate(ViewKey::new("t1", "b1", "v1"));
        assert!(engine.toggle_group_collapsed("a"));
        assert!(engine.collapsed_groups().unwrap().contains("a"));
        assert!(!engine.toggle_group_collapsed("a"));
    }

    #[tokio::test]
    async fn test_notice_channel() {
        let (_hub, mut engine) = engine();
        let mut rx = engine.take_notice_rx().unwrap();
        assert!(engine.take_notice_rx().is_none());
        engine.notify(Notice::Info("hello".into()));
        assert_eq!(rx.recv().await, Some(Notice::Info("hello".into())));
    }
}
