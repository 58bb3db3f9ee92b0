//! Named-event wire protocol.
//!
//! Every frame is a JSON object with an event name and a payload:
//! ```text
//! { "event": "updated_row", "data": { "socket_id": "…", "updates": [ … ] } }
//! ```
//!
//! Both directions are closed enums. Payloads are validated here and turned
//! into typed values; nothing past the engine boundary sees raw frames.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use gridline_core::projection::{id_from_value, lenient_id, lenient_ids};
use gridline_core::{
    ColumnMeta, FieldPayload, FieldValuePayload, GroupPoint, GroupSpec, RawRow, RowUpdatePayload,
    SortSpec,
};

// ───────────────────────────────────────────────────────────────────
// Inbound
// ───────────────────────────────────────────────────────────────────

/// Events the server (or the transport) delivers to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum InboundEvent {
    #[serde(rename = "recordsFetched")]
    RecordsFetched(SnapshotPayload),
    #[serde(rename = "groupPointsFetched")]
    GroupPointsFetched(GroupPointsPayload),
    #[serde(rename = "created_row")]
    CreatedRow(CreatedRowPayload),
    #[serde(rename = "updated_row")]
    UpdatedRow(UpdatedRowPayload),
    #[serde(rename = "deleted_records")]
    DeletedRecords(DeletedRecordsPayload),
    #[serde(rename = "created_field")]
    CreatedField(FieldEventPayload),
    #[serde(rename = "created_fields")]
    CreatedFields(FieldsEventPayload),
    #[serde(rename = "updated_field")]
    UpdatedField(FieldEventPayload),
    #[serde(rename = "deleted_fields")]
    DeletedFields(DeletedFieldsPayload),
    #[serde(rename = "sort_updated")]
    SortUpdated(SortUpdatedPayload),
    #[serde(rename = "group_by_updated")]
    GroupByUpdated(GroupByUpdatedPayload),
    #[serde(rename = "updated_column_meta")]
    UpdatedColumnMeta(ColumnMetaPayload),
    #[serde(rename = "formula_field_errors")]
    FormulaFieldErrors(FormulaErrorsPayload),
    #[serde(rename = "records_changed")]
    RecordsChanged(TablePing),
    #[serde(rename = "fields_changed")]
    FieldsChanged(TablePing),
    #[serde(rename = "connect")]
    Connect,
    #[serde(rename = "disconnect")]
    Disconnect,
}

impl InboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::RecordsFetched(_) => "recordsFetched",
            Self::GroupPointsFetched(_) => "groupPointsFetched",
            Self::CreatedRow(_) => "created_row",
            Self::UpdatedRow(_) => "updated_row",
            Self::DeletedRecords(_) => "deleted_records",
            Self::CreatedField(_) => "created_field",
            Self::CreatedFields(_) => "created_fields",
            Self::UpdatedField(_) => "updated_field",
            Self::DeletedFields(_) => "deleted_fields",
            Self::SortUpdated(_) => "sort_updated",
            Self::GroupByUpdated(_) => "group_by_updated",
            Self::UpdatedColumnMeta(_) => "updated_column_meta",
            Self::FormulaFieldErrors(_) => "formula_field_errors",
            Self::RecordsChanged(_) => "records_changed",
            Self::FieldsChanged(_) => "fields_changed",
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
        }
    }

    /// Parse one text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }
}

/// Full table fetch for one view.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SnapshotPayload {
    pub fields: Vec<FieldPayload>,
    pub records: Vec<RawRow>,
    pub view_id: Option<String>,
    pub group_points: Option<Vec<GroupPoint>>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GroupPointsPayload {
    pub table_id: Option<String>,
    pub view_id: Option<String>,
    pub group_points: Vec<GroupPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedRowPayload {
    #[serde(default)]
    pub table_id: Option<String>,
    #[serde(default)]
    pub socket_id: Option<String>,
    #[serde(alias = "record")]
    pub row: RawRow,
}

/// One or more row updates. Accepts either a batch
/// (`{"updates": [...]}`) or a single flattened update
/// (`{"row_id": 1, "fields_info": [...]}`).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "UpdatedRowWire")]
pub struct UpdatedRowPayload {
    pub table_id: Option<String>,
    pub socket_id: Option<String>,
    pub updates: Vec<RowUpdatePayload>,
}

#[derive(Deserialize)]
struct UpdatedRowWire {
    #[serde(default)]
    table_id: Option<String>,
    #[serde(default)]
    socket_id: Option<String>,
    #[serde(default)]
    updates: Vec<RowUpdatePayload>,
    #[serde(default, deserialize_with = "lenient_opt_id")]
    row_id: Option<i64>,
    #[serde(default)]
    fields_info: Vec<FieldValuePayload>,
}

impl From<UpdatedRowWire> for UpdatedRowPayload {
    fn from(wire: UpdatedRowWire) -> Self {
        let mut updates = wire.updates;
        if let Some(row_id) = wire.row_id {
            updates.push(RowUpdatePayload {
                row_id,
                fields_info: wire.fields_info,
            });
        }
        Self {
            table_id: wire.table_id,
            socket_id: wire.socket_id,
            updates,
        }
    }
}

fn lenient_opt_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    let raw = Option::<Value>::deserialize(deserializer)?;
    match raw {
        None | Some(Value::Null) => Ok(None),
        Some(v) => id_from_value(&v)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("expected numeric id, got {v}"))),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletedRecordsPayload {
    #[serde(default)]
    pub table_id: Option<String>,
    #[serde(default)]
    pub socket_id: Option<String>,
    #[serde(alias = "row_ids", deserialize_with = "lenient_ids")]
    pub record_ids: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldEventPayload {
    #[serde(default)]
    pub table_id: Option<String>,
    #[serde(default)]
    pub socket_id: Option<String>,
    pub field: FieldPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldsEventPayload {
    #[serde(default)]
    pub table_id: Option<String>,
    #[serde(default)]
    pub socket_id: Option<String>,
    pub fields: Vec<FieldPayload>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletedFieldsPayload {
    #[serde(default)]
    pub table_id: Option<String>,
    #[serde(default)]
    pub socket_id: Option<String>,
    #[serde(deserialize_with = "lenient_ids")]
    pub field_ids: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortUpdatedPayload {
    #[serde(default)]
    pub view_id: Option<String>,
    #[serde(default)]
    pub socket_id: Option<String>,
    #[serde(default)]
    pub sort: Vec<SortSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupByUpdatedPayload {
    #[serde(default)]
    pub view_id: Option<String>,
    #[serde(default)]
    pub socket_id: Option<String>,
    #[serde(default)]
    pub group: Vec<GroupSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMetaPayload {
    #[serde(default)]
    pub view_id: Option<String>,
    #[serde(default)]
    pub socket_id: Option<String>,
    /// Keyed by raw field id in string form.
    #[serde(default)]
    pub column_meta: HashMap<String, ColumnMeta>,
    #[serde(default)]
    pub frozen_columns: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormulaErrorsPayload {
    #[serde(default)]
    pub table_id: Option<String>,
    pub errors: Vec<FormulaFieldError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormulaFieldError {
    #[serde(deserialize_with = "lenient_id")]
    pub field_id: i64,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub loading: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TablePing {
    #[serde(default)]
    pub table_id: Option<String>,
}

// ───────────────────────────────────────────────────────────────────
// Outbound
// ───────────────────────────────────────────────────────────────────

/// Intents the engine emits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum OutboundEvent {
    #[serde(rename = "joinRoom")]
    JoinRoom(String),
    #[serde(rename = "leaveRoom")]
    LeaveRoom(String),
    #[serde(rename = "getRecord")]
    GetRecord(GetRecordRequest),
    #[serde(rename = "getGroupPoints")]
    GetGroupPoints(GroupPointsRequest),
    #[serde(rename = "row_create")]
    RowCreate(RowCreateRequest),
    #[serde(rename = "row_update")]
    RowUpdate(RowUpdateRequest),
    #[serde(rename = "update_column_meta")]
    UpdateColumnMeta(ColumnMetaRequest),
}

impl OutboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinRoom(_) => "joinRoom",
            Self::LeaveRoom(_) => "leaveRoom",
            Self::GetRecord(_) => "getRecord",
            Self::GetGroupPoints(_) => "getGroupPoints",
            Self::RowCreate(_) => "row_create",
            Self::RowUpdate(_) => "row_update",
            Self::UpdateColumnMeta(_) => "update_column_meta",
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetRecordRequest {
    pub table_id: String,
    pub base_id: String,
    pub view_id: String,
    pub should_refresh: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupPointsRequest {
    pub table_id: String,
    pub base_id: String,
    pub view_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowCreateRequest {
    pub table_id: String,
    pub base_id: String,
    pub view_id: String,
    pub socket_id: String,
    pub fields_info: Vec<FieldValuePayload>,
    pub order: Option<RowOrder>,
}

/// Placement of a new row relative to an anchor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowOrder {
    pub view_id: String,
    pub anchor_row_id: Option<i64>,
    pub is_above: bool,
    pub order_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowUpdateRequest {
    pub table_id: String,
    pub base_id: String,
    pub view_id: String,
    pub socket_id: String,
    /// One entry per row, every changed field of that row.
    pub column_values: Vec<RowUpdatePayload>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMetaRequest {
    pub table_id: String,
    pub base_id: String,
    pub view_id: String,
    pub socket_id: String,
    pub column_meta: Vec<ColumnMetaPatch>,
    #[serde(default)]
    pub frozen_columns: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMetaPatch {
    pub field_id: i64,
    pub meta: ColumnMeta,
}

// ───────────────────────────────────────────────────────────────────
// Errors
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("deserialization error: {0}")]
    Deserialization(String),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("connection timeout")]
    Timeout,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_snapshot_event_decode() {
        let text = json!({
            "event": "recordsFetched",
            "data": {
                "fields": [{"id": 1, "type": "NUMBER", "dbFieldName": "n"}],
                "records": [{"__id": 1, "n": "42"}],
                "viewId": "v1"
            }
        })
        .to_string();
        match InboundEvent::decode(&text).unwrap() {
            InboundEvent::RecordsFetched(payload) => {
                assert_eq!(payload.fields.len(), 1);
                assert_eq!(payload.records.len(), 1);
                assert_eq!(payload.view_id.as_deref(), Some("v1"));
                assert!(payload.group_points.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_updated_row_single_and_batch_forms() {
        let single = json!({
            "event": "updated_row",
            "data": {"row_id": 1, "fields_info": [{"field_id": 1, "data": "7"}]}
        });
        let InboundEvent::UpdatedRow(payload) = serde_json::from_value(single).unwrap() else {
            panic!("expected updated_row");
        };
        assert_eq!(payload.updates.len(), 1);
        assert_eq!(payload.updates[0].row_id, 1);

        let batch = json!({
            "event": "updated_row",
            "data": {
                "socket_id": "abc",
                "updates": [
                    {"row_id": "1", "fields_info": []},
                    {"row_id": 2, "fields_info": [{"field_id": "3", "data": null}]}
                ]
            }
        });
        let InboundEvent::UpdatedRow(payload) = serde_json::from_value(batch).unwrap() else {
            panic!("expected updated_row");
        };
        assert_eq!(payload.socket_id.as_deref(), Some("abc"));
        assert_eq!(payload.updates.len(), 2);
        assert_eq!(payload.updates[1].fields_info[0].field_id, 3);
    }

    #[test]
    fn test_unit_events() {
        assert_eq!(InboundEvent::decode(r#"{"event":"connect"}"#).unwrap(), InboundEvent::Connect);
        assert_eq!(InboundEvent::Disconnect.name(), "disconnect");
    }

    #[test]
    fn test_malformed_frames_are_errors() {
        assert!(InboundEvent::decode("not json").is_err());
        assert!(InboundEvent::decode(r#"{"event":"no_such_event","data":{}}"#).is_err());
        assert!(InboundEvent::decode(r#"{"event":"deleted_records","data":{"record_ids":["x"]}}"#).is_err());
    }

    #[test]
    fn test_deleted_records_accepts_string_ids() {
        let event = InboundEvent::decode(
            r#"{"event":"deleted_records","data":{"row_ids":["4", 5],"socket_id":"s"}}"#,
        )
        .unwrap();
        let InboundEvent::DeletedRecords(payload) = event else {
            panic!("expected deleted_records");
        };
        assert_eq!(payload.record_ids, vec![4, 5]);
    }

    #[test]
    fn test_outbound_wire_shape() {
        let event = OutboundEvent::GetRecord(GetRecordRequest {
            table_id: "t".into(),
            base_id: "b".into(),
            view_id: "v".into(),
            should_refresh: true,
        });
        let value: Value = serde_json::from_str(&event.encode().unwrap()).unwrap();
        assert_eq!(value["event"], "getRecord");
        assert_eq!(value["data"]["shouldRefresh"], true);

        let join = OutboundEvent::JoinRoom("t".into());
        assert_eq!(
            serde_json::to_value(&join).unwrap(),
            json!({"event": "joinRoom", "data": "t"})
        );
        assert_eq!(OutboundEvent::decode(&join.encode().unwrap()).unwrap(), join);
    }
}
