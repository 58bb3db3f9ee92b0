//! The engine over a real WebSocket.
//!
//! A minimal server answers `getRecord` with a snapshot and then sends a
//! malformed frame, which must be dropped without disturbing the client.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use gridline_collab::{
    spawn_engine, ApiError, DeletionApi, EngineConfig, OutboundEvent, SyncEngine, SyncPhase,
    ViewKey, ViewsApi, WsConnection,
};
use gridline_core::{CellValue, RowId, View};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::Message;

struct Offline;

#[async_trait]
impl DeletionApi for Offline {
    async fn delete_records(&self, _table_id: &str, _record_ids: &[i64]) -> Result<(), ApiError> {
        Err(ApiError::Request("offline".into()))
    }
}

#[async_trait]
impl ViewsApi for Offline {
    async fn fetch_views(&self, _table_id: &str, _base_id: &str) -> Result<Vec<View>, ApiError> {
        Err(ApiError::Request("offline".into()))
    }
}

/// Accept one client and answer its snapshot requests.
async fn start_server() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        while let Some(Ok(msg)) = ws.next().await {
            let Message::Text(text) = msg else { continue };
            let Ok(OutboundEvent::GetRecord(request)) = OutboundEvent::decode(text.as_str()) else {
                continue;
            };
            let reply = json!({
                "event": "recordsFetched",
                "data": {
                    "fields": [{"id": 1, "type": "NUMBER", "dbFieldName": "n"}],
                    "records": [{"__id": 1, "n": 3}],
                    "viewId": request.view_id
                }
            });
            ws.send(Message::Text(reply.to_string().into())).await.unwrap();
            ws.send(Message::Text("{not json".into())).await.unwrap();
        }
    });
    port
}

#[tokio::test]
async fn test_snapshot_over_websocket() {
    let _ = env_logger::builder().is_test(true).try_init();
    let port = start_server().await;

    let mut conn = WsConnection::new(format!("ws://127.0.0.1:{port}"), 64);
    let events = conn.take_event_rx().unwrap();
    conn.connect().await.unwrap();

    let engine = SyncEngine::new(conn, EngineConfig::default());
    let (handle, _task) = spawn_engine(engine, events, Arc::new(Offline), Arc::new(Offline));
    handle.activate(ViewKey::new("t1", "b1", "v1")).await.unwrap();

    let mut snapshots = handle.subscribe();
    let snapshot = timeout(
        Duration::from_secs(5),
        snapshots.wait_for(|s| s.phase == SyncPhase::Synchronized),
    )
    .await
    .expect("snapshot within timeout")
    .unwrap()
    .clone();

    assert_eq!(snapshot.records.len(), 1);
    assert_eq!(snapshot.records[0].id, RowId::Server(1));
    assert_eq!(
        snapshot.records[0].cell("n").unwrap().value,
        CellValue::Number(Some(3.0))
    );
}
