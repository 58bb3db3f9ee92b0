use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use gridline_collab::{EngineConfig, InboundEvent, LoopbackHub, SyncEngine, ViewKey};
use serde_json::json;

fn snapshot_frame(rows: usize) -> String {
    let records: Vec<_> = (1..=rows)
        .map(|i| json!({"__id": i, "name": format!("row {i}"), "n": i}))
        .collect();
    json!({
        "event": "recordsFetched",
        "data": {
            "fields": [
                {"id": 1, "type": "SHORT_TEXT", "dbFieldName": "name"},
                {"id": 2, "type": "NUMBER", "dbFieldName": "n"}
            ],
            "records": records,
            "viewId": "v1"
        }
    })
    .to_string()
}

fn update_frame(row: usize, value: usize) -> String {
    json!({
        "event": "updated_row",
        "data": {
            "table_id": "t1",
            "row_id": row,
            "fields_info": [{"field_id": 2, "data": value}]
        }
    })
    .to_string()
}

fn bench_decode_update_frame(c: &mut Criterion) {
    let frame = update_frame(500, 42);
    c.bench_function("decode_updated_row_frame", |b| {
        b.iter(|| black_box(InboundEvent::decode(black_box(&frame)).unwrap()))
    });
}

fn bench_snapshot_1k(c: &mut Criterion) {
    let frame = snapshot_frame(1_000);
    let hub = LoopbackHub::new();
    let (conn, _rx) = hub.connect();
    let mut engine = SyncEngine::new(conn, EngineConfig::default());
    engine.activate(ViewKey::new("t1", "b1", "v1"));

    c.bench_function("apply_snapshot_1k_rows", |b| {
        b.iter(|| engine.handle_frame(black_box(&frame)))
    });
}

fn bench_live_updates(c: &mut Criterion) {
    let hub = LoopbackHub::new();
    let (conn, _rx) = hub.connect();
    let mut engine = SyncEngine::new(conn, EngineConfig::default());
    engine.activate(ViewKey::new("t1", "b1", "v1"));
    engine.handle_frame(&snapshot_frame(1_000));
    let frames: Vec<String> = (0..100).map(|i| update_frame(i * 10 + 1, i)).collect();

    c.bench_function("apply_100_updates_1k_rows", |b| {
        b.iter(|| {
            for frame in &frames {
                engine.handle_frame(black_box(frame));
            }
        })
    });
}

criterion_group!(benches, bench_decode_update_frame, bench_snapshot_1k, bench_live_updates);
criterion_main!(benches);
