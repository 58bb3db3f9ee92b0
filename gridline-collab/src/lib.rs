//! # gridline-collab: Live synchronization for Gridline tables
//!
//! Keeps a local copy of one table view consistent with the server and with
//! every other client editing it.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  named events   ┌──────────────┐
//! │ Connection   │ ◄─────────────► │ server rooms │
//! │ (ws/loopback)│  JSON frames    │ table / view │
//! └──────┬───────┘                 └──────────────┘
//!        │ InboundEvent
//!        ▼
//! ┌──────────────┐   mutations    ┌──────────────┐
//! │ SyncEngine   │ ─────────────► │ TableStore   │
//! │ (actor task) │                │ cols/rows    │
//! └──────┬───────┘                └──────┬───────┘
//!        │ Notice                        │ watch<Arc<TableSnapshot>>
//!        ▼                               ▼
//!       UI toasts                     renderers
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: inbound/outbound event enums and their JSON payloads
//! - [`connection`]: `Connection` trait and the WebSocket transport
//! - [`rooms`]: in-process room relay for tests and local demos
//! - [`store`]: authoritative table state and published snapshots
//! - [`engine`]: socket reconciliation and snapshot lifecycle
//! - [`mutations`]: optimistic create/update/delete and column meta
//! - [`actor`]: task wrapper with a cloneable handle
//! - [`api`]: request/response collaborators (deletion, views)
//! - [`config`]: engine settings

pub mod actor;
pub mod api;
pub mod config;
pub mod connection;
pub mod engine;
pub mod mutations;
pub mod protocol;
pub mod rooms;
pub mod store;

// Re-exports for convenience
pub use actor::{spawn_engine, EngineError, EngineHandle, InboundSource};
pub use api::{ApiError, DeletionApi, ViewsApi};
pub use config::{EngineConfig, RowHeights};
pub use connection::{Connection, ConnectionState, WsConnection};
pub use engine::{Notice, SyncEngine, SyncPhase, ViewKey};
pub use mutations::{CellEdit, InsertPosition, MutationError, PendingDelete};
pub use protocol::{InboundEvent, OutboundEvent, ProtocolError};
pub use rooms::{LoopbackConnection, LoopbackHub, RelayStats};
pub use store::{FormulaState, RemovedRow, StoreError, TableSnapshot, TableStore};
