//! Task wrapper around [`SyncEngine`].
//!
//! The engine is single-owner; the actor task owns it and interleaves inbound
//! socket events with commands from any number of [`EngineHandle`] clones.
//! Renderers read snapshots from the watch channel without going through
//! the actor.
//!
//! The loop itself never awaits a collaborator. Deletes and view fetches run
//! in their own tasks and report back over an internal channel, so socket
//! events keep flowing while a request is pending.
//!
//! ```text
//!   EngineHandle (Clone)      mpsc       actor task
//!   ┌──────────────────┐  ─────────▶  ┌───────────────────────────┐
//!   │ .create_row()    │              │ SyncEngine                │
//!   │ .update_cells()  │  ◀─────────  │  ◀── InboundSource events │
//!   │ .delete_rows()   │   oneshot    │  ──▶ watch<TableSnapshot> │
//!   └──────────────────┘              └───────────────────────────┘
//! ```

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use gridline_core::{Cell, ColumnMeta, RowId, View};

use crate::api::{ApiError, DeletionApi, ViewsApi};
use crate::connection::Connection;
use crate::engine::{SyncEngine, ViewKey};
use crate::mutations::{CellEdit, InsertPosition, MutationError, PendingDelete};
use crate::protocol::InboundEvent;
use crate::store::{RemovedRow, TableSnapshot};

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("engine shut down")]
    Shutdown,
    #[error(transparent)]
    Mutation(#[from] MutationError),
    #[error(transparent)]
    Api(#[from] ApiError),
}

// ============================================================================
// Inbound event source
// ============================================================================

/// Anything the actor can pull inbound events from.
pub trait InboundSource: Send + 'static {
    /// Next event, or `None` once the source is closed.
    fn next_event(&mut self) -> impl Future<Output = Option<InboundEvent>> + Send;
}

impl InboundSource for mpsc::Receiver<InboundEvent> {
    fn next_event(&mut self) -> impl Future<Output = Option<InboundEvent>> + Send {
        self.recv()
    }
}

impl InboundSource for mpsc::UnboundedReceiver<InboundEvent> {
    fn next_event(&mut self) -> impl Future<Output = Option<InboundEvent>> + Send {
        self.recv()
    }
}

// ============================================================================
// Commands (internal)
// ============================================================================

enum Command {
    Activate {
        key: ViewKey,
        reply: oneshot::Sender<()>,
    },
    LoadViews {
        table_id: String,
        base_id: String,
        view_id: Option<String>,
        reply: oneshot::Sender<Result<ViewKey, ApiError>>,
    },
    Refresh {
        reply: oneshot::Sender<bool>,
    },
    ToggleGroup {
        group_key: String,
        reply: oneshot::Sender<bool>,
    },
    CreateRow {
        anchor: Option<RowId>,
        position: InsertPosition,
        seed: Vec<(String, Value)>,
        reply: oneshot::Sender<Result<RowId, MutationError>>,
    },
    UpdateCells {
        edits: Vec<CellEdit>,
        reply: oneshot::Sender<Result<usize, MutationError>>,
    },
    UpdateCellAt {
        linear: usize,
        column_id: String,
        cell: Cell,
        reply: oneshot::Sender<Result<usize, MutationError>>,
    },
    DeleteRows {
        ids: Vec<RowId>,
        reply: oneshot::Sender<Result<usize, MutationError>>,
    },
    RestoreRows {
        removed: Vec<RemovedRow>,
        reply: oneshot::Sender<()>,
    },
    UpdateColumnMeta {
        column_id: String,
        patch: ColumnMeta,
        reply: oneshot::Sender<Result<(), MutationError>>,
    },
    FreezeColumns {
        count: u32,
        reply: oneshot::Sender<Result<(), MutationError>>,
    },
}

/// Results of collaborator calls, fed back into the actor loop.
enum Completion {
    ViewsFetched {
        table_id: String,
        base_id: String,
        view_id: Option<String>,
        result: Result<Vec<View>, ApiError>,
        reply: oneshot::Sender<Result<ViewKey, ApiError>>,
    },
    Deleted {
        pending: PendingDelete,
        result: Result<(), ApiError>,
        reply: oneshot::Sender<Result<usize, MutationError>>,
    },
}

// ============================================================================
// EngineHandle
// ============================================================================

/// Cloneable handle to a running engine task.
///
/// Dropping every handle stops the task.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<Command>,
    snapshots: watch::Receiver<Arc<TableSnapshot>>,
}

impl EngineHandle {
    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(command(reply))
            .await
            .map_err(|_| EngineError::Shutdown)?;
        rx.await.map_err(|_| EngineError::Shutdown)
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> Arc<TableSnapshot> {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<TableSnapshot>> {
        self.snapshots.clone()
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    pub async fn activate(&self, key: ViewKey) -> Result<(), EngineError> {
        self.request(|reply| Command::Activate { key, reply }).await
    }

    pub async fn load_views(
        &self,
        table_id: &str,
        base_id: &str,
        view_id: Option<&str>,
    ) -> Result<ViewKey, EngineError> {
        Ok(self
            .request(|reply| Command::LoadViews {
                table_id: table_id.to_string(),
                base_id: base_id.to_string(),
                view_id: view_id.map(String::from),
                reply,
            })
            .await??)
    }

    pub async fn refresh(&self) -> Result<bool, EngineError> {
        self.request(|reply| Command::Refresh { reply }).await
    }

    pub async fn toggle_group_collapsed(&self, group_key: &str) -> Result<bool, EngineError> {
        self.request(|reply| Command::ToggleGroup {
            group_key: group_key.to_string(),
            reply,
        })
        .await
    }

    // ── Rows ─────────────────────────────────────────────────────────────

    pub async fn create_row(
        &self,
        anchor: Option<RowId>,
        position: InsertPosition,
        seed: Vec<(String, Value)>,
    ) -> Result<RowId, EngineError> {
        Ok(self
            .request(|reply| Command::CreateRow {
                anchor,
                position,
                seed,
                reply,
            })
            .await??)
    }

    pub async fn update_cells(&self, edits: Vec<CellEdit>) -> Result<usize, EngineError> {
        Ok(self
            .request(|reply| Command::UpdateCells { edits, reply })
            .await??)
    }

    pub async fn update_cell_at(&self, linear: usize, column_id: &str, cell: Cell) -> Result<usize, EngineError> {
        Ok(self
            .request(|reply| Command::UpdateCellAt {
                linear,
                column_id: column_id.to_string(),
                cell,
                reply,
            })
            .await??)
    }

    /// Delete rows. A rejection carries the removed rows; pass them to
    /// [`restore_rows`](Self::restore_rows) to undo.
    pub async fn delete_rows(&self, ids: Vec<RowId>) -> Result<usize, EngineError> {
        Ok(self
            .request(|reply| Command::DeleteRows { ids, reply })
            .await??)
    }

    pub async fn restore_rows(&self, removed: Vec<RemovedRow>) -> Result<(), EngineError> {
        self.request(|reply| Command::RestoreRows { removed, reply }).await
    }

    // ── Columns ──────────────────────────────────────────────────────────

    pub async fn update_column_meta(&self, column_id: &str, patch: ColumnMeta) -> Result<(), EngineError> {
        Ok(self
            .request(|reply| Command::UpdateColumnMeta {
                column_id: column_id.to_string(),
                patch,
                reply,
            })
            .await??)
    }

    pub async fn freeze_columns(&self, count: u32) -> Result<(), EngineError> {
        Ok(self
            .request(|reply| Command::FreezeColumns { count, reply })
            .await??)
    }
}

// ============================================================================
// Actor
// ============================================================================

/// Spawn the engine task.
///
/// Take the notice receiver off the engine before calling this if the UI
/// wants notices.
pub fn spawn_engine<C, S>(
    engine: SyncEngine<C>,
    events: S,
    deletion: Arc<dyn DeletionApi>,
    views: Arc<dyn ViewsApi>,
) -> (EngineHandle, JoinHandle<()>)
where
    C: Connection,
    S: InboundSource,
{
    let (tx, commands) = mpsc::channel(engine.config().command_capacity.max(1));
    let handle = EngineHandle {
        tx,
        snapshots: engine.subscribe(),
    };
    let task = tokio::spawn(run(engine, events, commands, deletion, views));
    (handle, task)
}

async fn run<C: Connection, S: InboundSource>(
    mut engine: SyncEngine<C>,
    mut events: S,
    mut commands: mpsc::Receiver<Command>,
    deletion: Arc<dyn DeletionApi>,
    views: Arc<dyn ViewsApi>,
) {
    let (done_tx, mut done) = mpsc::unbounded_channel();
    let collaborators = Collaborators {
        deletion,
        views,
        done: done_tx,
    };
    let mut events_open = true;
    loop {
        tokio::select! {
            event = events.next_event(), if events_open => match event {
                Some(event) => engine.handle(event),
                None => {
                    log::info!("Inbound event source closed");
                    events_open = false;
                }
            },
            command = commands.recv() => match command {
                Some(command) => dispatch(&mut engine, command, &collaborators),
                None => break,
            },
            Some(completion) = done.recv() => complete(&mut engine, completion),
        }
    }
    log::info!("Sync engine stopped");
}

struct Collaborators {
    deletion: Arc<dyn DeletionApi>,
    views: Arc<dyn ViewsApi>,
    done: mpsc::UnboundedSender<Completion>,
}

impl Collaborators {
    fn fetch_views(
        &self,
        table_id: String,
        base_id: String,
        view_id: Option<String>,
        reply: oneshot::Sender<Result<ViewKey, ApiError>>,
    ) {
        let api = Arc::clone(&self.views);
        let done = self.done.clone();
        tokio::spawn(async move {
            let result = api.fetch_views(&table_id, &base_id).await;
            let _ = done.send(Completion::ViewsFetched {
                table_id,
                base_id,
                view_id,
                result,
                reply,
            });
        });
    }

    fn delete(&self, pending: PendingDelete, reply: oneshot::Sender<Result<usize, MutationError>>) {
        let api = Arc::clone(&self.deletion);
        let done = self.done.clone();
        tokio::spawn(async move {
            let result = api.delete_records(pending.table_id(), pending.record_ids()).await;
            let _ = done.send(Completion::Deleted {
                pending,
                result,
                reply,
            });
        });
    }
}

fn dispatch<C: Connection>(engine: &mut SyncEngine<C>, command: Command, collaborators: &Collaborators) {
    // A dropped receiver means the caller stopped waiting; nothing to do.
    match command {
        Command::Activate { key, reply } => {
            engine.activate(key);
            let _ = reply.send(());
        }
        Command::LoadViews {
            table_id,
            base_id,
            view_id,
            reply,
        } => collaborators.fetch_views(table_id, base_id, view_id, reply),
        Command::Refresh { reply } => {
            let _ = reply.send(engine.refresh());
        }
        Command::ToggleGroup { group_key, reply } => {
            let _ = reply.send(engine.toggle_group_collapsed(&group_key));
        }
        Command::CreateRow {
            anchor,
            position,
            seed,
            reply,
        } => {
            let _ = reply.send(engine.create_row(anchor, position, seed));
        }
        Command::UpdateCells { edits, reply } => {
            let _ = reply.send(engine.update_cells(edits));
        }
        Command::UpdateCellAt {
            linear,
            column_id,
            cell,
            reply,
        } => {
            let _ = reply.send(engine.update_cell_at(linear, &column_id, cell));
        }
        Command::DeleteRows { ids, reply } => match engine.begin_delete(&ids) {
            Ok(pending) if pending.record_ids().is_empty() => {
                let _ = reply.send(engine.finish_delete(pending, Ok(())));
            }
            Ok(pending) => collaborators.delete(pending, reply),
            Err(e) => {
                let _ = reply.send(Err(e));
            }
        },
        Command::RestoreRows { removed, reply } => {
            engine.restore_rows(removed);
            let _ = reply.send(());
        }
        Command::UpdateColumnMeta {
            column_id,
            patch,
            reply,
        } => {
            let _ = reply.send(engine.update_column_meta(&column_id, patch));
        }
        Command::FreezeColumns { count, reply } => {
            let _ = reply.send(engine.freeze_columns(count));
        }
    }
}

fn complete<C: Connection>(engine: &mut SyncEngine<C>, completion: Completion) {
    match completion {
        Completion::ViewsFetched {
            table_id,
            base_id,
            view_id,
            result,
            reply,
        } => {
            let key = result
                .and_then(|views| engine.apply_views(views, &table_id, &base_id, view_id.as_deref()));
            let _ = reply.send(key);
        }
        Completion::Deleted {
            pending,
            result,
            reply,
        } => {
            let _ = reply.send(engine.finish_delete(pending, result));
        }
    }
}
