//! Request/response collaborators the engine calls out to.

use async_trait::async_trait;

use gridline_core::View;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("table {0} has no views")]
    NoViews(String),
}

/// Deletes records on the server.
#[async_trait]
pub trait DeletionApi: Send + Sync {
    async fn delete_records(&self, table_id: &str, record_ids: &[i64]) -> Result<(), ApiError>;
}

/// Fetches the views of a table.
#[async_trait]
pub trait ViewsApi: Send + Sync {
    async fn fetch_views(&self, table_id: &str, base_id: &str) -> Result<Vec<View>, ApiError>;
}
