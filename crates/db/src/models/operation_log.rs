//! Operation log models and DTOs.

use bindery_core::error::CoreError;
use bindery_core::operation::{OperationKind, OperationStatus};
use bindery_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `operation_logs` table.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct OperationLog {
    pub id: DbId,
    pub batch_id: Option<DbId>,
    pub operation: String,
    pub source_path: String,
    pub destination_path: Option<String>,
    pub status: String,
    pub reversible: bool,
    pub metadata: serde_json::Value,
    pub error: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl OperationLog {
    pub fn kind(&self) -> Result<OperationKind, CoreError> {
        OperationKind::from_str_value(&self.operation)
    }

    pub fn outcome(&self) -> Result<OperationStatus, CoreError> {
        OperationStatus::from_str_value(&self.status)
    }

    /// Last path component of the source, used in error summaries.
    pub fn filename(&self) -> String {
        std::path::Path::new(&self.source_path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.source_path.clone())
    }
}

/// DTO for inserting an operation log row.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateOperationLog {
    pub batch_id: Option<DbId>,
    pub operation: String,
    pub source_path: String,
    pub destination_path: Option<String>,
    pub status: String,
    pub reversible: bool,
    pub metadata: serde_json::Value,
    pub error: Option<String>,
}

/// Final outcome written to a pending operation log row.
#[derive(Debug, Clone)]
pub struct FinishOperationLog {
    pub status: OperationStatus,
    pub reversible: bool,
    pub metadata: Option<serde_json::Value>,
    pub error: Option<String>,
}
