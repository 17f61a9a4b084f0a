//! Operation log vocabulary.
//!
//! An operation log row records one destructive or reversible filesystem
//! action. File-operation batches pre-create one pending row per item; the
//! conversion pipeline writes one row per invocation as an audit record.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Kind of filesystem action recorded in an operation log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Convert,
    Rename,
    Move,
    Delete,
    MetadataUpdate,
    Restore,
}

impl OperationKind {
    /// Convert from a database string value.
    pub fn from_str_value(s: &str) -> Result<Self, CoreError> {
        match s {
            "convert" => Ok(Self::Convert),
            "rename" => Ok(Self::Rename),
            "move" => Ok(Self::Move),
            "delete" => Ok(Self::Delete),
            "metadata_update" => Ok(Self::MetadataUpdate),
            "restore" => Ok(Self::Restore),
            _ => Err(CoreError::Validation(format!(
                "Invalid operation '{s}'. Must be one of: convert, rename, move, delete, metadata_update, restore"
            ))),
        }
    }

    /// Convert to the database string value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Convert => "convert",
            Self::Rename => "rename",
            Self::Move => "move",
            Self::Delete => "delete",
            Self::MetadataUpdate => "metadata_update",
            Self::Restore => "restore",
        }
    }

    /// Whether items of this kind must name a destination path.
    pub fn needs_destination(&self) -> bool {
        matches!(self, Self::Rename | Self::Move | Self::Restore)
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome status of an operation log row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Success,
    Failed,
}

impl OperationStatus {
    pub fn from_str_value(s: &str) -> Result<Self, CoreError> {
        match s {
            "pending" => Ok(Self::Pending),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            _ => Err(CoreError::Validation(format!(
                "Invalid operation status '{s}'"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

/// Caller-supplied description of one file operation to batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileOperationInput {
    pub operation: OperationKind,
    pub source_path: String,
    pub destination_path: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Completed operation that can be reversed by a `restore_original` batch.
#[derive(Debug, Clone)]
pub struct ReversibleOperation<'a> {
    pub operation: OperationKind,
    pub status: OperationStatus,
    pub reversible: bool,
    pub source_path: &'a str,
    pub destination_path: Option<&'a str>,
    /// Catalog record snapshot to re-register once the file is back.
    pub catalog_record: Option<&'a serde_json::Value>,
}

/// Metadata key of a catalog record snapshot carried by delete and restore
/// operations.
pub const CATALOG_RECORD_KEY: &str = "catalog_record";

/// Build restore inputs that move files back to where they were before.
///
/// Only successful, reversible operations that moved a file somewhere are
/// included; everything else is skipped. Inputs come out in reverse order
/// of `operations`, so chains like `a -> b, c -> a` unwind as `a -> c`
/// before `b -> a`.
pub fn reversal_inputs(operations: &[ReversibleOperation<'_>]) -> Vec<FileOperationInput> {
    operations
        .iter()
        .rev()
        .filter(|op| op.status == OperationStatus::Success && op.reversible)
        .filter_map(|op| {
            let current = op.destination_path?;
            let mut metadata = serde_json::json!({ "reverses": op.operation.as_str() });
            if let Some(record) = op.catalog_record {
                metadata[CATALOG_RECORD_KEY] = record.clone();
            }
            Some(FileOperationInput {
                operation: OperationKind::Restore,
                source_path: current.to_string(),
                destination_path: Some(op.source_path.to_string()),
                metadata,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips() {
        for kind in [
            OperationKind::Convert,
            OperationKind::Rename,
            OperationKind::Move,
            OperationKind::Delete,
            OperationKind::MetadataUpdate,
            OperationKind::Restore,
        ] {
            assert_eq!(OperationKind::from_str_value(kind.as_str()).unwrap(), kind);
        }
        assert!(OperationKind::from_str_value("copy").is_err());
    }

    #[test]
    fn destination_required_for_path_changes() {
        assert!(OperationKind::Rename.needs_destination());
        assert!(OperationKind::Restore.needs_destination());
        assert!(!OperationKind::Delete.needs_destination());
        assert!(!OperationKind::MetadataUpdate.needs_destination());
    }

    #[test]
    fn reversal_swaps_paths_of_successful_reversible_ops() {
        let ops = [
            ReversibleOperation {
                operation: OperationKind::Rename,
                status: OperationStatus::Success,
                reversible: true,
                source_path: "/lib/a.cbz",
                destination_path: Some("/lib/Alpha 001.cbz"),
                catalog_record: None,
            },
            ReversibleOperation {
                operation: OperationKind::Rename,
                status: OperationStatus::Failed,
                reversible: true,
                source_path: "/lib/b.cbz",
                destination_path: Some("/lib/Beta 001.cbz"),
                catalog_record: None,
            },
            ReversibleOperation {
                operation: OperationKind::Delete,
                status: OperationStatus::Success,
                reversible: false,
                source_path: "/lib/c.cbz",
                destination_path: None,
                catalog_record: None,
            },
        ];

        let inputs = reversal_inputs(&ops);
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs[0].operation, OperationKind::Restore);
        assert_eq!(inputs[0].source_path, "/lib/Alpha 001.cbz");
        assert_eq!(inputs[0].destination_path.as_deref(), Some("/lib/a.cbz"));
    }

    #[test]
    fn reversal_unwinds_chains_last_first() {
        let renamed = |from, to| ReversibleOperation {
            operation: OperationKind::Rename,
            status: OperationStatus::Success,
            reversible: true,
            source_path: from,
            destination_path: Some(to),
            catalog_record: None,
        };
        let ops = [renamed("/lib/a.cbz", "/lib/b.cbz"), renamed("/lib/c.cbz", "/lib/a.cbz")];

        let inputs = reversal_inputs(&ops);

        let moves: Vec<_> = inputs
            .iter()
            .map(|i| (i.source_path.as_str(), i.destination_path.as_deref()))
            .collect();
        assert_eq!(
            moves,
            vec![("/lib/a.cbz", Some("/lib/c.cbz")), ("/lib/b.cbz", Some("/lib/a.cbz"))]
        );
    }

    #[test]
    fn reversal_carries_catalog_snapshot() {
        let record = serde_json::json!({ "library_id": 4, "metadata": {"series": "Saga"} });
        let ops = [ReversibleOperation {
            operation: OperationKind::Delete,
            status: OperationStatus::Success,
            reversible: true,
            source_path: "/lib/old.cbz",
            destination_path: Some("/trash/7-old.cbz"),
            catalog_record: Some(&record),
        }];

        let inputs = reversal_inputs(&ops);

        assert_eq!(inputs[0].metadata[CATALOG_RECORD_KEY], record);
        assert_eq!(inputs[0].metadata["reverses"], "delete");
    }
}
