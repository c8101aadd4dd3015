//! Application Pipeline
//!
//! Applies a batch of planned operations through the host adapter. Every
//! operation is attempted; a failure is recorded against its identity and
//! the batch moves on. There is no rollback and no retry.

use rns_core::{ErrorKind, OperationId, PlannedOperation};
use serde::Serialize;
use uuid::Uuid;

use crate::host::{dispatch, HostAdapter};
use crate::resolver::ResolveWarning;

/// A failed operation and why.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedOperation {
    pub id: OperationId,
    pub kind: ErrorKind,
    pub message: String,
}

/// Aggregate outcome of one batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplyReport {
    pub batch_id: Uuid,
    pub applied: Vec<OperationId>,
    pub failed: Vec<FailedOperation>,
    pub warnings: Vec<ResolveWarning>,
}

impl ApplyReport {
    pub fn empty() -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            applied: Vec::new(),
            failed: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Every operation was applied.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.applied.len() + self.failed.len()
    }

    /// Fold another batch into this one.
    pub fn merge(&mut self, other: ApplyReport) {
        self.applied.extend(other.applied);
        self.failed.extend(other.failed);
        self.warnings.extend(other.warnings);
    }
}

/// Apply operations in stage order.
///
/// Input that is already stage-sorted keeps its order.
pub fn apply_operations(
    host: &mut dyn HostAdapter,
    operations: &[PlannedOperation],
) -> ApplyReport {
    let mut ordered: Vec<&PlannedOperation> = operations.iter().collect();
    ordered.sort_by_key(|op| op.stage());

    let mut report = ApplyReport::empty();
    let span = tracing::debug_span!("apply", batch = %report.batch_id, count = ordered.len());
    let _enter = span.enter();

    for (index, planned) in ordered.into_iter().enumerate() {
        let id = OperationId {
            index,
            stage: planned.stage(),
            origin: planned.origin.clone(),
            key: planned.operation.key(),
        };

        match dispatch(host, &planned.operation) {
            Ok(()) => {
                tracing::debug!("Applied {}", id);
                report.applied.push(id);
            }
            Err(e) => {
                tracing::warn!("Failed to apply {}: {}", id, e);
                report.failed.push(FailedOperation {
                    id,
                    kind: ErrorKind::PrimitiveApplyFailure,
                    message: e.to_string(),
                });
            }
        }
    }

    if !report.failed.is_empty() || !report.applied.is_empty() {
        tracing::info!(
            "Batch {}: {} applied, {} failed",
            report.batch_id,
            report.applied.len(),
            report.failed.len()
        );
    }
    report
}
