// SPDX-License-Identifier: GPL-2.0-or-later

use ingest::ReconcileError;
use metastore::MetaError;
use storage::UsageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RetentionError {
    /// §5: "retention is single-task globally" — a run is already in
    /// flight, so this call is a no-op rather than a queued second run.
    #[error("a retention run is already in progress")]
    AlreadyRunning,

    #[error("store: {0}")]
    Store(#[from] MetaError),

    #[error("disk usage: {0}")]
    Disk(#[from] UsageError),

    #[error("orphan reconciliation: {0}")]
    Reconcile(#[from] ReconcileError),

    #[error("remove empty directories: {0}")]
    Io(#[from] std::io::Error),
}
