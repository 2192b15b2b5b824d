// SPDX-License-Identifier: GPL-2.0-or-later

//! Three-tier retention engine (§4.9): time-based expiry, storage-quota
//! enforcement and disk-safety pruning, each oldest-first and excluding
//! protected recordings, followed by the orphan reconciler's reverse
//! sweep and empty-directory removal.

mod engine;
pub mod error;

pub use engine::{CleanupPreview, CleanupReport, RetentionEngine, BATCH_LIMIT};
pub use error::RetentionError;
