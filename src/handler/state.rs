// SPDX-License-Identifier: GPL-2.0-or-later

use std::{path::PathBuf, sync::Arc};

use common::{ArcLogger, EncryptionKey};
use ingest::IngestSupervisor;
use live::LivePublisher;
use metastore::MetaStore;
use retention::RetentionEngine;
use storage::Disk;

/// Everything a route handler needs, shared across every request. Cheap to
/// clone: every field is already an `Arc` or a handle that wraps one.
#[derive(Clone)]
pub struct AppState {
    pub store: MetaStore,
    pub ingest: Arc<IngestSupervisor>,
    pub live: Arc<LivePublisher>,
    pub retention: Arc<RetentionEngine>,
    pub disk: Arc<Disk>,
    pub recordings_dir: PathBuf,
    pub export_dir: PathBuf,
    pub encryption_key: EncryptionKey,
    pub logger: ArcLogger,
}
