// SPDX-License-Identifier: GPL-2.0-or-later

//! The Ingest Supervisor (§4.3): spawns and watches one transcoder child
//! process per actively-recording camera, rotates segment files into the
//! metadata store as they close, and reconciles the recording index against
//! whatever is actually on disk (§4.5, §4.6).

mod duration_probe;
pub mod error;
pub mod finalizer;
pub mod reconciler;
pub mod rtsp;
pub mod supervisor;

pub use error::{FinalizeError, ReconcileError, StartRecordingError};
pub use finalizer::{finalize_segment, FinalizeInput};
pub use reconciler::{reconcile_forward, reconcile_reverse, remove_empty_dirs};
pub use rtsp::rtsp_url;
pub use supervisor::{IngestSupervisor, StopRecordingError};
