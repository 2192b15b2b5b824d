// SPDX-License-Identifier: GPL-2.0-or-later

//! VOD & Export Engine (§4.8): byte-range streaming of finished segment
//! files, lookup-by-instant, and clip export via an external stream-copy
//! tool.

pub mod error;
pub mod export;
pub mod range;
pub mod serve;
pub mod stream;

pub use error::{ExportError, StreamError};
pub use export::{export_clip, DEFAULT_TRANSCODER_BIN};
pub use serve::serve_file;
pub use stream::{stream_by_time, stream_recording};
