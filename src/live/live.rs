// SPDX-License-Identifier: GPL-2.0-or-later

//! The Live Playlist Publisher (§4.7): an on-demand per-camera transcoder
//! child that writes a rolling low-latency HLS playlist, serving blocking
//! `_HLS_msn`/`_HLS_part` reads out of a parsed cache until the camera
//! goes idle.

pub mod cache;
pub mod error;
pub mod publisher;

pub use cache::{parse_playlist, PlaylistCache, PlaylistQuery};
pub use error::{PlaylistError, StartLiveError, StopLiveError};
pub use publisher::LivePublisher;
