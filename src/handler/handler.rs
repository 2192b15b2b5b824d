// SPDX-License-Identifier: GPL-2.0-or-later

//! Thin axum gateway over the §6 operation list. Every route converts its
//! crate-local result into `common::CoreError` (`error.rs`) and never picks
//! HTTP semantics beyond that boundary; authentication is left entirely to
//! whatever sits in front of this router (DESIGN.md).

mod auth;
pub mod cameras;
pub mod error;
pub mod maintenance;
pub mod recordings;
mod router;
pub mod state;

pub use error::ApiError;
pub use router::router;
pub use state::AppState;

#[cfg(test)]
mod test;
