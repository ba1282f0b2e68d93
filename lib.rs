/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Branching conversation tree on a pan/zoom canvas.
//!
//! [`graph`] owns the tree of conversation nodes, [`session`] owns everything
//! a host needs to drive it (viewport, selection, gestures, streams) and takes
//! input as [`session::SessionIntent`]s.

pub mod config;
pub mod generation;
pub mod graph;
pub mod input;
pub mod interaction;
pub mod layout;
pub mod navigation;
pub mod persistence;
pub mod session;
pub mod viewport;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
