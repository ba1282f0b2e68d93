/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! View-only state: selection, expansion, gesture and keyboard pan.
//!
//! None of this is part of the conversation tree; it is rebuilt empty on
//! snapshot import.

use std::collections::HashSet;

use crate::config::PanConfig;
use crate::graph::NodeId;
use crate::interaction::InteractionController;
use crate::navigation::Focus;
use crate::viewport::{KeyboardPan, ScreenSize};

#[derive(Debug, Clone, PartialEq)]
pub struct GraphViewState {
    /// Selected node and the message row with focus.
    pub focus: Option<Focus>,
    /// Nodes showing every message row.
    pub expanded: HashSet<NodeId>,
    pub interaction: InteractionController,
    pub keyboard_pan: KeyboardPan,
    pub viewport_size: ScreenSize,
}

impl GraphViewState {
    pub fn new(viewport_size: ScreenSize) -> Self {
        Self::with_pan_config(viewport_size, PanConfig::default())
    }

    pub fn with_pan_config(viewport_size: ScreenSize, pan: PanConfig) -> Self {
        Self {
            focus: None,
            expanded: HashSet::new(),
            interaction: InteractionController::default(),
            keyboard_pan: KeyboardPan::new(pan),
            viewport_size,
        }
    }

    pub fn selected(&self) -> Option<NodeId> {
        self.focus.map(|focus| focus.node)
    }

    pub fn is_expanded(&self, node: NodeId) -> bool {
        self.expanded.contains(&node)
    }

    pub fn toggle_expanded(&mut self, node: NodeId) -> bool {
        if self.expanded.remove(&node) {
            false
        } else {
            self.expanded.insert(node);
            true
        }
    }

    /// Drop every reference to nodes that no longer exist.
    pub fn forget_nodes(&mut self, removed: &[NodeId]) {
        for id in removed {
            self.expanded.remove(id);
        }
        if self.selected().is_some_and(|id| removed.contains(&id)) {
            self.focus = None;
        }
    }
}
