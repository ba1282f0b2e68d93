/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Canvas-space node geometry shared by layout, fitting and navigation.

use serde::{Deserialize, Serialize};

use crate::graph::Message;
use crate::viewport::{CanvasBox, CanvasPoint, CanvasVector};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeMetrics {
    pub width: f64,
    pub header_height: f64,
    pub row_height: f64,
    /// Row height for messages longer than `long_message_chars`.
    pub long_row_height: f64,
    pub long_message_chars: usize,
    pub row_padding: f64,
}

impl Default for NodeMetrics {
    fn default() -> Self {
        Self {
            width: 400.0,
            header_height: 80.0,
            row_height: 120.0,
            long_row_height: 160.0,
            long_message_chars: 150,
            row_padding: 16.0,
        }
    }
}

impl NodeMetrics {
    pub fn row_height_for(&self, message: &Message) -> f64 {
        if message.content.chars().count() > self.long_message_chars {
            self.long_row_height
        } else {
            self.row_height
        }
    }

    /// Vertical offset of message row `index` from the node's top edge.
    pub fn message_offset(&self, index: usize) -> f64 {
        self.header_height + index as f64 * (self.row_height + self.row_padding)
    }

    /// Canvas point at the middle of message row `index`.
    pub fn message_anchor(&self, origin: CanvasPoint, index: usize) -> CanvasPoint {
        origin
            + CanvasVector::new(
                self.width / 2.0,
                self.message_offset(index) + self.row_height / 2.0,
            )
    }

    /// Height of a node showing every message row.
    pub fn expanded_height(&self, messages: &[Message]) -> f64 {
        self.header_height
            + messages
                .iter()
                .map(|m| self.row_height_for(m) + self.row_padding)
                .sum::<f64>()
    }

    /// Height of a collapsed node: header plus one preview row.
    pub fn collapsed_height(&self) -> f64 {
        self.header_height + self.row_height
    }

    /// Canvas rectangle a node covers.
    pub fn footprint(&self, origin: CanvasPoint, messages: &[Message], expanded: bool) -> CanvasBox {
        let height = if expanded {
            self.expanded_height(messages).max(self.collapsed_height())
        } else {
            self.collapsed_height()
        };
        CanvasBox::new(origin, origin + CanvasVector::new(self.width, height))
    }
}
