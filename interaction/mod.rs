/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Pointer gesture state machine: node dragging and background panning.
//!
//! A drag records where the pointer and the node were in canvas space when it
//! started, and every move writes `node_start + (pointer - pointer_start)`
//! back through the graph. While a node drag is active nothing else may move
//! nodes; the session refuses layout requests until the pointer is released.

use log::debug;

use crate::graph::{ConversationGraph, GraphError, NodeId};
use crate::viewport::{CanvasPoint, ScreenPoint, Viewport};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeDrag {
    pub node: NodeId,
    pub pointer_start: CanvasPoint,
    pub node_start: CanvasPoint,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum Gesture {
    #[default]
    Idle,
    DraggingNode(NodeDrag),
    /// Panning the canvas; `last` is the previous pointer position.
    PanningCanvas { last: ScreenPoint },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InteractionController {
    gesture: Gesture,
}

impl InteractionController {
    pub fn gesture(&self) -> &Gesture {
        &self.gesture
    }

    pub fn is_idle(&self) -> bool {
        self.gesture == Gesture::Idle
    }

    pub fn is_dragging_node(&self) -> bool {
        matches!(self.gesture, Gesture::DraggingNode(_))
    }

    pub fn dragged_node(&self) -> Option<NodeId> {
        match self.gesture {
            Gesture::DraggingNode(drag) => Some(drag.node),
            _ => None,
        }
    }

    /// Start dragging `node` from screen position `pointer`.
    ///
    /// Returns `false` (and stays put) for the main node, unknown nodes, or
    /// when another gesture is already running.
    pub fn begin_node_drag(
        &mut self,
        graph: &ConversationGraph,
        viewport: &Viewport,
        node: NodeId,
        pointer: ScreenPoint,
    ) -> bool {
        if !self.is_idle() {
            return false;
        }
        let Some(target) = graph.node(node).filter(|n| n.is_draggable()) else {
            return false;
        };
        self.gesture = Gesture::DraggingNode(NodeDrag {
            node,
            pointer_start: viewport.screen_to_canvas(pointer),
            node_start: target.position,
        });
        debug!("drag started on node {node}");
        true
    }

    /// Start panning the background from `pointer`.
    pub fn begin_pan(&mut self, pointer: ScreenPoint) -> bool {
        if !self.is_idle() {
            return false;
        }
        self.gesture = Gesture::PanningCanvas { last: pointer };
        true
    }

    /// Apply a pointer move to the running gesture.
    ///
    /// If the dragged node has disappeared the drag ends and the error is
    /// returned.
    pub fn pointer_moved(
        &mut self,
        graph: &mut ConversationGraph,
        viewport: &mut Viewport,
        pointer: ScreenPoint,
    ) -> Result<(), GraphError> {
        match self.gesture {
            Gesture::Idle => Ok(()),
            Gesture::DraggingNode(drag) => {
                let delta = viewport.screen_to_canvas(pointer) - drag.pointer_start;
                let result = graph.update_position(drag.node, drag.node_start + delta);
                if result.is_err() {
                    self.gesture = Gesture::Idle;
                }
                result
            },
            Gesture::PanningCanvas { last } => {
                viewport.pan_by(pointer - last);
                self.gesture = Gesture::PanningCanvas { last: pointer };
                Ok(())
            },
        }
    }

    /// End whatever gesture is running. Returns the gesture that ended.
    pub fn pointer_released(&mut self) -> Gesture {
        std::mem::take(&mut self.gesture)
    }
}
