/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Single owner of the conversation tree and its view.
//!
//! The host feeds input as [`SessionIntent`]s (or calls the matching methods
//! directly) and calls [`BranchSession::tick`] on its frame timer. All tree
//! mutation happens here, on the owning thread; generation backends only talk
//! to the session through stream sinks.

pub mod view_state;

use std::fmt;
use std::path::Path;

use log::{debug, warn};

use crate::config::CanvasConfig;
use crate::generation::{
    GenerationBackend, GenerationRequest, StreamFailure, StreamRegistry, StreamSink,
};
use crate::graph::{ConversationGraph, ForkRequest, GraphError, Message, NodeId, Placement};
use crate::interaction::Gesture;
use crate::layout::spatial_index::NodeSpatialIndex;
use crate::layout::{self, FitRequest, ViewFit};
use crate::navigation::{self, Direction, Focus};
use crate::persistence::types::GraphSnapshot;
use crate::persistence::{self, SnapshotError};
use crate::viewport::{
    CanvasBox, CanvasPoint, PanKey, PanTick, ScreenPoint, ScreenSize, ScreenVector, Viewport,
};

use view_state::GraphViewState;

/// Mutations and view commands, applied in order by [`BranchSession::apply_intents`].
#[derive(Debug, Clone, PartialEq)]
pub enum SessionIntent {
    CreateBranch {
        parent: NodeId,
        message_index: usize,
        position_hint: Option<CanvasPoint>,
    },
    CreateFork {
        parent: NodeId,
        message_index: usize,
        request: ForkRequest,
    },
    DeleteSubtree {
        node: NodeId,
    },
    DeleteSelected,
    SendMessage {
        node: NodeId,
        content: String,
    },
    RenameNode {
        node: NodeId,
        title: String,
    },
    CancelStream {
        node: NodeId,
    },
    FocusMessage {
        focus: Focus,
        zoom_close: bool,
    },
    Navigate {
        direction: Direction,
        zoom_close: bool,
    },
    ToggleExpanded {
        node: NodeId,
    },
    Organize,
    FitToView,
    ZoomAt {
        anchor: ScreenPoint,
        scale: f64,
    },
    ZoomByWheel {
        anchor: ScreenPoint,
        delta: f64,
    },
    ScrollPan {
        delta: ScreenVector,
    },
    PanKeyPressed(PanKey),
    PanKeyReleased(PanKey),
    StopKeyboardPan,
    SetViewportSize(ScreenSize),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionError {
    Graph(GraphError),
    Snapshot(SnapshotError),
    /// Layout was requested while a node is being dragged.
    DragInProgress,
    EmptyMessage,
    NothingSelected,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Graph(e) => write!(f, "{e}"),
            SessionError::Snapshot(e) => write!(f, "snapshot rejected: {e}"),
            SessionError::DragInProgress => write!(f, "a node drag is in progress"),
            SessionError::EmptyMessage => write!(f, "message is empty"),
            SessionError::NothingSelected => write!(f, "no node is selected"),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::Graph(e) => Some(e),
            SessionError::Snapshot(e) => Some(e),
            _ => None,
        }
    }
}

impl From<GraphError> for SessionError {
    fn from(e: GraphError) -> Self {
        SessionError::Graph(e)
    }
}

impl From<SnapshotError> for SessionError {
    fn from(e: SnapshotError) -> Self {
        SessionError::Snapshot(e)
    }
}

/// What one [`BranchSession::tick`] did.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub pan: PanTick,
    pub failures: Vec<StreamFailure>,
}

impl TickReport {
    /// Whether the host can stop scheduling ticks until the next input.
    pub fn is_idle(&self) -> bool {
        self.pan == PanTick::Idle
    }
}

pub struct BranchSession {
    graph: ConversationGraph,
    viewport: Viewport,
    view: GraphViewState,
    streams: StreamRegistry,
    backend: Option<Box<dyn GenerationBackend>>,
    config: CanvasConfig,
}

fn placement_for(config: &CanvasConfig) -> Placement {
    Placement {
        metrics: config.metrics,
        spacing: config.layout.node_spacing,
    }
}

impl BranchSession {
    pub fn new(title: impl Into<String>, viewport_size: ScreenSize, config: CanvasConfig) -> Self {
        let config = config.sanitized();
        let graph = ConversationGraph::new(title).with_placement(placement_for(&config));
        let mut view = GraphViewState::with_pan_config(viewport_size, config.pan);
        view.focus = Some(Focus::new(graph.main_id(), 0));
        Self {
            graph,
            viewport: Viewport::new(config.viewport),
            view,
            streams: StreamRegistry::new(),
            backend: None,
            config,
        }
    }

    pub fn with_backend(mut self, backend: Box<dyn GenerationBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn set_backend(&mut self, backend: Option<Box<dyn GenerationBackend>>) {
        self.backend = backend;
    }

    pub fn graph(&self) -> &ConversationGraph {
        &self.graph
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn view(&self) -> &GraphViewState {
        &self.view
    }

    pub fn config(&self) -> &CanvasConfig {
        &self.config
    }

    pub fn is_streaming(&self, node: NodeId) -> bool {
        self.streams.is_streaming(node)
    }

    /// Apply intents in order. Failures are logged and collected; a failed
    /// intent never stops the ones after it.
    pub fn apply_intents<I>(&mut self, intents: I) -> Vec<SessionError>
    where
        I: IntoIterator<Item = SessionIntent>,
    {
        let mut errors = Vec::new();
        for intent in intents {
            if let Err(e) = self.apply_intent(intent) {
                warn!("intent rejected: {e}");
                errors.push(e);
            }
        }
        errors
    }

    fn apply_intent(&mut self, intent: SessionIntent) -> Result<(), SessionError> {
        match intent {
            SessionIntent::CreateBranch {
                parent,
                message_index,
                position_hint,
            } => {
                self.create_branch(parent, message_index, position_hint)?;
            },
            SessionIntent::CreateFork {
                parent,
                message_index,
                request,
            } => {
                self.create_fork(parent, message_index, request)?;
            },
            SessionIntent::DeleteSubtree { node } => {
                self.delete_subtree(node)?;
            },
            SessionIntent::DeleteSelected => {
                let node = self.view.selected().ok_or(SessionError::NothingSelected)?;
                self.delete_subtree(node)?;
            },
            SessionIntent::SendMessage { node, content } => self.send_message(node, &content)?,
            SessionIntent::RenameNode { node, title } => self.graph.rename_node(node, title)?,
            SessionIntent::CancelStream { node } => {
                self.cancel_stream(node);
            },
            SessionIntent::FocusMessage { focus, zoom_close } => {
                self.focus_message(focus, zoom_close)
                    .ok_or(GraphError::UnknownNode(focus.node))?;
            },
            SessionIntent::Navigate {
                direction,
                zoom_close,
            } => {
                self.navigate(direction, zoom_close);
            },
            SessionIntent::ToggleExpanded { node } => {
                if !self.graph.contains(node) {
                    return Err(GraphError::UnknownNode(node).into());
                }
                self.view.toggle_expanded(node);
            },
            SessionIntent::Organize => self.organize()?,
            SessionIntent::FitToView => {
                self.fit_to_view();
            },
            SessionIntent::ZoomAt { anchor, scale } => {
                self.viewport.zoom_at(anchor, scale);
            },
            SessionIntent::ZoomByWheel { anchor, delta } => {
                self.viewport.zoom_by_wheel(anchor, delta);
            },
            SessionIntent::ScrollPan { delta } => self.viewport.scroll_pan(delta),
            SessionIntent::PanKeyPressed(key) => self.view.keyboard_pan.press(key),
            SessionIntent::PanKeyReleased(key) => self.view.keyboard_pan.release(key),
            SessionIntent::StopKeyboardPan => self.view.keyboard_pan.clear(),
            SessionIntent::SetViewportSize(size) => self.view.viewport_size = size,
        }
        Ok(())
    }

    /// Fork a branch and select it.
    pub fn create_branch(
        &mut self,
        parent: NodeId,
        message_index: usize,
        position_hint: Option<CanvasPoint>,
    ) -> Result<NodeId, SessionError> {
        self.create_fork(parent, message_index, ForkRequest::branch(position_hint))
    }

    pub fn create_fork(
        &mut self,
        parent: NodeId,
        message_index: usize,
        request: ForkRequest,
    ) -> Result<NodeId, SessionError> {
        let id = self.graph.create_fork(parent, message_index, request)?;
        self.view.focus = Some(Focus::new(id, 0));
        Ok(id)
    }

    /// Delete `node` and its descendants, cancelling their streams. If the
    /// selection was removed it falls back to the main node.
    pub fn delete_subtree(&mut self, node: NodeId) -> Result<Vec<NodeId>, SessionError> {
        let removed = self.graph.delete_subtree(node)?;
        for id in &removed {
            self.streams.cancel(*id);
        }
        if self
            .view
            .interaction
            .dragged_node()
            .is_some_and(|id| removed.contains(&id))
        {
            self.view.interaction.pointer_released();
        }
        self.view.forget_nodes(&removed);
        if self.view.focus.is_none() {
            self.view.focus = Some(Focus::new(self.graph.main_id(), 0));
        }
        Ok(removed)
    }

    /// Append a user turn to `node` and, if a backend is attached, start
    /// streaming the assistant's answer into it.
    pub fn send_message(&mut self, node: NodeId, content: &str) -> Result<(), SessionError> {
        if content.trim().is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        self.graph.append_message(node, Message::user(content))?;

        let Some(backend) = self.backend.as_ref() else {
            return Ok(());
        };
        let context = self.graph.context_chain(node)?;
        let system_prompt = self
            .graph
            .node(node)
            .and_then(|n| n.system_prompt.clone())
            .or_else(|| self.config.stream.system_prompt.clone());
        let request = GenerationRequest {
            node,
            context,
            model: self.config.stream.model.clone(),
            system_prompt,
            sampling: self.config.stream.sampling,
        };
        let sink: StreamSink = self.streams.open(node);
        backend.start(request, sink);
        debug!("started generation for node {node}");
        Ok(())
    }

    /// Stop the stream for `node` and drop its partial output.
    pub fn cancel_stream(&mut self, node: NodeId) -> bool {
        let cancelled = self.streams.cancel(node);
        if cancelled && let Err(e) = self.graph.clear_streaming_content(node) {
            debug!("cancelled stream had no node to clear: {e}");
        }
        cancelled
    }

    /// Apply queued stream events to the tree.
    pub fn pump_streams(&mut self) -> Vec<StreamFailure> {
        self.streams.drain(&mut self.graph)
    }

    pub fn focus_message(&mut self, focus: Focus, zoom_close: bool) -> Option<Focus> {
        let previous = self.view.selected();
        let landed = navigation::focus_on_message(
            &self.graph,
            &mut self.view,
            &mut self.viewport,
            &self.config.metrics,
            focus,
            zoom_close,
        )?;
        self.left_node(previous, landed.node);
        Some(landed)
    }

    /// Move focus one step. `None` means there was nowhere to go and nothing
    /// changed.
    pub fn navigate(&mut self, direction: Direction, zoom_close: bool) -> Option<Focus> {
        let previous = self.view.selected();
        let landed = navigation::navigate(
            &self.graph,
            &mut self.view,
            &mut self.viewport,
            &self.config.metrics,
            direction,
            zoom_close,
        )?;
        self.left_node(previous, landed.node);
        Some(landed)
    }

    fn left_node(&mut self, previous: Option<NodeId>, current: NodeId) {
        if let Some(previous) = previous
            && previous != current
            && self.config.stream.cancel_on_navigate
            && self.cancel_stream(previous)
        {
            debug!("navigated away from streaming node {previous}");
        }
    }

    /// Hierarchical re-layout followed by a fit. Refused while a node is
    /// being dragged.
    pub fn organize(&mut self) -> Result<(), SessionError> {
        if self.view.interaction.is_dragging_node() {
            return Err(SessionError::DragInProgress);
        }
        layout::stack_organize(&self.graph, &self.config.layout).apply(&mut self.graph)?;
        self.fit_to_view();
        Ok(())
    }

    fn footprints(&self) -> Vec<(NodeId, CanvasBox)> {
        self.graph
            .nodes()
            .map(|node| {
                (
                    node.id,
                    self.config.metrics.footprint(
                        node.position,
                        &node.messages,
                        self.view.is_expanded(node.id),
                    ),
                )
            })
            .collect()
    }

    /// Show the whole tree. Returns the applied transform, or `None` when the
    /// viewport has no usable area.
    pub fn fit_to_view(&mut self) -> Option<ViewFit> {
        let request = FitRequest {
            viewport: self.view.viewport_size,
            padding: self.config.layout.fit_padding,
            reserved_width: self.config.layout.reserved_width,
            min_scale: self.config.viewport.min_scale,
            max_scale: self.config.viewport.max_scale,
        };
        let fit = layout::fit_to_viewport(self.footprints().into_iter().map(|(_, r)| r), &request)?;
        self.viewport.set_transform(fit.scale, fit.translate);
        Some(fit)
    }

    /// Advance the keyboard pan by one step and apply pending stream output.
    pub fn tick(&mut self) -> TickReport {
        let pan = self.view.keyboard_pan.step();
        if let PanTick::Moved(delta) = pan {
            self.viewport.translate_by(delta);
        }
        TickReport {
            pan,
            failures: self.pump_streams(),
        }
    }

    /// Topmost node under a screen position.
    pub fn node_at(&self, pointer: ScreenPoint) -> Option<NodeId> {
        NodeSpatialIndex::from_footprints(self.footprints())
            .node_at(self.viewport.screen_to_canvas(pointer))
    }

    /// Pointer pressed: select and start dragging the node under the pointer,
    /// or start panning the background. Returns the node hit, if any.
    pub fn pointer_down(&mut self, pointer: ScreenPoint) -> Option<NodeId> {
        match self.node_at(pointer) {
            Some(node) => {
                let previous = self.view.selected();
                if previous != Some(node) {
                    self.view.focus = Some(Focus::new(node, 0));
                    self.left_node(previous, node);
                }
                self.view
                    .interaction
                    .begin_node_drag(&self.graph, &self.viewport, node, pointer);
                Some(node)
            },
            None => {
                self.view.interaction.begin_pan(pointer);
                None
            },
        }
    }

    pub fn pointer_move(&mut self, pointer: ScreenPoint) -> Result<(), SessionError> {
        self.view
            .interaction
            .pointer_moved(&mut self.graph, &mut self.viewport, pointer)?;
        Ok(())
    }

    pub fn pointer_up(&mut self) -> Gesture {
        self.view.interaction.pointer_released()
    }

    pub fn export_snapshot(&self) -> GraphSnapshot {
        self.graph.to_snapshot()
    }

    /// Replace the tree with `snapshot`. On any validation failure the current
    /// tree and view stay exactly as they were.
    pub fn import_snapshot(&mut self, snapshot: &GraphSnapshot) -> Result<(), SessionError> {
        let graph = ConversationGraph::try_from_snapshot(snapshot)
            .inspect_err(|e| warn!("snapshot import rejected: {e}"))?;
        self.streams.cancel_all();
        self.graph = graph.with_placement(placement_for(&self.config));
        let mut view =
            GraphViewState::with_pan_config(self.view.viewport_size, self.config.pan);
        view.focus = Some(Focus::new(self.graph.main_id(), 0));
        self.view = view;
        debug!("imported snapshot with {} nodes", self.graph.len());
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<(), SessionError> {
        persistence::save(path, &self.export_snapshot())?;
        Ok(())
    }

    pub fn load(&mut self, path: &Path) -> Result<(), SessionError> {
        let snapshot = persistence::load(path)?;
        self.import_snapshot(&snapshot)
    }
}
