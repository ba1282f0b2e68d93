/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Directional navigation across messages, sibling branches and parents.
//!
//! `up`/`down` step through a node's messages and fall through to the nearest
//! sibling above or below once the first or last message is reached.
//! `left`/`right` return to the parent when it sits on that side of the
//! screen, otherwise they cycle through the children forked at the focused
//! message on that side.

use crate::graph::{ConversationGraph, Node, NodeId};
use crate::layout::metrics::NodeMetrics;
use crate::session::view_state::GraphViewState;
use crate::viewport::Viewport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

/// Screen side a related node sits on, relative to the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

/// Selected node plus the message row that has focus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Focus {
    pub node: NodeId,
    pub message_index: usize,
}

impl Focus {
    pub fn new(node: NodeId, message_index: usize) -> Self {
        Self {
            node,
            message_index,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParentLink {
    pub node: NodeId,
    pub side: Side,
    /// Message of the parent this node was forked from.
    pub message_index: usize,
}

/// Result of [`connected_branches`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectedBranches {
    pub parent: Option<ParentLink>,
    /// Children left of the node, nearest first.
    pub left: Vec<NodeId>,
    /// Children at or right of the node's `x`, nearest first.
    pub right: Vec<NodeId>,
}

impl ConnectedBranches {
    fn side(&self, side: Side) -> &[NodeId] {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }
}

pub fn connected_branches(
    graph: &ConversationGraph,
    node: NodeId,
    message_index: usize,
) -> ConnectedBranches {
    let Some(current) = graph.node(node) else {
        return ConnectedBranches::default();
    };

    let parent = current.fork().and_then(|fork| {
        let parent = graph.node(fork.parent)?;
        let side = if parent.position.x < current.position.x {
            Side::Left
        } else {
            Side::Right
        };
        Some(ParentLink {
            node: parent.id,
            side,
            message_index: fork.message_index,
        })
    });

    let x = current.position.x;
    let mut left: Vec<&Node> = Vec::new();
    let mut right: Vec<&Node> = Vec::new();
    for child in graph
        .children_at(node, message_index)
        .into_iter()
        .filter_map(|id| graph.node(id))
    {
        if child.position.x < x {
            left.push(child);
        } else {
            right.push(child);
        }
    }
    let by_proximity = |a: &&Node, b: &&Node| {
        (a.position.x - x)
            .abs()
            .total_cmp(&(b.position.x - x).abs())
            .then_with(|| a.id.cmp(&b.id))
    };
    left.sort_by(by_proximity);
    right.sort_by(by_proximity);

    ConnectedBranches {
        parent,
        left: left.into_iter().map(|n| n.id).collect(),
        right: right.into_iter().map(|n| n.id).collect(),
    }
}

fn clamp_index(node: &Node, index: usize) -> usize {
    index.min(node.last_message_index().unwrap_or(0))
}

/// Where `direction` leads from `from`, or `None` when there is nowhere to go.
///
/// Landing indices are clamped into the destination's message range.
pub fn transition(graph: &ConversationGraph, from: Focus, direction: Direction) -> Option<Focus> {
    let current = graph.node(from.node)?;
    let index = clamp_index(current, from.message_index);

    match direction {
        Direction::Up => {
            if index > 0 {
                return Some(Focus::new(current.id, index - 1));
            }
            let y = current.position.y;
            let above = graph
                .siblings_of(current.id)
                .into_iter()
                .rev()
                .filter_map(|id| graph.node(id))
                .find(|sibling| sibling.position.y < y)?;
            Some(Focus::new(above.id, above.last_message_index().unwrap_or(0)))
        },
        Direction::Down => {
            if index + 1 < current.messages.len() {
                return Some(Focus::new(current.id, index + 1));
            }
            let y = current.position.y;
            let below = graph
                .siblings_of(current.id)
                .into_iter()
                .filter_map(|id| graph.node(id))
                .find(|sibling| sibling.position.y > y)?;
            Some(Focus::new(below.id, 0))
        },
        Direction::Left | Direction::Right => {
            let side = if direction == Direction::Left {
                Side::Left
            } else {
                Side::Right
            };
            let branches = connected_branches(graph, current.id, index);
            if let Some(parent) = branches.parent.filter(|p| p.side == side) {
                let parent_node = graph.node(parent.node)?;
                return Some(Focus::new(
                    parent.node,
                    clamp_index(parent_node, parent.message_index),
                ));
            }
            let candidates = branches.side(side);
            if candidates.is_empty() {
                return None;
            }
            let next = candidates
                .iter()
                .position(|id| *id == current.id)
                .map_or(0, |i| (i + 1) % candidates.len());
            Some(Focus::new(candidates[next], 0))
        },
    }
}

/// Select `target`, expand its node and center the viewport on the message.
///
/// `zoom_close` also switches to the configured close-up scale. Returns the
/// focus actually applied, with the index clamped, or `None` for an unknown
/// node.
pub fn focus_on_message(
    graph: &ConversationGraph,
    view: &mut GraphViewState,
    viewport: &mut Viewport,
    metrics: &NodeMetrics,
    target: Focus,
    zoom_close: bool,
) -> Option<Focus> {
    let node = graph.node(target.node)?;
    let focus = Focus::new(node.id, clamp_index(node, target.message_index));

    let anchor = metrics.message_anchor(node.position, focus.message_index);
    let scale = zoom_close.then(|| viewport.config().zoom_close_scale);
    viewport.center_on(anchor, view.viewport_size, scale);

    view.expanded.insert(node.id);
    view.focus = Some(focus);
    Some(focus)
}

/// Move the current focus one step in `direction`. Leaves every piece of state
/// untouched when there is no destination.
pub fn navigate(
    graph: &ConversationGraph,
    view: &mut GraphViewState,
    viewport: &mut Viewport,
    metrics: &NodeMetrics,
    direction: Direction,
    zoom_close: bool,
) -> Option<Focus> {
    let from = view.focus?;
    let target = transition(graph, from, direction)?;
    focus_on_message(graph, view, viewport, metrics, target, zoom_close)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Message;
    use crate::viewport::{CanvasPoint, ScreenPoint, ScreenSize};
    use rstest::rstest;

    /// Main with `n` messages, at the origin.
    fn main_with(n: usize) -> ConversationGraph {
        let mut graph = ConversationGraph::new("Main");
        let main = graph.main_id();
        for i in 0..n {
            graph.append_message(main, Message::user(format!("m{i}"))).unwrap();
        }
        graph
    }

    fn grow(graph: &mut ConversationGraph, node: NodeId, extra: usize) {
        for i in 0..extra {
            graph.append_message(node, Message::assistant(format!("x{i}"))).unwrap();
        }
    }

    #[rstest]
    #[case(Direction::Up, 2, Some(1))]
    #[case(Direction::Down, 1, Some(2))]
    #[case(Direction::Up, 0, None)]
    #[case(Direction::Down, 3, None)]
    fn test_vertical_steps_within_node(
        #[case] direction: Direction,
        #[case] index: usize,
        #[case] expected: Option<usize>,
    ) {
        let graph = main_with(4);
        let main = graph.main_id();
        let next = transition(&graph, Focus::new(main, index), direction);
        assert_eq!(next, expected.map(|i| Focus::new(main, i)));
    }

    #[test]
    fn test_up_from_first_message_jumps_to_last_message_of_sibling_above() {
        let mut graph = main_with(2);
        let main = graph.main_id();
        let upper = graph.create_branch(main, 1, Some(CanvasPoint::new(600.0, 0.0))).unwrap();
        let lower = graph.create_branch(main, 1, Some(CanvasPoint::new(600.0, 800.0))).unwrap();
        let higher = graph
            .create_branch(main, 1, Some(CanvasPoint::new(600.0, -900.0)))
            .unwrap();
        grow(&mut graph, upper, 2);

        assert_eq!(
            transition(&graph, Focus::new(lower, 0), Direction::Up),
            Some(Focus::new(upper, 2))
        );
        assert_eq!(
            transition(&graph, Focus::new(upper, 2), Direction::Down),
            Some(Focus::new(lower, 0))
        );
        assert_eq!(
            transition(&graph, Focus::new(upper, 0), Direction::Up),
            Some(Focus::new(higher, 0))
        );
        assert_eq!(transition(&graph, Focus::new(higher, 0), Direction::Up), None);
    }

    #[test]
    fn test_connected_branches_split_and_sort_by_proximity() {
        let mut graph = main_with(2);
        let main = graph.main_id();
        let far_right = graph.create_branch(main, 0, Some(CanvasPoint::new(1_600.0, 0.0))).unwrap();
        let near_right = graph.create_branch(main, 0, Some(CanvasPoint::new(600.0, 900.0))).unwrap();
        let left = graph.create_branch(main, 0, Some(CanvasPoint::new(-700.0, 0.0))).unwrap();
        let other_row = graph.create_branch(main, 1, Some(CanvasPoint::new(600.0, -900.0))).unwrap();

        let branches = connected_branches(&graph, main, 0);

        assert_eq!(branches.parent, None);
        assert_eq!(branches.right, vec![near_right, far_right]);
        assert_eq!(branches.left, vec![left]);
        assert_eq!(connected_branches(&graph, main, 1).right, vec![other_row]);

        let child = connected_branches(&graph, near_right, 0);
        assert_eq!(
            child.parent,
            Some(ParentLink {
                node: main,
                side: Side::Left,
                message_index: 0
            })
        );
    }

    #[test]
    fn test_left_returns_to_parent_at_fork_message() {
        let mut graph = main_with(3);
        let main = graph.main_id();
        let branch = graph.create_branch(main, 2, None).unwrap();
        grow(&mut graph, branch, 3);

        assert_eq!(
            transition(&graph, Focus::new(branch, 3), Direction::Left),
            Some(Focus::new(main, 2))
        );
        // Parent is on the left, so right looks for children instead.
        assert_eq!(transition(&graph, Focus::new(branch, 3), Direction::Right), None);
    }

    #[test]
    fn test_right_enters_nearest_child_at_first_message() {
        let mut graph = main_with(2);
        let main = graph.main_id();
        let child = graph.create_branch(main, 1, None).unwrap();
        graph.create_branch(main, 1, None).unwrap();

        assert_eq!(
            transition(&graph, Focus::new(main, 1), Direction::Right),
            Some(Focus::new(child, 0))
        );
        assert_eq!(transition(&graph, Focus::new(main, 0), Direction::Right), None);
        assert_eq!(transition(&graph, Focus::new(main, 1), Direction::Left), None);
    }

    #[test]
    fn test_out_of_range_focus_is_clamped() {
        let graph = main_with(3);
        let main = graph.main_id();
        assert_eq!(
            transition(&graph, Focus::new(main, 10), Direction::Up),
            Some(Focus::new(main, 1))
        );
    }

    #[test]
    fn test_unknown_node_goes_nowhere() {
        let graph = main_with(1);
        assert_eq!(transition(&graph, Focus::new(NodeId(7), 0), Direction::Down), None);
    }

    #[test]
    fn test_navigate_expands_and_centers_destination() {
        let mut graph = main_with(2);
        let main = graph.main_id();
        let branch = graph.create_branch(main, 1, None).unwrap();
        let metrics = NodeMetrics::default();
        let mut view = GraphViewState::new(ScreenSize::new(800.0, 600.0));
        let mut viewport = Viewport::default();
        view.focus = Some(Focus::new(main, 1));

        let landed = navigate(&graph, &mut view, &mut viewport, &metrics, Direction::Right, true);

        assert_eq!(landed, Some(Focus::new(branch, 0)));
        assert_eq!(view.focus, landed);
        assert!(view.expanded.contains(&branch));
        assert_eq!(viewport.scale(), 2.0);
        let anchor = metrics.message_anchor(graph.node(branch).unwrap().position, 0);
        let on_screen = viewport.canvas_to_screen(anchor);
        assert!((on_screen - ScreenPoint::new(400.0, 300.0)).length() < 1e-9);
    }

    #[test]
    fn test_navigate_without_destination_changes_nothing() {
        let graph = main_with(4);
        let main = graph.main_id();
        let metrics = NodeMetrics::default();
        let mut view = GraphViewState::new(ScreenSize::new(800.0, 600.0));
        let mut viewport = Viewport::default();
        view.focus = Some(Focus::new(main, 3));
        let before_view = view.clone();
        let before_viewport = viewport;

        let landed = navigate(&graph, &mut view, &mut viewport, &metrics, Direction::Down, false);

        assert_eq!(landed, None);
        assert_eq!(view, before_view);
        assert_eq!(viewport, before_viewport);
    }
}
