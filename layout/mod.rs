/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Layout algorithms: overlap avoidance, hierarchical stacking and
//! bounds-fit centering.
//!
//! Everything here is a pure function of node positions. Callers decide when
//! to write the results back into the graph.

pub mod metrics;
pub(crate) mod spatial_index;

use std::collections::{HashMap, VecDeque};
use std::fmt;

use crate::config::LayoutConfig;
use crate::graph::{ConversationGraph, GraphError, NodeId};
use crate::viewport::{CanvasBox, CanvasPoint, CanvasVector, ScreenSize, ScreenVector};

use metrics::NodeMetrics;
use spatial_index::NodeSpatialIndex;

/// Upper bound on diagonal shifts tried by [`adjust_for_overlap`].
pub const MAX_OVERLAP_ATTEMPTS: usize = 48;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LayoutError {
    /// The attempt cap was reached; `last_candidate` is the final shifted position.
    OverlapResolutionFailure {
        last_candidate: CanvasPoint,
        attempts: usize,
    },
}

impl fmt::Display for LayoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OverlapResolutionFailure {
                last_candidate,
                attempts,
            } => write!(
                f,
                "no free position after {attempts} attempts, last candidate ({}, {})",
                last_candidate.x, last_candidate.y
            ),
        }
    }
}

impl std::error::Error for LayoutError {}

/// Shift `candidate` diagonally by `(spacing/2, spacing/4)` until it is at least
/// `spacing/2` away from every point in `existing`.
pub fn adjust_for_overlap(
    candidate: CanvasPoint,
    existing: &[CanvasPoint],
    spacing: f64,
) -> Result<CanvasPoint, LayoutError> {
    let threshold = spacing / 2.0;
    let shift = CanvasVector::new(spacing / 2.0, spacing / 4.0);
    let index = NodeSpatialIndex::from_anchors(existing.iter().copied());

    let mut current = candidate;
    for _ in 0..MAX_OVERLAP_ATTEMPTS {
        if index.is_clear(current, threshold) {
            return Ok(current);
        }
        current += shift;
    }
    if index.is_clear(current, threshold) {
        return Ok(current);
    }
    Err(LayoutError::OverlapResolutionFailure {
        last_candidate: current,
        attempts: MAX_OVERLAP_ATTEMPTS,
    })
}

/// Placement for a new fork before overlap avoidance: one spacing to the right
/// of the parent, level with the forked message's row.
pub fn default_branch_position(
    parent_origin: CanvasPoint,
    message_index: usize,
    metrics: &NodeMetrics,
    spacing: f64,
) -> CanvasPoint {
    parent_origin + CanvasVector::new(spacing, metrics.message_offset(message_index))
}

/// Positions computed by [`stack_organize`], in breadth-first order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StackLayout {
    pub positions: Vec<(NodeId, CanvasPoint)>,
}

impl StackLayout {
    pub fn position_of(&self, id: NodeId) -> Option<CanvasPoint> {
        self.positions
            .iter()
            .find(|(node, _)| *node == id)
            .map(|(_, point)| *point)
    }

    /// Write every computed position into the graph.
    pub fn apply(&self, graph: &mut ConversationGraph) -> Result<(), GraphError> {
        for (id, point) in &self.positions {
            graph.update_position(*id, *point)?;
        }
        Ok(())
    }
}

/// Breadth-first stacking from the main node: column = hop count, row = order
/// of arrival within that column.
///
/// Children are visited by `(fork index, id)`, never by current position, so
/// running this on its own output yields the same layout.
pub fn stack_organize(graph: &ConversationGraph, config: &LayoutConfig) -> StackLayout {
    let main = graph.main_id();
    let mut rows_per_level: HashMap<usize, usize> = HashMap::new();
    let mut positions = Vec::with_capacity(graph.len());
    let mut queue = VecDeque::from([(main, 0usize)]);

    while let Some((id, level)) = queue.pop_front() {
        let row = rows_per_level.entry(level).or_insert(0);
        positions.push((
            id,
            CanvasPoint::new(
                level as f64 * config.stack_horizontal,
                *row as f64 * config.stack_vertical,
            ),
        ));
        *row += 1;
        for child in graph.children_of(id) {
            queue.push_back((child, level + 1));
        }
    }

    StackLayout { positions }
}

/// Inputs for [`fit_to_viewport`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitRequest {
    pub viewport: ScreenSize,
    pub padding: f64,
    /// Width covered by a side panel on the right edge.
    pub reserved_width: f64,
    pub min_scale: f64,
    pub max_scale: f64,
}

/// Transform that shows every node inside the available area.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewFit {
    pub scale: f64,
    pub translate: ScreenVector,
}

/// Fit the union of `footprints`, grown by `padding`, into the viewport minus
/// the reserved panel width. Never zooms in past 1.
///
/// Returns `None` for an empty node set or a viewport with no usable area.
pub fn fit_to_viewport(
    footprints: impl IntoIterator<Item = CanvasBox>,
    request: &FitRequest,
) -> Option<ViewFit> {
    let bounds = footprints
        .into_iter()
        .reduce(|acc, rect| acc.union(&rect))?
        .inflate(request.padding, request.padding);

    let available_width = request.viewport.width - request.reserved_width;
    let available_height = request.viewport.height;
    if !(available_width > 0.0 && available_height > 0.0) {
        return None;
    }

    let content_width = bounds.width().max(f64::EPSILON);
    let content_height = bounds.height().max(f64::EPSILON);
    let scale = (available_width / content_width)
        .min(available_height / content_height)
        .min(1.0)
        .clamp(request.min_scale, request.max_scale);

    let center = bounds.center();
    Some(ViewFit {
        scale,
        translate: ScreenVector::new(
            available_width / 2.0 - center.x * scale,
            available_height / 2.0 - center.y * scale,
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Message;
    use proptest::prelude::*;
    use rstest::rstest;

    fn graph_with_messages(count: usize) -> ConversationGraph {
        let mut graph = ConversationGraph::new("Main");
        let main = graph.main_id();
        for i in 0..count {
            graph
                .append_message(main, Message::user(format!("m{i}")))
                .expect("main exists");
        }
        graph
    }

    #[test]
    fn clear_candidate_is_returned_unchanged() {
        let candidate = CanvasPoint::new(1_000.0, 1_000.0);
        let existing = [CanvasPoint::new(0.0, 0.0)];
        assert_eq!(adjust_for_overlap(candidate, &existing, 400.0), Ok(candidate));
    }

    #[test]
    fn overlapping_candidate_shifts_diagonally() {
        let existing = [CanvasPoint::new(0.0, 0.0)];
        let adjusted = adjust_for_overlap(CanvasPoint::new(10.0, 10.0), &existing, 400.0)
            .expect("single obstacle resolves");
        assert_eq!(adjusted, CanvasPoint::new(210.0, 110.0));
    }

    #[test]
    fn exhausted_cap_reports_last_candidate() {
        // A dense column of obstacles along the shift diagonal.
        let existing: Vec<_> = (0..200)
            .map(|i| CanvasPoint::new(i as f64 * 50.0, i as f64 * 25.0))
            .collect();
        let result = adjust_for_overlap(CanvasPoint::origin(), &existing, 400.0);
        match result {
            Err(LayoutError::OverlapResolutionFailure {
                last_candidate,
                attempts,
            }) => {
                assert_eq!(attempts, MAX_OVERLAP_ATTEMPTS);
                assert_eq!(
                    last_candidate,
                    CanvasPoint::new(48.0 * 200.0, 48.0 * 100.0)
                );
            }
            other => panic!("expected overlap failure, got {other:?}"),
        }
    }

    #[test]
    fn default_position_is_right_of_parent_at_message_row() {
        let metrics = NodeMetrics::default();
        let point = default_branch_position(CanvasPoint::new(100.0, 50.0), 2, &metrics, 400.0);
        assert_eq!(point, CanvasPoint::new(500.0, 50.0 + 80.0 + 2.0 * 136.0));
    }

    #[test]
    fn stack_assigns_levels_and_rows() {
        let mut graph = graph_with_messages(3);
        let main = graph.main_id();
        let b = graph.create_branch(main, 2, None).expect("fork");
        let a = graph.create_branch(main, 0, None).expect("fork");
        let c = graph.create_branch(a, 0, None).expect("fork");

        let layout = stack_organize(&graph, &LayoutConfig::default());

        assert_eq!(layout.position_of(main), Some(CanvasPoint::new(0.0, 0.0)));
        // `a` forks at an earlier message than `b`, so it comes first.
        assert_eq!(layout.position_of(a), Some(CanvasPoint::new(500.0, 0.0)));
        assert_eq!(layout.position_of(b), Some(CanvasPoint::new(500.0, 120.0)));
        assert_eq!(layout.position_of(c), Some(CanvasPoint::new(1_000.0, 0.0)));
        assert_eq!(layout.positions.len(), graph.len());
    }

    #[test]
    fn stack_is_idempotent() {
        let mut graph = graph_with_messages(4);
        let main = graph.main_id();
        for index in [3, 0, 1, 1] {
            let child = graph.create_branch(main, index, None).expect("fork");
            graph.create_branch(child, 0, None).expect("fork");
        }
        let config = LayoutConfig::default();

        stack_organize(&graph, &config)
            .apply(&mut graph)
            .expect("all nodes exist");
        let first = stack_organize(&graph, &config);
        first.apply(&mut graph).expect("all nodes exist");
        let second = stack_organize(&graph, &config);

        assert_eq!(first, second);
    }

    #[test]
    fn fit_returns_none_for_empty_input() {
        let request = FitRequest {
            viewport: ScreenSize::new(1_200.0, 800.0),
            padding: 100.0,
            reserved_width: 384.0,
            min_scale: 0.1,
            max_scale: 8.0,
        };
        assert_eq!(fit_to_viewport(std::iter::empty(), &request), None);
    }

    #[rstest]
    #[case(ScreenSize::new(300.0, 800.0))]
    #[case(ScreenSize::new(1_200.0, 0.0))]
    fn fit_needs_usable_area(#[case] viewport: ScreenSize) {
        let request = FitRequest {
            viewport,
            padding: 0.0,
            reserved_width: 384.0,
            min_scale: 0.1,
            max_scale: 8.0,
        };
        let rect = CanvasBox::new(CanvasPoint::origin(), CanvasPoint::new(10.0, 10.0));
        assert_eq!(fit_to_viewport([rect], &request), None);
    }

    #[test]
    fn small_content_is_centered_at_unit_scale() {
        let request = FitRequest {
            viewport: ScreenSize::new(1_000.0, 800.0),
            padding: 0.0,
            reserved_width: 200.0,
            min_scale: 0.1,
            max_scale: 8.0,
        };
        let rect = CanvasBox::new(CanvasPoint::new(0.0, 0.0), CanvasPoint::new(200.0, 100.0));
        let fit = fit_to_viewport([rect], &request).expect("fits");
        assert_eq!(fit.scale, 1.0);
        assert_eq!(fit.translate, ScreenVector::new(300.0, 350.0));
    }

    #[test]
    fn large_content_scales_down_to_fit() {
        let request = FitRequest {
            viewport: ScreenSize::new(1_384.0, 1_000.0),
            padding: 100.0,
            reserved_width: 384.0,
            min_scale: 0.1,
            max_scale: 8.0,
        };
        let rects = [
            CanvasBox::new(CanvasPoint::new(0.0, 0.0), CanvasPoint::new(400.0, 200.0)),
            CanvasBox::new(CanvasPoint::new(3_400.0, 800.0), CanvasPoint::new(3_800.0, 1_000.0)),
        ];
        let fit = fit_to_viewport(rects, &request).expect("fits");
        // Padded box is 4000 x 1200; width is the binding axis.
        assert!((fit.scale - 0.25).abs() < 1e-9);
        assert!((fit.translate.x - (500.0 - 1_900.0 * 0.25)).abs() < 1e-9);
        assert!((fit.translate.y - (500.0 - 500.0 * 0.25)).abs() < 1e-9);
    }

    proptest! {
        #[test]
        fn overlap_resolution_terminates_clear_or_capped(
            raw in prop::collection::vec((-2_000.0f64..2_000.0, -2_000.0f64..2_000.0), 0..40),
            cx in -2_000.0f64..2_000.0,
            cy in -2_000.0f64..2_000.0,
            spacing in 10.0f64..800.0,
        ) {
            let existing: Vec<_> = raw.iter().map(|(x, y)| CanvasPoint::new(*x, *y)).collect();
            match adjust_for_overlap(CanvasPoint::new(cx, cy), &existing, spacing) {
                Ok(point) => {
                    for other in &existing {
                        prop_assert!(point.distance_to(*other) >= spacing / 2.0);
                    }
                }
                Err(LayoutError::OverlapResolutionFailure { attempts, .. }) => {
                    prop_assert_eq!(attempts, MAX_OVERLAP_ATTEMPTS);
                }
            }
        }

        #[test]
        fn sparse_obstacles_always_resolve(
            raw in prop::collection::vec((-2_000.0f64..2_000.0, -2_000.0f64..2_000.0), 0..20),
            cx in -2_000.0f64..2_000.0,
            cy in -2_000.0f64..2_000.0,
        ) {
            let existing: Vec<_> = raw.iter().map(|(x, y)| CanvasPoint::new(*x, *y)).collect();
            prop_assert!(adjust_for_overlap(CanvasPoint::new(cx, cy), &existing, 400.0).is_ok());
        }
    }
}
