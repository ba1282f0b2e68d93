/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Spatial index over canvas-space node positions.
//!
//! Used for overlap avoidance (anchor proximity) and pointer hit-testing
//! (node rectangles) so neither has to scan every node.

use rstar::{AABB, RTree, RTreeObject};

use crate::graph::NodeId;
use crate::viewport::{CanvasBox, CanvasPoint};

struct IndexedEntry {
    envelope: AABB<[f64; 2]>,
    anchor: CanvasPoint,
    node: Option<NodeId>,
}

impl RTreeObject for IndexedEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

fn aabb(rect: &CanvasBox) -> AABB<[f64; 2]> {
    AABB::from_corners([rect.min.x, rect.min.y], [rect.max.x, rect.max.y])
}

pub(crate) struct NodeSpatialIndex {
    tree: RTree<IndexedEntry>,
}

impl NodeSpatialIndex {
    /// Index bare anchor points (node origins).
    pub fn from_anchors(points: impl IntoIterator<Item = CanvasPoint>) -> Self {
        let entries: Vec<_> = points
            .into_iter()
            .map(|anchor| IndexedEntry {
                envelope: AABB::from_point([anchor.x, anchor.y]),
                anchor,
                node: None,
            })
            .collect();
        Self {
            tree: RTree::bulk_load(entries),
        }
    }

    /// Index node rectangles for hit-testing.
    pub fn from_footprints(footprints: impl IntoIterator<Item = (NodeId, CanvasBox)>) -> Self {
        let entries: Vec<_> = footprints
            .into_iter()
            .map(|(node, rect)| IndexedEntry {
                envelope: aabb(&rect),
                anchor: rect.min,
                node: Some(node),
            })
            .collect();
        Self {
            tree: RTree::bulk_load(entries),
        }
    }

    /// True when no indexed anchor lies strictly closer than `radius` to `point`.
    pub fn is_clear(&self, point: CanvasPoint, radius: f64) -> bool {
        let query = AABB::from_corners(
            [point.x - radius, point.y - radius],
            [point.x + radius, point.y + radius],
        );
        !self
            .tree
            .locate_in_envelope_intersecting(&query)
            .any(|entry| entry.anchor.distance_to(point) < radius)
    }

    /// Topmost node whose rectangle contains `point`. Later (higher id) nodes
    /// draw above earlier ones.
    pub fn node_at(&self, point: CanvasPoint) -> Option<NodeId> {
        self.tree
            .locate_in_envelope_intersecting(&AABB::from_point([point.x, point.y]))
            .filter_map(|entry| entry.node)
            .max()
    }
}
