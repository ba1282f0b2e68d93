/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Snapshot export and import for the conversation tree.
//!
//! Snapshots are plain serde values written as JSON. Imports are validated as
//! a whole before anything is rebuilt, so a bad file never leaves a partially
//! loaded tree behind.

pub mod types;

use log::warn;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;

use crate::graph::NodeId;
use types::{GraphSnapshot, NodeType, PersistedNode};

/// Errors from snapshot validation and I/O
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotError {
    /// A non-main node whose parent is missing from the snapshot.
    DanglingParent {
        node: NodeId,
        parent: Option<NodeId>,
    },
    DuplicateId(NodeId),
    /// Number of main nodes found, when it is not exactly one.
    MainCount(usize),
    MainHasParent(NodeId),
    /// A node whose parent chain never reaches main.
    Cycle(NodeId),
    ForkIndexOutOfRange {
        node: NodeId,
        index: usize,
        len: usize,
    },
    Decode(String),
    Io(String),
}

impl fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotError::DanglingParent {
                node,
                parent: Some(parent),
            } => write!(f, "node {node} refers to missing parent {parent}"),
            SnapshotError::DanglingParent { node, parent: None } => {
                write!(f, "node {node} has no fork parent")
            },
            SnapshotError::DuplicateId(id) => write!(f, "duplicate node id {id}"),
            SnapshotError::MainCount(count) => {
                write!(f, "expected exactly one main node, found {count}")
            },
            SnapshotError::MainHasParent(id) => write!(f, "main node {id} has a parent"),
            SnapshotError::Cycle(id) => write!(f, "node {id} is not connected to main"),
            SnapshotError::ForkIndexOutOfRange { node, index, len } => write!(
                f,
                "node {node} forks at message {index} of a parent with {len} messages"
            ),
            SnapshotError::Decode(e) => write!(f, "Decode error: {e}"),
            SnapshotError::Io(e) => write!(f, "IO error: {e}"),
        }
    }
}

impl std::error::Error for SnapshotError {}

/// Check every structural rule of a snapshot without building anything.
pub fn validate(snapshot: &GraphSnapshot) -> Result<(), SnapshotError> {
    let mut by_id: HashMap<NodeId, &PersistedNode> = HashMap::with_capacity(snapshot.nodes.len());
    for node in &snapshot.nodes {
        if by_id.insert(node.id, node).is_some() {
            return Err(SnapshotError::DuplicateId(node.id));
        }
    }

    let mains: Vec<&PersistedNode> = snapshot
        .nodes
        .iter()
        .filter(|n| n.node_type == NodeType::Main)
        .collect();
    let [main] = mains.as_slice() else {
        return Err(SnapshotError::MainCount(mains.len()));
    };
    if main.parent_id.is_some() {
        return Err(SnapshotError::MainHasParent(main.id));
    }

    for node in snapshot.nodes.iter().filter(|n| n.node_type != NodeType::Main) {
        let parent = node
            .parent_id
            .and_then(|id| by_id.get(&id))
            .filter(|_| node.parent_message_index.is_some())
            .ok_or(SnapshotError::DanglingParent {
                node: node.id,
                parent: node.parent_id,
            })?;
        let index = node.parent_message_index.unwrap_or_default();
        if index >= parent.messages.len() {
            return Err(SnapshotError::ForkIndexOutOfRange {
                node: node.id,
                index,
                len: parent.messages.len(),
            });
        }
    }

    // Every parent chain must end at main within `len` steps.
    let mut reaches_main: HashSet<NodeId> = HashSet::from([main.id]);
    for node in &snapshot.nodes {
        let mut path = Vec::new();
        let mut cursor = node;
        while !reaches_main.contains(&cursor.id) {
            if path.len() > snapshot.nodes.len() {
                return Err(SnapshotError::Cycle(node.id));
            }
            path.push(cursor.id);
            match cursor.parent_id.and_then(|id| by_id.get(&id).copied()) {
                Some(parent) => cursor = parent,
                None => return Err(SnapshotError::Cycle(node.id)),
            }
        }
        reaches_main.extend(path);
    }

    Ok(())
}

pub fn to_json(snapshot: &GraphSnapshot) -> Result<String, SnapshotError> {
    serde_json::to_string_pretty(snapshot).map_err(|e| SnapshotError::Decode(e.to_string()))
}

/// Decode and validate a JSON snapshot.
pub fn from_json(source: &str) -> Result<GraphSnapshot, SnapshotError> {
    let snapshot: GraphSnapshot =
        serde_json::from_str(source).map_err(|e| SnapshotError::Decode(e.to_string()))?;
    validate(&snapshot)?;
    Ok(snapshot)
}

pub fn save(path: &Path, snapshot: &GraphSnapshot) -> Result<(), SnapshotError> {
    let json = to_json(snapshot)?;
    std::fs::write(path, json)
        .map_err(|e| SnapshotError::Io(format!("Failed to write {}: {e}", path.display())))
}

pub fn load(path: &Path) -> Result<GraphSnapshot, SnapshotError> {
    let source = std::fs::read_to_string(path)
        .map_err(|e| SnapshotError::Io(format!("Failed to read {}: {e}", path.display())))?;
    from_json(&source).inspect_err(|e| warn!("Rejected snapshot {}: {e}", path.display()))
}
