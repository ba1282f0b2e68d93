/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Branching conversation tree.
//!
//! Core structures:
//! - `ConversationGraph`: tree container backed by petgraph::StableGraph
//! - `Node`: one conversation thread with its messages and canvas position
//! - `ForkEdge`: parent -> child link carrying the forked message index

use log::{debug, warn};
use petgraph::stable_graph::{NodeIndex, StableGraph};
use petgraph::visit::{Bfs, EdgeRef};
use petgraph::{Directed, Direction};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::layout::metrics::NodeMetrics;
use crate::layout::{self, LayoutError};
use crate::persistence::types::{GraphSnapshot, NodeType, PersistedNode};
use crate::persistence::{self, SnapshotError};
use crate::viewport::CanvasPoint;

/// Stable node identity, unique within one graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable node handle (petgraph NodeIndex, survives other deletions)
pub type NodeKey = NodeIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One conversation turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Unix milliseconds.
    #[serde(rename = "timestamp", default)]
    pub timestamp_ms: u64,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp_ms: now_unix_ms(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Where a non-main node was forked from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fork {
    pub parent: NodeId,
    /// Index into the parent's own `messages`.
    pub message_index: usize,
    /// Ancestor messages before the fork point followed by this node's own messages.
    pub context_messages: Vec<Message>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Main,
    Branch(Fork),
    /// Code preview forked from a message containing a code block.
    Preview {
        fork: Fork,
        language: Option<String>,
    },
    Template(Fork),
}

impl NodeKind {
    pub fn fork(&self) -> Option<&Fork> {
        match self {
            Self::Main => None,
            Self::Branch(fork) | Self::Template(fork) | Self::Preview { fork, .. } => Some(fork),
        }
    }

    fn fork_mut(&mut self) -> Option<&mut Fork> {
        match self {
            Self::Main => None,
            Self::Branch(fork) | Self::Template(fork) | Self::Preview { fork, .. } => Some(fork),
        }
    }

    pub fn node_type(&self) -> NodeType {
        match self {
            Self::Main => NodeType::Main,
            Self::Branch(_) => NodeType::Branch,
            Self::Preview { .. } => NodeType::Preview,
            Self::Template(_) => NodeType::Template,
        }
    }
}

/// A conversation thread on the canvas
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    pub title: String,
    /// Dotted path label (`0`, `0.2`, `0.2.1`), display only.
    pub branch_label: String,
    pub messages: Vec<Message>,
    /// Top-left corner in canvas space
    pub position: CanvasPoint,
    pub system_prompt: Option<String>,
    /// Assistant output still arriving; never part of `messages`.
    pub streaming_content: Option<String>,
}

impl Node {
    pub fn is_main(&self) -> bool {
        matches!(self.kind, NodeKind::Main)
    }

    /// Main anchors the tree and stays put.
    pub fn is_draggable(&self) -> bool {
        !self.is_main()
    }

    pub fn fork(&self) -> Option<&Fork> {
        self.kind.fork()
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.fork().map(|fork| fork.parent)
    }

    pub fn last_message_index(&self) -> Option<usize> {
        self.messages.len().checked_sub(1)
    }

    /// Messages a generation request for this node should see.
    pub fn conversation(&self) -> &[Message] {
        match self.fork() {
            Some(fork) => &fork.context_messages,
            None => &self.messages,
        }
    }
}

/// Parent -> child link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForkEdge {
    pub message_index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForkKind {
    Branch,
    Preview { language: Option<String> },
    Template,
}

/// Options for [`ConversationGraph::create_fork`].
#[derive(Debug, Clone, PartialEq)]
pub struct ForkRequest {
    pub kind: ForkKind,
    pub title: Option<String>,
    pub system_prompt: Option<String>,
    pub position_hint: Option<CanvasPoint>,
}

impl ForkRequest {
    pub fn branch(position_hint: Option<CanvasPoint>) -> Self {
        Self {
            kind: ForkKind::Branch,
            title: None,
            system_prompt: None,
            position_hint,
        }
    }
}

/// Geometry used when placing new forks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub metrics: NodeMetrics,
    pub spacing: f64,
}

impl Default for Placement {
    fn default() -> Self {
        Self {
            metrics: NodeMetrics::default(),
            spacing: 400.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    UnknownNode(NodeId),
    ForkIndexOutOfRange {
        node: NodeId,
        index: usize,
        len: usize,
    },
    MainNodeProtected,
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownNode(id) => write!(f, "unknown node {id}"),
            Self::ForkIndexOutOfRange { node, index, len } => write!(
                f,
                "cannot fork node {node} at message {index}: it has {len} messages"
            ),
            Self::MainNodeProtected => write!(f, "the main node cannot be deleted or moved"),
        }
    }
}

impl std::error::Error for GraphError {}

pub const MAIN_LABEL: &str = "0";

/// The conversation tree
#[derive(Debug, Clone)]
pub struct ConversationGraph {
    inner: StableGraph<Node, ForkEdge, Directed>,
    id_to_node: HashMap<NodeId, NodeKey>,
    main: NodeId,
    placement: Placement,
}

impl ConversationGraph {
    /// Create a tree holding only the main node, at the canvas origin.
    pub fn new(title: impl Into<String>) -> Self {
        let main = NodeId(1);
        let mut graph = Self {
            inner: StableGraph::new(),
            id_to_node: HashMap::new(),
            main,
            placement: Placement::default(),
        };
        graph.insert_node(Node {
            id: main,
            kind: NodeKind::Main,
            title: title.into(),
            branch_label: MAIN_LABEL.to_string(),
            messages: Vec::new(),
            position: CanvasPoint::origin(),
            system_prompt: None,
            streaming_content: None,
        });
        graph
    }

    pub fn with_placement(mut self, placement: Placement) -> Self {
        self.placement = placement;
        self
    }

    pub fn set_placement(&mut self, placement: Placement) {
        self.placement = placement;
    }

    pub fn placement(&self) -> &Placement {
        &self.placement
    }

    pub fn main_id(&self) -> NodeId {
        self.main
    }

    pub fn len(&self) -> usize {
        self.inner.node_count()
    }

    /// Never true: the main node always exists.
    pub fn is_empty(&self) -> bool {
        self.inner.node_count() == 0
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.id_to_node.contains_key(&id)
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        let key = *self.id_to_node.get(&id)?;
        self.inner.node_weight(key)
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, GraphError> {
        let key = self.key_of(id)?;
        self.inner
            .node_weight_mut(key)
            .ok_or(GraphError::UnknownNode(id))
    }

    fn key_of(&self, id: NodeId) -> Result<NodeKey, GraphError> {
        self.id_to_node
            .get(&id)
            .copied()
            .ok_or(GraphError::UnknownNode(id))
    }

    /// Iterate over all nodes, in no particular order
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.inner.node_weights()
    }

    fn next_id(&self) -> NodeId {
        NodeId(self.id_to_node.keys().map(|id| id.0).max().unwrap_or(0) + 1)
    }

    fn insert_node(&mut self, node: Node) -> NodeKey {
        let id = node.id;
        let key = self.inner.add_node(node);
        self.id_to_node.insert(id, key);
        key
    }

    /// Fork a plain branch from message `message_index` of `parent`.
    pub fn create_branch(
        &mut self,
        parent: NodeId,
        message_index: usize,
        position_hint: Option<CanvasPoint>,
    ) -> Result<NodeId, GraphError> {
        self.create_fork(parent, message_index, ForkRequest::branch(position_hint))
    }

    /// Fork a new node from message `message_index` of `parent`.
    ///
    /// The new node's own messages start with a copy of the forked message, and
    /// its context is the parent's context chain through the fork point. A
    /// position hint is kept when it is clear of other nodes; otherwise the
    /// hint (or the default placement) is shifted by overlap avoidance.
    pub fn create_fork(
        &mut self,
        parent: NodeId,
        message_index: usize,
        request: ForkRequest,
    ) -> Result<NodeId, GraphError> {
        let parent_key = self.key_of(parent)?;
        let parent_node = &self.inner[parent_key];
        let len = parent_node.messages.len();
        let Some(forked) = parent_node.messages.get(message_index).cloned() else {
            return Err(GraphError::ForkIndexOutOfRange {
                node: parent,
                index: message_index,
                len,
            });
        };

        let mut context_messages = self.context_prefix(parent, message_index)?;
        context_messages.push(forked.clone());

        let id = self.next_id();
        let parent_node = &self.inner[parent_key];
        let branch_label = self.next_child_label(parent_key, &parent_node.branch_label);
        let candidate = request.position_hint.unwrap_or_else(|| {
            layout::default_branch_position(
                parent_node.position,
                message_index,
                &self.placement.metrics,
                self.placement.spacing,
            )
        });
        let existing: Vec<CanvasPoint> = self.nodes().map(|n| n.position).collect();
        let position = match layout::adjust_for_overlap(candidate, &existing, self.placement.spacing)
        {
            Ok(point) => point,
            Err(err @ LayoutError::OverlapResolutionFailure { last_candidate, .. }) => {
                warn!("placing node {id}: {err}; using last candidate");
                last_candidate
            },
        };

        let fork = Fork {
            parent,
            message_index,
            context_messages,
        };
        let (kind, default_title) = match request.kind {
            ForkKind::Branch => (NodeKind::Branch(fork), format!("Branch {id}")),
            ForkKind::Template => (NodeKind::Template(fork), format!("Branch {id}")),
            ForkKind::Preview { language } => {
                let title = match &language {
                    Some(lang) => format!("{} Preview", lang.to_uppercase()),
                    None => "Preview".to_string(),
                };
                (NodeKind::Preview { fork, language }, title)
            },
        };

        let key = self.insert_node(Node {
            id,
            kind,
            title: request.title.unwrap_or(default_title),
            branch_label,
            messages: vec![forked],
            position,
            system_prompt: request.system_prompt,
            streaming_content: None,
        });
        self.inner.add_edge(parent_key, key, ForkEdge { message_index });
        debug!("forked node {id} from {parent}@{message_index}");
        Ok(id)
    }

    fn next_child_label(&self, parent_key: NodeKey, parent_label: &str) -> String {
        let next = self
            .inner
            .neighbors_directed(parent_key, Direction::Outgoing)
            .filter_map(|child| {
                self.inner[child]
                    .branch_label
                    .rsplit('.')
                    .next()
                    .and_then(|segment| segment.parse::<u32>().ok())
            })
            .max()
            .unwrap_or(0)
            + 1;
        format!("{parent_label}.{next}")
    }

    /// Remove `id` and every transitive descendant. Returns the removed ids,
    /// root first.
    pub fn delete_subtree(&mut self, id: NodeId) -> Result<Vec<NodeId>, GraphError> {
        if id == self.main {
            return Err(GraphError::MainNodeProtected);
        }
        let root = self.key_of(id)?;

        let mut doomed = Vec::new();
        let mut bfs = Bfs::new(&self.inner, root);
        while let Some(key) = bfs.next(&self.inner) {
            doomed.push(key);
        }

        let mut removed = Vec::with_capacity(doomed.len());
        for key in doomed {
            if let Some(node) = self.inner.remove_node(key) {
                self.id_to_node.remove(&node.id);
                removed.push(node.id);
            }
        }
        debug!("deleted subtree {id} ({} nodes)", removed.len());
        Ok(removed)
    }

    /// Append a turn to a node. Forked nodes also extend their context chain.
    pub fn append_message(&mut self, id: NodeId, message: Message) -> Result<(), GraphError> {
        let node = self.node_mut(id)?;
        if let Some(fork) = node.kind.fork_mut() {
            fork.context_messages.push(message.clone());
        }
        node.messages.push(message);
        Ok(())
    }

    pub fn update_position(&mut self, id: NodeId, position: CanvasPoint) -> Result<(), GraphError> {
        self.node_mut(id)?.position = position;
        Ok(())
    }

    pub fn rename_node(&mut self, id: NodeId, title: impl Into<String>) -> Result<(), GraphError> {
        self.node_mut(id)?.title = title.into();
        Ok(())
    }

    pub fn set_streaming_content(
        &mut self,
        id: NodeId,
        content: impl Into<String>,
    ) -> Result<(), GraphError> {
        self.node_mut(id)?.streaming_content = Some(content.into());
        Ok(())
    }

    pub fn clear_streaming_content(&mut self, id: NodeId) -> Result<Option<String>, GraphError> {
        Ok(self.node_mut(id)?.streaming_content.take())
    }

    /// Children of `id` ordered by fork index, then id.
    pub fn children_of(&self, id: NodeId) -> Vec<NodeId> {
        let Ok(key) = self.key_of(id) else {
            return Vec::new();
        };
        let mut children: Vec<(usize, NodeId)> = self
            .inner
            .edges_directed(key, Direction::Outgoing)
            .map(|edge| (edge.weight().message_index, self.inner[edge.target()].id))
            .collect();
        children.sort_unstable();
        children.into_iter().map(|(_, child)| child).collect()
    }

    /// Children of `id` forked at exactly `message_index`, ordered by id.
    pub fn children_at(&self, id: NodeId, message_index: usize) -> Vec<NodeId> {
        let Ok(key) = self.key_of(id) else {
            return Vec::new();
        };
        let mut children: Vec<NodeId> = self
            .inner
            .edges_directed(key, Direction::Outgoing)
            .filter(|edge| edge.weight().message_index == message_index)
            .map(|edge| self.inner[edge.target()].id)
            .collect();
        children.sort_unstable();
        children
    }

    /// Other nodes forked from the same parent at the same message, ordered by
    /// `y` (ties by id).
    pub fn siblings_of(&self, id: NodeId) -> Vec<NodeId> {
        let Some(fork) = self.node(id).and_then(Node::fork) else {
            return Vec::new();
        };
        let mut siblings: Vec<&Node> = self
            .children_at(fork.parent, fork.message_index)
            .into_iter()
            .filter(|sibling| *sibling != id)
            .filter_map(|sibling| self.node(sibling))
            .collect();
        siblings.sort_by(|a, b| {
            a.position
                .y
                .total_cmp(&b.position.y)
                .then_with(|| a.id.cmp(&b.id))
        });
        siblings.into_iter().map(|node| node.id).collect()
    }

    /// Parent first, main last.
    pub fn ancestors_of(&self, id: NodeId) -> Vec<NodeId> {
        let mut ancestors = Vec::new();
        let mut current = self.node(id).and_then(Node::parent);
        while let Some(parent) = current {
            // A tree never revisits a node; bail out instead of spinning.
            if ancestors.contains(&parent) {
                break;
            }
            ancestors.push(parent);
            current = self.node(parent).and_then(Node::parent);
        }
        ancestors
    }

    /// Every transitive descendant, breadth-first, excluding `id`.
    pub fn descendants_of(&self, id: NodeId) -> Vec<NodeId> {
        let Ok(root) = self.key_of(id) else {
            return Vec::new();
        };
        let mut bfs = Bfs::new(&self.inner, root);
        let mut out = Vec::new();
        while let Some(key) = bfs.next(&self.inner) {
            if key != root {
                out.push(self.inner[key].id);
            }
        }
        out
    }

    /// Rebuild the full conversation leading through `id`'s own messages by
    /// walking up the fork chain.
    pub fn context_chain(&self, id: NodeId) -> Result<Vec<Message>, GraphError> {
        let node = self.node(id).ok_or(GraphError::UnknownNode(id))?;
        let mut segments: Vec<&[Message]> = vec![&node.messages];
        let mut cursor = node.fork().map(|f| (f.parent, f.message_index));
        while let Some((parent, index)) = cursor {
            let parent_node = self.node(parent).ok_or(GraphError::UnknownNode(parent))?;
            // The forked message itself opens the child's own messages.
            let end = index.min(parent_node.messages.len());
            segments.push(&parent_node.messages[..end]);
            cursor = parent_node.fork().map(|f| (f.parent, f.message_index));
            if segments.len() > self.len() {
                break;
            }
        }
        Ok(segments.into_iter().rev().flatten().cloned().collect())
    }

    /// Chain of `id` strictly before its own message `message_index`.
    fn context_prefix(&self, id: NodeId, message_index: usize) -> Result<Vec<Message>, GraphError> {
        let mut chain = self.context_chain(id)?;
        let own = self.node(id).map_or(0, |n| n.messages.len());
        let keep = chain.len() - own + message_index;
        chain.truncate(keep);
        Ok(chain)
    }

    /// Serialize the tree to a persistable snapshot, ordered by id.
    pub fn to_snapshot(&self) -> GraphSnapshot {
        let mut nodes: Vec<PersistedNode> = self
            .nodes()
            .map(|node| {
                let fork = node.fork();
                PersistedNode {
                    id: node.id,
                    node_type: node.kind.node_type(),
                    parent_id: fork.map(|f| f.parent),
                    parent_message_index: fork.map(|f| f.message_index),
                    messages: node.messages.clone(),
                    context_messages: fork.map(|f| f.context_messages.clone()).unwrap_or_default(),
                    x: node.position.x,
                    y: node.position.y,
                    branch_id: node.branch_label.clone(),
                    title: node.title.clone(),
                    system_prompt: node.system_prompt.clone(),
                    language: match &node.kind {
                        NodeKind::Preview { language, .. } => language.clone(),
                        _ => None,
                    },
                }
            })
            .collect();
        nodes.sort_by_key(|node| node.id);

        GraphSnapshot {
            nodes,
            timestamp_secs: now_unix_ms() / 1_000,
        }
    }

    /// Rebuild a tree from a snapshot. The snapshot is validated as a whole
    /// first; nothing is built from a snapshot that fails validation.
    pub fn try_from_snapshot(snapshot: &GraphSnapshot) -> Result<Self, SnapshotError> {
        persistence::validate(snapshot)?;

        let mut main = None;
        let mut inner = StableGraph::new();
        let mut id_to_node = HashMap::new();
        for pnode in &snapshot.nodes {
            let kind = match pnode.node_type {
                NodeType::Main => {
                    main = Some(pnode.id);
                    NodeKind::Main
                },
                node_type => {
                    let (Some(parent), Some(message_index)) =
                        (pnode.parent_id, pnode.parent_message_index)
                    else {
                        return Err(SnapshotError::DanglingParent {
                            node: pnode.id,
                            parent: pnode.parent_id,
                        });
                    };
                    let fork = Fork {
                        parent,
                        message_index,
                        context_messages: pnode.context_messages.clone(),
                    };
                    match node_type {
                        NodeType::Preview => NodeKind::Preview {
                            fork,
                            language: pnode.language.clone(),
                        },
                        NodeType::Template => NodeKind::Template(fork),
                        _ => NodeKind::Branch(fork),
                    }
                },
            };
            let key = inner.add_node(Node {
                id: pnode.id,
                kind,
                title: pnode.title.clone(),
                branch_label: pnode.branch_id.clone(),
                messages: pnode.messages.clone(),
                position: CanvasPoint::new(pnode.x, pnode.y),
                system_prompt: pnode.system_prompt.clone(),
                streaming_content: None,
            });
            id_to_node.insert(pnode.id, key);
        }

        for pnode in &snapshot.nodes {
            if let (Some(parent), Some(message_index)) = (pnode.parent_id, pnode.parent_message_index)
                && let (Some(&from), Some(&to)) = (id_to_node.get(&parent), id_to_node.get(&pnode.id))
            {
                inner.add_edge(from, to, ForkEdge { message_index });
            }
        }

        let main = main.ok_or(SnapshotError::MainCount(0))?;
        Ok(Self {
            inner,
            id_to_node,
            main,
            placement: Placement::default(),
        })
    }
}
