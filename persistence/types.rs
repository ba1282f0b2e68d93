/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Serializable types for conversation tree snapshots.

use serde::{Deserialize, Serialize};

use crate::graph::{Message, NodeId};

/// Node type tag as written in snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Main,
    Branch,
    Preview,
    Template,
}

/// Persisted node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedNode {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default)]
    pub parent_id: Option<NodeId>,
    #[serde(default)]
    pub parent_message_index: Option<usize>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub context_messages: Vec<Message>,
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub branch_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// Full tree snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphSnapshot {
    pub nodes: Vec<PersistedNode>,
    #[serde(default)]
    pub timestamp_secs: u64,
}
