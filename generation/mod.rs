/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Seam between the conversation tree and whatever produces assistant output.
//!
//! A [`GenerationBackend`] receives a request plus a [`StreamSink`] and may run
//! anywhere: the sink only pushes events over a channel. The owning session
//! drains that channel on its own tick via [`StreamRegistry::drain`], so the
//! tree is only ever mutated from one place.
//!
//! Every stream carries a [`StreamId`]. Events whose id no longer matches the
//! node's current stream (cancelled, replaced, or node deleted) are dropped.

use std::collections::HashMap;
use std::fmt;

use crossbeam_channel::{Receiver, Sender, unbounded};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::graph::{ConversationGraph, Message, NodeId, Role};

/// Sampling parameters forwarded to the backend untouched.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingOptions {
    pub temperature: f64,
    pub num_ctx: u32,
    pub num_predict: u32,
    pub top_p: f64,
    pub top_k: u32,
    pub typical_p: f64,
    pub mirostat: u8,
    pub mirostat_tau: f64,
    pub mirostat_eta: f64,
}

impl Default for SamplingOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            num_ctx: 8192,
            num_predict: 2048,
            top_p: 0.9,
            top_k: 20,
            typical_p: 0.7,
            mirostat: 1,
            mirostat_tau: 0.8,
            mirostat_eta: 0.6,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub node: NodeId,
    /// Full context chain, ending with the user turn being answered.
    pub context: Vec<Message>,
    pub model: String,
    pub system_prompt: Option<String>,
    pub sampling: SamplingOptions,
}

impl GenerationRequest {
    /// Render the context as a `Human:`/`Assistant:` transcript for
    /// completion-style backends, ending with an open assistant turn.
    pub fn transcript(&self) -> String {
        let mut out = self
            .context
            .iter()
            .map(|message| {
                let speaker = match message.role {
                    Role::User => "Human",
                    Role::Assistant => "Assistant",
                };
                format!("{speaker}: {}", message.content)
            })
            .collect::<Vec<_>>()
            .join("\n");
        out.push_str("\n\nAssistant:");
        out
    }
}

/// Produces assistant output for a request.
///
/// Implementations must not block the caller; long work belongs on a thread or
/// task that feeds `sink`.
pub trait GenerationBackend {
    fn start(&self, request: GenerationRequest, sink: StreamSink);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEventKind {
    Chunk(String),
    /// Complete reply text, or empty when the chunks already carry it.
    Done(String),
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEvent {
    pub stream: StreamId,
    pub node: NodeId,
    pub kind: StreamEventKind,
}

/// Handle a backend uses to report output for one stream.
///
/// Cheap to clone and `Send`. Once the stream is cancelled every call becomes a
/// no-op.
#[derive(Debug, Clone)]
pub struct StreamSink {
    stream: StreamId,
    node: NodeId,
    tx: Sender<StreamEvent>,
    cancel: CancellationToken,
}

impl StreamSink {
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token a backend can await or poll to stop work early.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn on_chunk(&self, text: impl Into<String>) {
        self.send(StreamEventKind::Chunk(text.into()));
    }

    /// Finish the stream. `full_text` is the complete reply; pass an empty
    /// string to commit whatever was streamed through `on_chunk`.
    pub fn on_done(&self, full_text: impl Into<String>) {
        self.send(StreamEventKind::Done(full_text.into()));
    }

    pub fn on_error(&self, reason: impl Into<String>) {
        self.send(StreamEventKind::Error(reason.into()));
    }

    fn send(&self, kind: StreamEventKind) {
        if self.cancel.is_cancelled() {
            return;
        }
        // The registry may be gone already; nothing left to report to.
        let _ = self.tx.send(StreamEvent {
            stream: self.stream,
            node: self.node,
            kind,
        });
    }
}

/// A stream that ended in an error. The partial output was discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFailure {
    pub node: NodeId,
    pub reason: String,
}

impl fmt::Display for StreamFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "generation for node {} failed: {}", self.node, self.reason)
    }
}

impl std::error::Error for StreamFailure {}

struct ActiveStream {
    id: StreamId,
    cancel: CancellationToken,
    buffer: String,
}

/// Tracks the single in-flight stream per node and applies its events.
pub struct StreamRegistry {
    tx: Sender<StreamEvent>,
    rx: Receiver<StreamEvent>,
    active: HashMap<NodeId, ActiveStream>,
    next_id: u64,
}

impl StreamRegistry {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            tx,
            rx,
            active: HashMap::new(),
            next_id: 0,
        }
    }

    /// Register a new stream for `node`, cancelling any stream it replaces.
    pub fn open(&mut self, node: NodeId) -> StreamSink {
        self.cancel(node);
        self.next_id += 1;
        let id = StreamId(self.next_id);
        let cancel = CancellationToken::new();
        self.active.insert(
            node,
            ActiveStream {
                id,
                cancel: cancel.clone(),
                buffer: String::new(),
            },
        );
        StreamSink {
            stream: id,
            node,
            tx: self.tx.clone(),
            cancel,
        }
    }

    /// Cancel the stream for `node`, if any. Returns whether one was active.
    pub fn cancel(&mut self, node: NodeId) -> bool {
        match self.active.remove(&node) {
            Some(stream) => {
                stream.cancel.cancel();
                debug!("cancelled stream for node {node}");
                true
            },
            None => false,
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, stream) in self.active.drain() {
            stream.cancel.cancel();
        }
    }

    pub fn is_streaming(&self, node: NodeId) -> bool {
        self.active.contains_key(&node)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Apply every queued event to `graph` (non-blocking).
    ///
    /// Chunks update the node's transient streaming content. `Done` commits its
    /// full text (or the accumulated chunks when that is empty) as one
    /// assistant message. `Error` discards the output and is reported back to
    /// the caller.
    pub fn drain(&mut self, graph: &mut ConversationGraph) -> Vec<StreamFailure> {
        let mut failures = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            let current = self
                .active
                .get(&event.node)
                .is_some_and(|stream| stream.id == event.stream);
            if !current || !graph.contains(event.node) {
                debug!("dropping stale stream event for node {}", event.node);
                if !graph.contains(event.node) {
                    self.cancel(event.node);
                }
                continue;
            }

            match event.kind {
                StreamEventKind::Chunk(text) => {
                    let Some(stream) = self.active.get_mut(&event.node) else {
                        continue;
                    };
                    stream.buffer.push_str(&text);
                    let _ = graph.set_streaming_content(event.node, stream.buffer.clone());
                },
                StreamEventKind::Done(full_text) => {
                    let Some(stream) = self.active.remove(&event.node) else {
                        continue;
                    };
                    let _ = graph.clear_streaming_content(event.node);
                    let reply = if full_text.is_empty() {
                        stream.buffer
                    } else {
                        full_text
                    };
                    if reply.is_empty() {
                        debug!("stream for node {} finished without output", event.node);
                        continue;
                    }
                    let _ = graph.append_message(event.node, Message::assistant(reply));
                },
                StreamEventKind::Error(reason) => {
                    self.active.remove(&event.node);
                    let _ = graph.clear_streaming_content(event.node);
                    let failure = StreamFailure {
                        node: event.node,
                        reason,
                    };
                    warn!("{failure}");
                    failures.push(failure);
                },
            }
        }
        failures
    }
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}
