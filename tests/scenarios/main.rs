/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use keyboard_types::{Key, KeyState, KeyboardEvent, Modifiers};
use proptest::prelude::*;
use tangent_canvas::VERSION;
use tangent_canvas::config::CanvasConfig;
use tangent_canvas::generation::{GenerationBackend, GenerationRequest, StreamSink};
use tangent_canvas::graph::{ConversationGraph, GraphError, Message, NodeId, Role};
use tangent_canvas::input;
use tangent_canvas::navigation::{Direction, Focus};
use tangent_canvas::session::{BranchSession, SessionIntent};
use tangent_canvas::viewport::{CanvasPoint, ScreenPoint, ScreenSize, ScreenVector, Viewport};

fn session() -> BranchSession {
    BranchSession::new("Main", ScreenSize::new(1_280.0, 800.0), CanvasConfig::default())
}

/// Replies with a fixed script from a worker thread.
struct ScriptedBackend {
    chunks: Vec<&'static str>,
    fail_with: Option<&'static str>,
    workers: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl ScriptedBackend {
    fn new(chunks: Vec<&'static str>) -> Self {
        Self {
            chunks,
            fail_with: None,
            workers: Arc::default(),
        }
    }

    fn join_all(workers: &Arc<Mutex<Vec<JoinHandle<()>>>>) {
        let handles: Vec<_> = workers.lock().unwrap().drain(..).collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }
}

impl GenerationBackend for ScriptedBackend {
    fn start(&self, _request: GenerationRequest, sink: StreamSink) {
        let chunks = self.chunks.clone();
        let fail_with = self.fail_with;
        let handle = std::thread::spawn(move || {
            for chunk in chunks {
                sink.on_chunk(chunk);
            }
            match fail_with {
                Some(reason) => sink.on_error(reason),
                None => sink.on_done(""),
            }
        });
        self.workers.lock().unwrap().push(handle);
    }
}

#[test]
fn scenarios_binary_smoke_runs() {
    assert!(!VERSION.is_empty());
}

/// Branch A off main with three messages, then fork B from A's second message.
fn tree_with_a_and_b() -> (ConversationGraph, NodeId, NodeId) {
    let mut graph = ConversationGraph::new("Main");
    let main = graph.main_id();
    graph.append_message(main, Message::user("root")).unwrap();
    let a = graph.create_branch(main, 0, None).unwrap();
    graph.append_message(a, Message::assistant("one")).unwrap();
    graph.append_message(a, Message::user("two")).unwrap();
    assert_eq!(graph.node(a).unwrap().messages.len(), 3);
    let b = graph.create_branch(a, 1, None).unwrap();
    (graph, a, b)
}

#[test]
fn deleting_fork_parent_removes_its_branch() {
    let (mut graph, a, b) = tree_with_a_and_b();

    let removed = graph.delete_subtree(a).unwrap();

    assert_eq!(removed, vec![a, b]);
    assert!(!graph.contains(a));
    assert!(!graph.contains(b));
    assert_eq!(graph.len(), 1);
}

#[test]
fn deleting_leaf_branch_keeps_parent_messages() {
    let (mut graph, a, b) = tree_with_a_and_b();

    assert_eq!(graph.delete_subtree(b).unwrap(), vec![b]);

    let a_node = graph.node(a).unwrap();
    assert_eq!(a_node.messages.len(), 3);
    assert!(graph.children_of(a).is_empty());
}

#[test]
fn main_node_itself_cannot_be_deleted() {
    let (mut graph, a, b) = tree_with_a_and_b();
    let main = graph.main_id();

    assert_eq!(graph.delete_subtree(main), Err(GraphError::MainNodeProtected));
    assert_eq!(graph.len(), 3);
    assert!(graph.contains(a) && graph.contains(b));
}

#[test]
fn zoom_at_cursor_keeps_canvas_point_under_cursor() {
    let mut viewport = Viewport::default();
    let anchor = ScreenPoint::new(100.0, 100.0);
    let under_cursor = viewport.screen_to_canvas(anchor);

    let applied = viewport.zoom_at(anchor, 2.0);

    assert_eq!(applied, 2.0);
    assert_eq!(viewport.canvas_to_screen(under_cursor), anchor);
    assert_eq!(viewport.translate(), ScreenVector::new(-100.0, -100.0));
}

#[test]
fn down_at_last_message_without_sibling_is_a_no_op() {
    let mut session = session();
    let main = session.graph().main_id();
    for text in ["a", "b", "c", "d"] {
        session.send_message(main, text).unwrap();
    }
    session.focus_message(Focus::new(main, 3), false).unwrap();
    let viewport_before = *session.viewport();

    assert_eq!(session.navigate(Direction::Down, false), None);

    assert_eq!(session.view().focus, Some(Focus::new(main, 3)));
    assert_eq!(session.viewport().translate(), viewport_before.translate());
}

#[test]
fn streamed_reply_lands_on_the_branch_it_was_asked_from() {
    let backend = ScriptedBackend::new(vec!["Ferris ", "is a ", "crab."]);
    let workers = backend.workers.clone();
    let mut session = session().with_backend(Box::new(backend));
    let main = session.graph().main_id();

    session.send_message(main, "Who is Ferris?").unwrap();
    ScriptedBackend::join_all(&workers);
    let report = session.tick();

    assert!(report.failures.is_empty());
    assert!(!session.is_streaming(main));
    let messages = &session.graph().node(main).unwrap().messages;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[1].content, "Ferris is a crab.");
    assert_eq!(session.graph().node(main).unwrap().streaming_content, None);
}

#[test]
fn failed_stream_commits_nothing() {
    let mut backend = ScriptedBackend::new(vec!["partial"]);
    backend.fail_with = Some("connection reset");
    let workers = backend.workers.clone();
    let mut session = session().with_backend(Box::new(backend));
    let main = session.graph().main_id();

    session.send_message(main, "hello?").unwrap();
    ScriptedBackend::join_all(&workers);
    let failures = session.pump_streams();

    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].node, main);
    assert_eq!(failures[0].reason, "connection reset");
    let node = session.graph().node(main).unwrap();
    assert_eq!(node.messages.len(), 1);
    assert_eq!(node.streaming_content, None);
}

#[test]
fn saved_tree_loads_into_a_fresh_session() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tree.json");

    let mut source = session();
    let main = source.graph().main_id();
    source.send_message(main, "Plan a trip").unwrap();
    let branch = source
        .create_branch(main, 0, Some(CanvasPoint::new(900.0, 40.0)))
        .unwrap();
    source.send_message(branch, "By train").unwrap();
    source.save(&path).unwrap();

    let mut target = session();
    target.load(&path).unwrap();

    assert_eq!(target.export_snapshot().nodes, source.export_snapshot().nodes);
    assert_eq!(
        target.graph().context_chain(branch).unwrap(),
        source.graph().context_chain(branch).unwrap()
    );
    assert_eq!(target.view().selected(), Some(main));
}

#[test]
fn keyboard_events_drive_navigation_through_intents() {
    let mut session = session();
    let main = session.graph().main_id();
    session.send_message(main, "first").unwrap();
    session.send_message(main, "second").unwrap();

    let event = KeyboardEvent {
        state: KeyState::Down,
        key: Key::Character("s".into()),
        modifiers: Modifiers::empty(),
        ..Default::default()
    };
    let intents = input::intents_from_actions(&input::from_event(&event, false));
    let errors = session.apply_intents(intents);

    assert!(errors.is_empty());
    assert_eq!(session.view().focus, Some(Focus::new(main, 1)));
}

#[test]
fn organize_then_fit_shows_every_node() {
    let mut session = session();
    let main = session.graph().main_id();
    session.send_message(main, "q").unwrap();
    let first = session.create_branch(main, 0, None).unwrap();
    session.create_branch(first, 0, None).unwrap();

    let errors = session.apply_intents([SessionIntent::Organize]);
    assert!(errors.is_empty());

    let visible = session
        .viewport()
        .visible_canvas_rect(session.view().viewport_size);
    for node in session.graph().nodes() {
        assert!(visible.contains(node.position), "node {} off screen", node.id);
    }
}

/// Build a random tree: each step forks from an earlier node.
fn build_tree(session: &mut BranchSession, picks: &[usize]) {
    let main = session.graph().main_id();
    session.send_message(main, "root").unwrap();
    let mut ids = vec![main];
    for pick in picks {
        let parent = ids[pick % ids.len()];
        let id = session.create_branch(parent, 0, None).unwrap();
        ids.push(id);
    }
}

proptest! {
    #[test]
    fn organize_is_idempotent(picks in prop::collection::vec(0usize..32, 0..24)) {
        let mut session = session();
        build_tree(&mut session, &picks);

        session.organize().unwrap();
        let once = session.export_snapshot().nodes;
        session.organize().unwrap();
        let twice = session.export_snapshot().nodes;

        prop_assert_eq!(once, twice);
    }

    #[test]
    fn screen_and_canvas_transforms_are_inverse(
        scale in 0.1f64..8.0,
        tx in -5_000.0f64..5_000.0,
        ty in -5_000.0f64..5_000.0,
        px in -5_000.0f64..5_000.0,
        py in -5_000.0f64..5_000.0,
    ) {
        let mut viewport = Viewport::default();
        viewport.set_transform(scale, ScreenVector::new(tx, ty));
        let canvas = CanvasPoint::new(px, py);

        let back = viewport.screen_to_canvas(viewport.canvas_to_screen(canvas));

        prop_assert!((back.x - canvas.x).abs() < 1e-6);
        prop_assert!((back.y - canvas.y).abs() < 1e-6);
    }

    #[test]
    fn deleting_any_branch_removes_exactly_its_subtree(
        picks in prop::collection::vec(0usize..32, 1..24),
        victim in 1usize..32,
    ) {
        let mut session = session();
        build_tree(&mut session, &picks);
        let branches: Vec<NodeId> = session
            .graph()
            .nodes()
            .filter(|n| !n.is_main())
            .map(|n| n.id)
            .collect();
        let target = branches[victim % branches.len()];
        let mut expected = session.graph().descendants_of(target);
        expected.push(target);
        expected.sort();
        let before = session.graph().len();

        let mut removed = session.delete_subtree(target).unwrap();
        removed.sort();

        prop_assert_eq!(&removed, &expected);
        prop_assert_eq!(session.graph().len(), before - removed.len());
        for id in &removed {
            prop_assert!(!session.graph().contains(*id));
        }
    }
}
