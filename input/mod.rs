/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Keyboard shortcuts for the canvas.
//!
//! Pointer input goes straight to the session (`pointer_down`/`pointer_move`/
//! `pointer_up`); keys are first collected into [`KeyboardActions`] so the
//! mapping can be tested without a windowing system.

use keyboard_types::{Key, KeyState, KeyboardEvent, Modifiers, NamedKey};

use crate::navigation::Direction;
use crate::session::SessionIntent;
use crate::viewport::PanKey;

/// Keyboard actions collected from one key event.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct KeyboardActions {
    pub navigate: Option<Direction>,
    /// Shift held with a navigation key.
    pub zoom_close: bool,
    pub pan_pressed: Option<PanKey>,
    pub pan_released: Option<PanKey>,
    pub stop_pan: bool,
    pub fit_to_view: bool,
    pub organize: bool,
    pub delete_selected: bool,
}

fn pan_key(key: &Key) -> Option<PanKey> {
    match key {
        Key::Named(NamedKey::ArrowLeft) => Some(PanKey::Left),
        Key::Named(NamedKey::ArrowRight) => Some(PanKey::Right),
        Key::Named(NamedKey::ArrowUp) => Some(PanKey::Up),
        Key::Named(NamedKey::ArrowDown) => Some(PanKey::Down),
        _ => None,
    }
}

/// Map one key transition to actions (input detection only).
///
/// While the host has a text field focused only key releases are honoured, so
/// a held arrow key cannot get stuck when focus moves into a text box.
pub fn collect_actions(
    key: &Key,
    state: KeyState,
    modifiers: Modifiers,
    text_entry_focused: bool,
) -> KeyboardActions {
    let mut actions = KeyboardActions::default();

    if state == KeyState::Up {
        actions.pan_released = pan_key(key);
        return actions;
    }
    if text_entry_focused {
        return actions;
    }

    // Escape halts a keyboard pan in progress.
    if *key == Key::Named(NamedKey::Escape) {
        actions.stop_pan = true;
        return actions;
    }

    if let Some(pan) = pan_key(key) {
        actions.pan_pressed = Some(pan);
        return actions;
    }

    // Leave Ctrl/Cmd chords to the host.
    if modifiers.intersects(Modifiers::CONTROL | Modifiers::META | Modifiers::ALT) {
        return actions;
    }

    match key {
        Key::Named(NamedKey::Delete) => {
            if !modifiers.contains(Modifiers::SHIFT) {
                actions.delete_selected = true;
            }
        },
        Key::Character(text) => match text.to_lowercase().as_str() {
            "w" => actions.navigate = Some(Direction::Up),
            "s" => actions.navigate = Some(Direction::Down),
            "a" => actions.navigate = Some(Direction::Left),
            "d" => actions.navigate = Some(Direction::Right),
            "c" => actions.fit_to_view = true,
            "o" => actions.organize = true,
            _ => {},
        },
        _ => {},
    }
    if actions.navigate.is_some() {
        actions.zoom_close = modifiers.contains(Modifiers::SHIFT);
    }

    actions
}

pub fn from_event(event: &KeyboardEvent, text_entry_focused: bool) -> KeyboardActions {
    collect_actions(&event.key, event.state, event.modifiers, text_entry_focused)
}

/// Convert keyboard actions to session intents without applying them.
pub fn intents_from_actions(actions: &KeyboardActions) -> Vec<SessionIntent> {
    let mut intents = Vec::new();
    if actions.stop_pan {
        intents.push(SessionIntent::StopKeyboardPan);
    }
    if let Some(key) = actions.pan_pressed {
        intents.push(SessionIntent::PanKeyPressed(key));
    }
    if let Some(key) = actions.pan_released {
        intents.push(SessionIntent::PanKeyReleased(key));
    }
    if let Some(direction) = actions.navigate {
        intents.push(SessionIntent::Navigate {
            direction,
            zoom_close: actions.zoom_close,
        });
    }
    if actions.fit_to_view {
        intents.push(SessionIntent::FitToView);
    }
    if actions.organize {
        intents.push(SessionIntent::Organize);
    }
    if actions.delete_selected {
        intents.push(SessionIntent::DeleteSelected);
    }
    intents
}
