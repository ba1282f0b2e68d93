/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Pan/zoom viewport for the conversation canvas.
//!
//! The render transform is "translate then scale": a canvas point `p` is drawn
//! at `translate + p * scale`. Points are tagged with their coordinate space so
//! canvas and screen positions cannot be mixed up by accident.

use std::collections::HashSet;

use euclid::{Box2D, Point2D, Scale, Size2D, Vector2D};

use crate::config::{PanConfig, ViewportConfig};

/// Logical coordinate space that nodes occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanvasSpace;

/// Viewport pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenSpace;

pub type CanvasPoint = Point2D<f64, CanvasSpace>;
pub type CanvasVector = Vector2D<f64, CanvasSpace>;
pub type CanvasBox = Box2D<f64, CanvasSpace>;
pub type ScreenPoint = Point2D<f64, ScreenSpace>;
pub type ScreenVector = Vector2D<f64, ScreenSpace>;
pub type ScreenSize = Size2D<f64, ScreenSpace>;
pub type ZoomScale = Scale<f64, CanvasSpace, ScreenSpace>;

/// Scale/translate state plus the coordinate mapping between canvas and screen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    scale: f64,
    translate: ScreenVector,
    config: ViewportConfig,
}

impl Viewport {
    pub fn new(config: ViewportConfig) -> Self {
        Self {
            scale: 1.0,
            translate: ScreenVector::zero(),
            config,
        }
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn translate(&self) -> ScreenVector {
        self.translate
    }

    pub fn zoom_scale(&self) -> ZoomScale {
        ZoomScale::new(self.scale)
    }

    pub fn config(&self) -> &ViewportConfig {
        &self.config
    }

    /// Clamp a scale value to the allowed range
    pub fn clamp_scale(&self, scale: f64) -> f64 {
        if scale.is_nan() {
            return self.scale;
        }
        // Inverted or NaN bounds from an unsanitized config must not panic.
        scale.max(self.config.min_scale).min(self.config.max_scale)
    }

    /// Replace the whole transform. The scale is clamped; the translation is taken as-is.
    pub fn set_transform(&mut self, scale: f64, translate: ScreenVector) {
        self.scale = self.clamp_scale(scale);
        self.translate = translate;
    }

    pub fn canvas_to_screen(&self, point: CanvasPoint) -> ScreenPoint {
        point * self.zoom_scale() + self.translate
    }

    /// Exact algebraic inverse of [`Viewport::canvas_to_screen`].
    pub fn screen_to_canvas(&self, point: ScreenPoint) -> CanvasPoint {
        (point - self.translate) / self.zoom_scale()
    }

    /// Change the scale while keeping the canvas point under `anchor` fixed on screen.
    ///
    /// Returns the scale actually applied after clamping.
    pub fn zoom_at(&mut self, anchor: ScreenPoint, requested_scale: f64) -> f64 {
        let canvas_anchor = self.screen_to_canvas(anchor);
        let next = self.clamp_scale(requested_scale);
        let scale_delta = ZoomScale::new(next - self.scale);
        self.translate -= canvas_anchor.to_vector() * scale_delta;
        self.scale = next;
        next
    }

    /// Multiplicative zoom around `anchor`.
    pub fn zoom_by(&mut self, anchor: ScreenPoint, factor: f64) -> f64 {
        self.zoom_at(anchor, self.scale * factor)
    }

    /// Zoom from a wheel/pinch delta (positive delta zooms out).
    pub fn zoom_by_wheel(&mut self, anchor: ScreenPoint, wheel_delta: f64) -> f64 {
        let factor = (-wheel_delta * self.config.zoom_sensitivity).exp();
        self.zoom_by(anchor, factor)
    }

    /// Direct pan from a pointer drag delta.
    pub fn pan_by(&mut self, pointer_delta: ScreenVector) {
        self.translate += pointer_delta * self.config.panning_sensitivity;
    }

    /// Two-finger trackpad scroll; content moves against the scroll direction.
    pub fn scroll_pan(&mut self, scroll_delta: ScreenVector) {
        self.translate -= scroll_delta * self.config.scroll_pan_sensitivity;
    }

    /// Unscaled translation, used by the keyboard pan loop.
    pub fn translate_by(&mut self, delta: ScreenVector) {
        self.translate += delta;
    }

    /// Translate so `point` sits at the center of a viewport of `size`.
    ///
    /// `scale_override` switches to that scale first (clamped), so the centering
    /// is computed against the final scale.
    pub fn center_on(&mut self, point: CanvasPoint, size: ScreenSize, scale_override: Option<f64>) {
        if let Some(scale) = scale_override {
            self.scale = self.clamp_scale(scale);
        }
        let center = ScreenPoint::new(size.width / 2.0, size.height / 2.0);
        self.translate = center - point * self.zoom_scale();
    }

    /// Canvas-space rectangle currently visible in a viewport of `size`.
    pub fn visible_canvas_rect(&self, size: ScreenSize) -> CanvasBox {
        CanvasBox::new(
            self.screen_to_canvas(ScreenPoint::origin()),
            self.screen_to_canvas(ScreenPoint::new(size.width, size.height)),
        )
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(ViewportConfig::default())
    }
}

/// Direction keys that drive the continuous keyboard pan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PanKey {
    Left,
    Right,
    Up,
    Down,
}

impl PanKey {
    /// Screen-space heading for a held key. Content moves opposite to the key,
    /// so holding "left" reveals what is to the left.
    fn heading(self) -> ScreenVector {
        match self {
            Self::Left => ScreenVector::new(1.0, 0.0),
            Self::Right => ScreenVector::new(-1.0, 0.0),
            Self::Up => ScreenVector::new(0.0, 1.0),
            Self::Down => ScreenVector::new(0.0, -1.0),
        }
    }
}

/// Result of one keyboard-pan tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PanTick {
    Moved(ScreenVector),
    Idle,
}

/// Fixed-timestep keyboard pan with acceleration and release decay.
///
/// While any key is held the ramp term climbs towards 1; once every key is
/// released it decays towards 0 and the last heading coasts at the matching
/// speed. `step` reports [`PanTick::Idle`] as soon as velocity and ramp are both
/// zero, which is the host's signal to stop scheduling ticks.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyboardPan {
    pressed: HashSet<PanKey>,
    ramp: f64,
    heading: ScreenVector,
    velocity: ScreenVector,
    config: PanConfig,
}

impl KeyboardPan {
    pub fn new(config: PanConfig) -> Self {
        Self {
            pressed: HashSet::new(),
            ramp: 0.0,
            heading: ScreenVector::zero(),
            velocity: ScreenVector::zero(),
            config,
        }
    }

    pub fn press(&mut self, key: PanKey) {
        self.pressed.insert(key);
    }

    pub fn release(&mut self, key: PanKey) {
        self.pressed.remove(&key);
    }

    /// Release every key. The loop then decays to a stop on its own.
    pub fn clear(&mut self) {
        self.pressed.clear();
    }

    pub fn is_pressed(&self, key: PanKey) -> bool {
        self.pressed.contains(&key)
    }

    /// Whether the host should keep scheduling ticks.
    pub fn is_active(&self) -> bool {
        !self.pressed.is_empty() || self.ramp > 0.0
    }

    pub fn velocity(&self) -> ScreenVector {
        self.velocity
    }

    pub fn ramp(&self) -> f64 {
        self.ramp
    }

    pub fn step(&mut self) -> PanTick {
        if self.pressed.is_empty() {
            self.ramp = (self.ramp - self.config.deceleration).max(0.0);
        } else {
            self.ramp = (self.ramp + self.config.acceleration).min(1.0);
            self.heading = self
                .pressed
                .iter()
                .fold(ScreenVector::zero(), |acc, key| acc + key.heading());
        }

        let speed = if self.ramp > 0.0 {
            self.config.base_speed + (self.config.max_speed - self.config.base_speed) * self.ramp
        } else {
            0.0
        };
        self.velocity = self.heading * speed;

        if self.ramp <= 0.0 && self.velocity == ScreenVector::zero() {
            self.heading = ScreenVector::zero();
            return PanTick::Idle;
        }
        PanTick::Moved(self.velocity)
    }
}

impl Default for KeyboardPan {
    fn default() -> Self {
        Self::new(PanConfig::default())
    }
}
