/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Tunable constants for the canvas, grouped per subsystem.
//!
//! Every group deserializes with `#[serde(default)]`, so a TOML override only
//! needs the keys it changes.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::generation::SamplingOptions;
use crate::layout::metrics::NodeMetrics;

/// Lower bound of the zoom range.
pub const MIN_SCALE: f64 = 0.1;
/// Upper bound of the zoom range.
pub const MAX_SCALE: f64 = 8.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewportConfig {
    pub min_scale: f64,
    pub max_scale: f64,
    pub panning_sensitivity: f64,
    pub zoom_sensitivity: f64,
    pub scroll_pan_sensitivity: f64,
    /// Scale used by "zoom close" navigation.
    pub zoom_close_scale: f64,
}

impl Default for ViewportConfig {
    fn default() -> Self {
        Self {
            min_scale: MIN_SCALE,
            max_scale: MAX_SCALE,
            panning_sensitivity: 0.42,
            zoom_sensitivity: 0.0012,
            scroll_pan_sensitivity: 1.0,
            zoom_close_scale: 2.0,
        }
    }
}

/// Keyboard pan speeds, in screen pixels per tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PanConfig {
    pub base_speed: f64,
    pub max_speed: f64,
    pub acceleration: f64,
    pub deceleration: f64,
}

impl Default for PanConfig {
    fn default() -> Self {
        Self {
            base_speed: 5.0,
            max_speed: 40.0,
            acceleration: 0.2,
            deceleration: 0.8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Minimum spacing used by overlap avoidance and default branch placement.
    pub node_spacing: f64,
    pub stack_horizontal: f64,
    pub stack_vertical: f64,
    pub fit_padding: f64,
    /// Width of the side panel that overlaps the canvas on the right.
    pub reserved_width: f64,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            node_spacing: 400.0,
            stack_horizontal: 500.0,
            stack_vertical: 120.0,
            fit_padding: 100.0,
            reserved_width: 384.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub model: String,
    pub system_prompt: Option<String>,
    pub sampling: SamplingOptions,
    /// Cancel an in-flight stream when navigation leaves its node.
    pub cancel_on_navigate: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            system_prompt: None,
            sampling: SamplingOptions::default(),
            cancel_on_navigate: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanvasConfig {
    pub viewport: ViewportConfig,
    pub pan: PanConfig,
    pub layout: LayoutConfig,
    pub metrics: NodeMetrics,
    pub stream: StreamConfig,
}

#[derive(Debug)]
pub enum ConfigError {
    Parse(toml::de::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(e) => write!(f, "invalid canvas config: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Parse(e) => Some(e),
        }
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        Self::Parse(e)
    }
}

impl CanvasConfig {
    /// Parse overrides from TOML and clamp them into usable ranges.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        Ok(config.sanitized())
    }

    /// Clamp values that would otherwise break the transform or the pan loop.
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::default();

        let vp = &mut self.viewport;
        if !(vp.min_scale.is_finite() && vp.min_scale > 0.0) {
            vp.min_scale = defaults.viewport.min_scale;
        }
        if !(vp.max_scale.is_finite() && vp.max_scale >= vp.min_scale) {
            vp.max_scale = vp.min_scale.max(defaults.viewport.max_scale);
        }
        vp.zoom_close_scale = vp.zoom_close_scale.clamp(vp.min_scale, vp.max_scale);
        vp.panning_sensitivity = vp.panning_sensitivity.max(0.0);
        vp.zoom_sensitivity = vp.zoom_sensitivity.max(0.0);
        vp.scroll_pan_sensitivity = vp.scroll_pan_sensitivity.max(0.0);

        let pan = &mut self.pan;
        pan.base_speed = pan.base_speed.max(0.0);
        pan.max_speed = pan.max_speed.max(pan.base_speed);
        // A zero step would never reach (or leave) full speed.
        if !(pan.acceleration > 0.0) {
            pan.acceleration = defaults.pan.acceleration;
        }
        if !(pan.deceleration > 0.0) {
            pan.deceleration = defaults.pan.deceleration;
        }
        pan.acceleration = pan.acceleration.min(1.0);
        pan.deceleration = pan.deceleration.min(1.0);

        let layout = &mut self.layout;
        if !(layout.node_spacing > 0.0) {
            layout.node_spacing = defaults.layout.node_spacing;
        }
        layout.stack_horizontal = layout.stack_horizontal.max(0.0);
        layout.stack_vertical = layout.stack_vertical.max(0.0);
        layout.fit_padding = layout.fit_padding.max(0.0);
        layout.reserved_width = layout.reserved_width.max(0.0);

        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn defaults_match_canvas_constants() {
        let config = CanvasConfig::default();
        assert_eq!(config.viewport.min_scale, 0.1);
        assert_eq!(config.viewport.max_scale, 8.0);
        assert_eq!(config.viewport.panning_sensitivity, 0.42);
        assert_eq!(config.pan.max_speed, 40.0);
        assert_eq!(config.layout.node_spacing, 400.0);
        assert!(config.stream.cancel_on_navigate);
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let config = CanvasConfig::from_toml_str(
            r#"
            [viewport]
            max_scale = 4.0

            [stream]
            model = "llama3"
            "#,
        )
        .expect("valid toml");

        assert_eq!(config.viewport.max_scale, 4.0);
        assert_eq!(config.viewport.min_scale, 0.1);
        assert_eq!(config.stream.model, "llama3");
        assert_eq!(config.pan, PanConfig::default());
    }

    #[test]
    fn malformed_toml_is_reported() {
        let err = CanvasConfig::from_toml_str("[viewport\nmax_scale = ").unwrap_err();
        assert!(err.to_string().starts_with("invalid canvas config"));
    }

    #[rstest]
    #[case("[viewport]\nmin_scale = -1.0", 0.1, 8.0)]
    #[case("[viewport]\nmin_scale = 2.0\nmax_scale = 1.0", 2.0, 8.0)]
    #[case("[viewport]\nmin_scale = 0.5\nmax_scale = 3.0", 0.5, 3.0)]
    fn scale_range_is_sanitized(#[case] source: &str, #[case] min: f64, #[case] max: f64) {
        let config = CanvasConfig::from_toml_str(source).expect("valid toml");
        assert_eq!(config.viewport.min_scale, min);
        assert_eq!(config.viewport.max_scale, max);
        assert!(config.viewport.zoom_close_scale >= min);
        assert!(config.viewport.zoom_close_scale <= max);
    }

    #[test]
    fn zero_pan_steps_fall_back_to_defaults() {
        let config =
            CanvasConfig::from_toml_str("[pan]\nacceleration = 0.0\ndeceleration = -3.0")
                .expect("valid toml");
        assert_eq!(config.pan.acceleration, 0.2);
        assert_eq!(config.pan.deceleration, 0.8);
    }
}
