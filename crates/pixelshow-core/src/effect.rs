//! Effect commands shared by the controller and the devices.

use crate::color::Color;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Shortest accepted period for any effect
pub const MIN_PERIOD_MS: u32 = 50;
/// Waves shorter than this strobe instead of travelling
pub const MIN_WAVE_PERIOD_MS: u32 = 120;
/// Lowest accepted intensity
pub const MIN_INTENSITY: f32 = 0.1;
/// Highest accepted intensity
pub const MAX_INTENSITY: f32 = 1.0;

/// Visual effect families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EffectKind {
    /// Constant `color_a`
    Solid,
    /// Square wave between `color_a` and off
    Blink,
    /// Phase-shifted sine threshold, travels across devices
    Wave,
    /// Rotating two-color gradient
    Gradient,
}

impl EffectKind {
    /// All kinds, in wire order
    pub const ALL: [EffectKind; 4] = [
        EffectKind::Solid,
        EffectKind::Blink,
        EffectKind::Wave,
        EffectKind::Gradient,
    ];

    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Solid => "solid",
            Self::Blink => "blink",
            Self::Wave => "wave",
            Self::Gradient => "gradient",
        }
    }
}

impl fmt::Display for EffectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EffectKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EffectKind::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown effect kind: {}", s))
    }
}

/// A parameterized effect, optionally scheduled for a wall-clock instant.
///
/// `period_ms` and `intensity` are clamped on construction, so every
/// command in circulation is already valid.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectCommand {
    kind: EffectKind,
    color_a: Color,
    color_b: Color,
    period_ms: u32,
    intensity: f32,
    start_at: Option<u64>,
}

impl EffectCommand {
    /// Create a command that starts on receipt
    pub fn new(
        kind: EffectKind,
        color_a: Color,
        color_b: Color,
        period_ms: u32,
        intensity: f32,
    ) -> Self {
        let intensity = if intensity.is_finite() {
            intensity.clamp(MIN_INTENSITY, MAX_INTENSITY)
        } else {
            MAX_INTENSITY
        };
        Self {
            kind,
            color_a,
            color_b,
            period_ms: period_ms.max(MIN_PERIOD_MS),
            intensity,
            start_at: None,
        }
    }

    /// Shorthand for a solid color
    pub fn solid(color: Color) -> Self {
        Self::new(EffectKind::Solid, color, Color::black(), 500, 1.0)
    }

    /// Schedule the start at an absolute time (ms since the Unix epoch)
    pub fn with_start_at(mut self, start_at: u64) -> Self {
        self.start_at = Some(start_at);
        self
    }

    /// Drop any scheduled start
    pub fn without_start_at(mut self) -> Self {
        self.start_at = None;
        self
    }

    /// Effect family
    pub fn kind(&self) -> EffectKind {
        self.kind
    }

    /// Primary color
    pub fn color_a(&self) -> Color {
        self.color_a
    }

    /// Secondary color (gradient end, audio mix base)
    pub fn color_b(&self) -> Color {
        self.color_b
    }

    /// Period in milliseconds, at least [`MIN_PERIOD_MS`]
    pub fn period_ms(&self) -> u32 {
        self.period_ms
    }

    /// Intensity in `[0.1, 1]`
    pub fn intensity(&self) -> f32 {
        self.intensity
    }

    /// Scheduled start, if any
    pub fn start_at(&self) -> Option<u64> {
        self.start_at
    }
}

/// Whether devices modulate the running effect with sensor frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeFlag {
    /// Apply the audio-reactive overlay
    #[serde(rename = "audioReactive")]
    pub audio_reactive: bool,
}

impl ModeFlag {
    /// Audio-reactive mode on
    pub fn audio_reactive() -> Self {
        Self {
            audio_reactive: true,
        }
    }

    /// Audio-reactive mode off
    pub fn plain() -> Self {
        Self {
            audio_reactive: false,
        }
    }
}
