//! Per-device effect engine.
//!
//! A deterministic state machine: commands move it between `Idle`, `Solid`,
//! `Blink`, `Wave` and `Gradient`, and [`EffectEngine::tick`] renders the
//! current frame for a given wall-clock time. The engine owns no timers.
//! Scheduled starts and beat flashes are stored as deadlines and resolved on
//! the next tick, so a single render loop drives everything and replacing
//! the state implicitly cancels whatever the previous effect had pending.

use crate::color::Color;
use crate::effect::{EffectCommand, EffectKind, ModeFlag, MIN_WAVE_PERIOD_MS};
use crate::protocol::Inbound;
use crate::signal::SensorFrame;
use serde::Serialize;
use std::f64::consts::PI;
use tracing::{debug, trace};

/// Scheduled starts further ahead than this are pulled in
pub const MAX_SCHEDULE_LOOKAHEAD_MS: u64 = 5_000;
/// Duration of the full-white beat flash
pub const FLASH_DURATION_MS: u64 = 90;

/// Observable engine state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EffectState {
    /// Off
    Idle,
    /// Constant color
    Solid,
    /// Square wave
    Blink,
    /// Phase-shifted sine threshold
    Wave,
    /// Rotating gradient
    Gradient,
}

/// What to paint
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Fill {
    /// Flat color
    Color(Color),
    /// Linear gradient
    Gradient {
        /// Rotation in degrees, `[0, 360)`
        angle_deg: f32,
        /// Start color
        from: Color,
        /// End color
        to: Color,
    },
}

/// One rendered frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderFrame {
    /// Screen content
    pub fill: Fill,
    /// Desired indicator (torch) state
    pub indicator: bool,
    /// The indicator state was requested explicitly by a flash command
    pub indicator_manual: bool,
    /// State that produced this frame
    pub state: EffectState,
}

impl RenderFrame {
    /// Frame of an idle device
    pub fn idle() -> Self {
        Self {
            fill: Fill::Color(Color::black()),
            indicator: false,
            indicator_manual: false,
            state: EffectState::Idle,
        }
    }

    /// Flat color of this frame, `None` for gradients
    pub fn color(&self) -> Option<Color> {
        match self.fill {
            Fill::Color(c) => Some(c),
            Fill::Gradient { .. } => None,
        }
    }
}

impl Default for RenderFrame {
    fn default() -> Self {
        Self::idle()
    }
}

/// Side effects the engine cannot perform itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceAction {
    /// Play a clip through the audio capability
    PlayClip(u32),
}

#[derive(Debug, Clone, PartialEq)]
enum Running {
    Idle,
    Solid(EffectCommand),
    Blink {
        cmd: EffectCommand,
        started_at: u64,
    },
    Wave(EffectCommand),
    Gradient {
        cmd: EffectCommand,
        angle: f32,
    },
}

impl Running {
    fn command(&self) -> Option<&EffectCommand> {
        match self {
            Running::Idle => None,
            Running::Solid(cmd) | Running::Wave(cmd) => Some(cmd),
            Running::Blink { cmd, .. } | Running::Gradient { cmd, .. } => Some(cmd),
        }
    }

    fn state(&self) -> EffectState {
        match self {
            Running::Idle => EffectState::Idle,
            Running::Solid(_) => EffectState::Solid,
            Running::Blink { .. } => EffectState::Blink,
            Running::Wave(_) => EffectState::Wave,
            Running::Gradient { .. } => EffectState::Gradient,
        }
    }

    /// Whether the effect paints a new base color on its own every frame
    fn animates(&self) -> bool {
        matches!(
            self,
            Running::Blink { .. } | Running::Wave(_) | Running::Gradient { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
struct PendingStart {
    command: EffectCommand,
    due: u64,
}

/// Degrees per frame for a gradient of the given period
pub fn gradient_step(period_ms: u32) -> f32 {
    (1000.0 / period_ms.max(60) as f32).max(0.03)
}

/// Whether a wave is lit at `now_ms` for a device with the given phase.
///
/// Devices with different phases see the same sine shifted in time, which
/// turns one broadcast command into a travelling pattern.
pub fn wave_is_on(now_ms: u64, phase: u32, period_ms: u32, intensity: f32) -> bool {
    let period = period_ms.max(MIN_WAVE_PERIOD_MS) as u64;
    let offset = phase as u64 % period;
    let t = (now_ms + offset) % period;
    let s = ((2.0 * PI * t as f64 / period as f64).sin() + 1.0) / 2.0;
    s > 1.0 - intensity as f64
}

/// The per-device effect state machine
#[derive(Debug, Clone)]
pub struct EffectEngine {
    phase: u32,
    running: Running,
    pending: Option<PendingStart>,
    /// Most recent effect received, source of the audio mix colors
    last_effect: Option<EffectCommand>,
    audio_reactive: bool,
    overlay: Option<Color>,
    flash_until: Option<u64>,
    manual_indicator: Option<bool>,
    last_indicator: bool,
}

impl EffectEngine {
    /// Create an idle engine for a device with the given phase
    pub fn new(phase: u32) -> Self {
        Self {
            phase,
            running: Running::Idle,
            pending: None,
            last_effect: None,
            audio_reactive: false,
            overlay: None,
            flash_until: None,
            manual_indicator: None,
            last_indicator: false,
        }
    }

    /// Device phase offset
    pub fn phase(&self) -> u32 {
        self.phase
    }

    /// Current state
    pub fn state(&self) -> EffectState {
        self.running.state()
    }

    /// Command currently rendered
    pub fn current_command(&self) -> Option<&EffectCommand> {
        self.running.command()
    }

    /// Deadline of a scheduled start, if one is pending
    pub fn pending_start(&self) -> Option<u64> {
        self.pending.as_ref().map(|p| p.due)
    }

    /// Audio-reactive overlay enabled
    pub fn audio_reactive(&self) -> bool {
        self.audio_reactive
    }

    /// Dispatch a decoded message
    pub fn handle(&mut self, inbound: Inbound, now_ms: u64) -> Option<DeviceAction> {
        match inbound {
            Inbound::Effect(cmd) => self.apply_effect(cmd, now_ms),
            Inbound::Stop => self.stop(),
            Inbound::Mode(flag) => self.set_mode(flag),
            Inbound::Sensor(frame) => self.apply_sensor(frame, now_ms),
            Inbound::Flash { on } => self.set_manual_indicator(on),
            Inbound::Sound { clip } => return Some(DeviceAction::PlayClip(clip)),
            Inbound::Ignored => {}
        }
        None
    }

    /// Start `cmd` now, or at its `start_at` capped to the lookahead
    pub fn apply_effect(&mut self, cmd: EffectCommand, now_ms: u64) {
        self.last_effect = Some(cmd.clone());
        match cmd.start_at() {
            Some(at) if at > now_ms => {
                let delay = (at - now_ms).min(MAX_SCHEDULE_LOOKAHEAD_MS);
                debug!("Scheduling {} in {}ms", cmd.kind(), delay);
                self.pending = Some(PendingStart {
                    command: cmd,
                    due: now_ms + delay,
                });
            }
            _ => {
                self.pending = None;
                self.enter(cmd, now_ms);
            }
        }
    }

    /// Return to idle, dropping pending starts, flashes and overlays
    pub fn stop(&mut self) {
        debug!("Stopping effect (was {:?})", self.running.state());
        self.running = Running::Idle;
        self.pending = None;
        self.last_effect = None;
        self.overlay = None;
        self.flash_until = None;
        self.manual_indicator = None;
    }

    /// Toggle the audio-reactive overlay
    pub fn set_mode(&mut self, flag: ModeFlag) {
        self.audio_reactive = flag.audio_reactive;
        if !flag.audio_reactive {
            self.overlay = None;
        }
    }

    /// Modulate the running effect with a sensor frame.
    ///
    /// The mixed color replaces the next rendered frame; the running effect
    /// itself is untouched. Animated effects resume their own pattern after
    /// that frame, a static one keeps the mix until the next sensor frame or
    /// command. A beat (re)arms the white flash deadline.
    pub fn apply_sensor(&mut self, frame: SensorFrame, now_ms: u64) {
        if !self.audio_reactive {
            trace!("Sensor frame ignored, audio-reactive mode is off");
            return;
        }
        if frame.beat {
            self.flash_until = Some(now_ms + FLASH_DURATION_MS);
        }
        if let Some(effect) = &self.last_effect {
            self.overlay = Some(effect.color_b().lerp(effect.color_a(), frame.energy));
        }
    }

    /// Force the indicator on/off, or toggle it with `None`
    pub fn set_manual_indicator(&mut self, on: Option<bool>) {
        let on = on.unwrap_or(!self.last_indicator);
        self.manual_indicator = Some(on);
        self.last_indicator = on;
    }

    fn enter(&mut self, cmd: EffectCommand, at_ms: u64) {
        if self.running.command() == Some(&cmd) {
            trace!("Effect already running, ignoring duplicate");
            return;
        }
        debug!(
            "Entering {} (a={}, b={}, period={}ms, intensity={:.2})",
            cmd.kind(),
            cmd.color_a(),
            cmd.color_b(),
            cmd.period_ms(),
            cmd.intensity()
        );
        self.overlay = None;
        self.manual_indicator = None;
        self.running = match cmd.kind() {
            EffectKind::Solid => Running::Solid(cmd),
            EffectKind::Blink => Running::Blink {
                cmd,
                started_at: at_ms,
            },
            EffectKind::Wave => Running::Wave(cmd),
            EffectKind::Gradient => Running::Gradient { cmd, angle: 0.0 },
        };
    }

    /// Advance to `now_ms` and render one frame
    pub fn tick(&mut self, now_ms: u64) -> RenderFrame {
        if let Some(due) = self.pending_start() {
            if now_ms >= due {
                if let Some(p) = self.pending.take() {
                    self.enter(p.command, p.due);
                }
            }
        }

        let phase = self.phase;
        let (base, effect_indicator) = match &mut self.running {
            Running::Idle => (Fill::Color(Color::black()), false),
            Running::Solid(cmd) => (Fill::Color(cmd.color_a()), true),
            Running::Blink { cmd, started_at } => {
                let elapsed = now_ms.saturating_sub(*started_at);
                let on = (elapsed / cmd.period_ms() as u64) % 2 == 0;
                (on_off(cmd.color_a(), on), on)
            }
            Running::Wave(cmd) => {
                let on = wave_is_on(now_ms, phase, cmd.period_ms(), cmd.intensity());
                (on_off(cmd.color_a(), on), on)
            }
            Running::Gradient { cmd, angle } => {
                *angle = (*angle + gradient_step(cmd.period_ms())) % 360.0;
                (
                    Fill::Gradient {
                        angle_deg: *angle,
                        from: cmd.color_a(),
                        to: cmd.color_b(),
                    },
                    false,
                )
            }
        };

        let flashing = match self.flash_until {
            Some(until) if now_ms < until => true,
            Some(_) => {
                self.flash_until = None;
                false
            }
            None => false,
        };

        let fill = if flashing {
            Fill::Color(Color::white())
        } else if let Some(mixed) = self.overlay {
            if self.running.animates() {
                self.overlay = None;
            }
            Fill::Color(mixed)
        } else {
            base
        };

        let indicator = self.manual_indicator.unwrap_or(effect_indicator);
        self.last_indicator = indicator;

        RenderFrame {
            fill,
            indicator,
            indicator_manual: self.manual_indicator.is_some(),
            state: self.running.state(),
        }
    }
}

fn on_off(color: Color, on: bool) -> Fill {
    Fill::Color(if on { color } else { Color::black() })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn red() -> Color {
        Color::rgb(255, 0, 0)
    }

    #[test]
    fn test_new_engine_is_idle() {
        let mut engine = EffectEngine::new(0);
        assert_eq!(engine.state(), EffectState::Idle);
        assert_eq!(engine.tick(0), RenderFrame::idle());
    }

    #[test]
    fn test_solid_lights_indicator() {
        let mut engine = EffectEngine::new(0);
        engine.apply_effect(EffectCommand::solid(red()), 0);
        let frame = engine.tick(10);
        assert_eq!(frame.color(), Some(red()));
        assert!(frame.indicator);
        assert_eq!(frame.state, EffectState::Solid);
    }

    #[test]
    fn test_duplicate_blink_keeps_phase() {
        let mut engine = EffectEngine::new(0);
        let cmd = EffectCommand::new(EffectKind::Blink, red(), Color::black(), 200, 1.0);
        engine.apply_effect(cmd.clone(), 0);
        engine.apply_effect(cmd, 250);
        // Still counting from t=0: 250ms is in the second (off) half
        assert_eq!(engine.tick(250).color(), Some(Color::black()));
    }

    #[test]
    fn test_gradient_rotates_and_wraps() {
        let mut engine = EffectEngine::new(0);
        let cmd = EffectCommand::new(EffectKind::Gradient, red(), Color::white(), 100, 1.0);
        engine.apply_effect(cmd, 0);

        let step = gradient_step(100);
        assert_eq!(step, 10.0);

        let mut last = 0.0;
        for i in 0..40 {
            match engine.tick(i * 16).fill {
                Fill::Gradient { angle_deg, .. } => {
                    assert!((0.0..360.0).contains(&angle_deg));
                    last = angle_deg;
                }
                other => panic!("expected gradient, got {:?}", other),
            }
        }
        assert!((last - 40.0).abs() < 1e-3);
        assert!(!engine.tick(700).indicator);
    }

    #[test]
    fn test_slow_gradient_step_has_floor() {
        assert_eq!(gradient_step(10_000), 0.1);
        assert_eq!(gradient_step(1_000_000), 0.03);
        assert_eq!(gradient_step(10), 1000.0 / 60.0);
    }

    #[test]
    fn test_manual_indicator_toggles_and_clears_on_effect() {
        let mut engine = EffectEngine::new(0);
        engine.set_manual_indicator(None);
        let frame = engine.tick(0);
        assert!(frame.indicator);
        assert!(frame.indicator_manual);

        engine.set_manual_indicator(None);
        assert!(!engine.tick(1).indicator);

        engine.set_manual_indicator(Some(true));
        engine.apply_effect(
            EffectCommand::new(EffectKind::Gradient, red(), red(), 500, 1.0),
            2,
        );
        let frame = engine.tick(3);
        assert!(!frame.indicator);
        assert!(!frame.indicator_manual);
    }

    #[test]
    fn test_sound_becomes_device_action() {
        let mut engine = EffectEngine::new(0);
        assert_eq!(
            engine.handle(Inbound::Sound { clip: 4 }, 0),
            Some(DeviceAction::PlayClip(4))
        );
        assert_eq!(engine.handle(Inbound::Ignored, 0), None);
        assert_eq!(engine.state(), EffectState::Idle);
    }
}
