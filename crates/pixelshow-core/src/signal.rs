//! Sensor signal conditioning.
//!
//! Turns a noisy integer amplitude stream (a clap sensor or microphone level
//! read over serial) into a bounded `energy` value and a debounced `beat`
//! event, published at a throttled rate.
//!
//! Per sample:
//! 1. clamp to the valid sensor range
//! 2. track a slow EMA baseline (noise floor)
//! 3. take the positive deviation above the baseline
//! 4. normalize by a decaying peak
//! 5. gamma-compress and low-pass the result
//! 6. fire a beat when the smoothed energy crosses the sensitivity threshold
//!    and the cooldown since the last emitted beat has elapsed
//!
//! The constants live in [`SignalConfig`]; the defaults are tuned by ear
//! and are meant to be adjusted.

use crate::clock::{Clock, SystemClock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, trace};

/// Output of the conditioner, one per throttle interval at most.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorFrame {
    /// Normalized level in `[0, 1]`
    pub energy: f32,
    /// A debounced transient crossed the threshold
    pub beat: bool,
}

/// Conditioner tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    /// Sensitivity slider value. The beat threshold is
    /// `sensitivity / threshold_divisor`, clamped.
    pub sensitivity: f32,
    /// Target publication rate in Hz (clamped to [5, 120])
    pub sample_hz: f32,
    /// Lowest valid raw level
    pub min_level: f64,
    /// Highest valid raw level
    pub max_level: f64,
    /// Minimum time between two emitted beats
    pub beat_cooldown_ms: u64,
    /// Weight of a new sample in the baseline EMA
    pub baseline_alpha: f64,
    /// Per-sample decay of the peak tracker
    pub peak_decay: f64,
    /// Keeps the peak tracker from collapsing to zero
    pub peak_floor_epsilon: f64,
    /// Perceptual shaping exponent
    pub gamma: f64,
    /// Weight of the previous value in the low-pass filter
    pub smoothing: f64,
    /// Divisor mapping sensitivity to a threshold
    pub threshold_divisor: f32,
    /// Threshold lower bound
    pub threshold_min: f32,
    /// Threshold upper bound
    pub threshold_max: f32,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            sensitivity: 80.0,
            sample_hz: 40.0,
            min_level: 0.0,
            max_level: 1023.0,
            beat_cooldown_ms: 180,
            baseline_alpha: 0.02,
            peak_decay: 0.995,
            peak_floor_epsilon: 1e-6,
            gamma: 0.6,
            smoothing: 0.7,
            threshold_divisor: 300.0,
            threshold_min: 0.05,
            threshold_max: 0.9,
        }
    }
}

impl SignalConfig {
    /// Effective publication rate in Hz
    pub fn effective_hz(&self) -> f32 {
        if self.sample_hz.is_finite() {
            self.sample_hz.clamp(5.0, 120.0)
        } else {
            40.0
        }
    }

    /// Minimum time between two emitted frames
    pub fn min_emit_interval_ms(&self) -> u64 {
        (1000.0 / self.effective_hz()).floor() as u64
    }

    /// Beat threshold on the smoothed energy
    pub fn beat_threshold(&self) -> f32 {
        (self.sensitivity / self.threshold_divisor).clamp(self.threshold_min, self.threshold_max)
    }
}

/// Mutable filter state. Owned by exactly one conditioner.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConditionerState {
    /// EMA of the raw level
    pub baseline: f64,
    /// Decaying max deviation
    pub peak: f64,
    /// Low-passed normalized energy
    pub smoothed: f64,
    /// Time of the last emitted frame
    pub last_emit: Option<u64>,
    /// Time of the last emitted beat
    pub last_beat_at: Option<u64>,
}

/// Stateful filter from raw samples to [`SensorFrame`]s.
///
/// Samples must be fed sequentially, one conditioner per sensor.
pub struct SignalConditioner {
    config: SignalConfig,
    state: ConditionerState,
    /// A beat was detected but not yet published because of the throttle
    beat_pending: bool,
    clock: Arc<dyn Clock>,
}

impl SignalConditioner {
    /// Create a conditioner reading time from the system clock
    pub fn new(config: SignalConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a conditioner with an injected clock
    pub fn with_clock(config: SignalConfig, clock: Arc<dyn Clock>) -> Self {
        debug!(
            "SignalConditioner created: sensitivity={}, rate={}Hz, threshold={:.3}",
            config.sensitivity,
            config.effective_hz(),
            config.beat_threshold()
        );
        Self {
            config,
            state: ConditionerState::default(),
            beat_pending: false,
            clock,
        }
    }

    /// Current configuration
    pub fn config(&self) -> &SignalConfig {
        &self.config
    }

    /// Filter state, for inspection
    pub fn state(&self) -> &ConditionerState {
        &self.state
    }

    /// Change the sensitivity without resetting the filter
    pub fn set_sensitivity(&mut self, sensitivity: f32) {
        if sensitivity.is_finite() {
            self.config.sensitivity = sensitivity;
        }
    }

    /// Forget everything learned so far
    pub fn reset(&mut self) {
        self.state = ConditionerState::default();
        self.beat_pending = false;
    }

    /// Feed one integer sample, timestamped with the injected clock
    pub fn ingest(&mut self, raw_level: i64) -> Option<SensorFrame> {
        self.ingest_value(raw_level as f64)
    }

    /// Feed one decoded sample, timestamped with the injected clock
    pub fn ingest_value(&mut self, raw_level: f64) -> Option<SensorFrame> {
        let now = self.clock.now_ms();
        self.ingest_at(raw_level, now)
    }

    /// Feed one text line as read from a serial port. Lines that do not
    /// parse as a finite number are dropped.
    pub fn ingest_line(&mut self, line: &str) -> Option<SensorFrame> {
        match line.trim().parse::<f64>() {
            Ok(value) => self.ingest_value(value),
            Err(_) => {
                trace!("Dropping non-numeric sample {:?}", line);
                None
            }
        }
    }

    /// Feed one sample observed at `now_ms`.
    ///
    /// Non-finite samples are dropped without touching the state.
    pub fn ingest_at(&mut self, raw_level: f64, now_ms: u64) -> Option<SensorFrame> {
        if !raw_level.is_finite() {
            trace!("Dropping non-finite sample");
            return None;
        }
        let cfg = &self.config;
        let level = raw_level.clamp(cfg.min_level, cfg.max_level);
        let st = &mut self.state;

        st.baseline = if st.baseline == 0.0 {
            level
        } else {
            st.baseline * (1.0 - cfg.baseline_alpha) + level * cfg.baseline_alpha
        };

        let dev = (level - st.baseline).max(0.0);
        st.peak = dev.max(st.peak * cfg.peak_decay + cfg.peak_floor_epsilon);

        let norm = (dev / st.peak.max(1.0)).clamp(0.0, 1.0).powf(cfg.gamma);
        st.smoothed = st.smoothed * cfg.smoothing + norm * (1.0 - cfg.smoothing);

        // Debounce against the last *published* beat so that output frames
        // never carry two beats inside one cooldown window.
        let cooled_down = st
            .last_beat_at
            .map_or(true, |t| now_ms.saturating_sub(t) >= cfg.beat_cooldown_ms);
        if cooled_down && st.smoothed as f32 > cfg.beat_threshold() {
            self.beat_pending = true;
        }

        if let Some(last) = st.last_emit {
            if now_ms.saturating_sub(last) < cfg.min_emit_interval_ms() {
                return None;
            }
        }
        st.last_emit = Some(now_ms);

        let beat = std::mem::take(&mut self.beat_pending);
        if beat {
            st.last_beat_at = Some(now_ms);
            trace!("Beat at {} (energy {:.3})", now_ms, st.smoothed);
        }

        Some(SensorFrame {
            energy: (st.smoothed as f32).clamp(0.0, 1.0),
            beat,
        })
    }
}
