//! Hardware capabilities of a device.
//!
//! The indicator (camera torch) and clip playback are best effort. Calls are
//! fire-and-forget from the render loop; a failure is logged once and the
//! capability is treated as degraded instead of being retried every frame.

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Capability failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    /// Not present on this device
    #[error("Capability unavailable: {0}")]
    Unavailable(String),

    /// Present but the call failed
    #[error("Capability failed: {0}")]
    Failed(String),
}

/// A light next to the screen
pub trait Indicator: Send + Sync {
    /// Switch the indicator. Must not block.
    fn set_indicator(&self, on: bool) -> Result<(), CapabilityError>;
}

/// Playback of preloaded clips
pub trait ClipPlayer: Send + Sync {
    /// Start clip `id`. Must not block.
    fn play_clip(&self, id: u32) -> Result<(), CapabilityError>;
}

/// Indicator that does nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopIndicator;

impl Indicator for NoopIndicator {
    fn set_indicator(&self, _on: bool) -> Result<(), CapabilityError> {
        Ok(())
    }
}

/// Indicator of a device without a torch
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableIndicator;

impl Indicator for UnavailableIndicator {
    fn set_indicator(&self, _on: bool) -> Result<(), CapabilityError> {
        Err(CapabilityError::Unavailable("no torch".to_string()))
    }
}

/// Clip player that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopClipPlayer;

impl ClipPlayer for NoopClipPlayer {
    fn play_clip(&self, id: u32) -> Result<(), CapabilityError> {
        debug!("Clip {} requested, no player attached", id);
        Ok(())
    }
}

/// The capabilities handed to a device
#[derive(Clone)]
pub struct Capabilities {
    /// Torch
    pub indicator: Arc<dyn Indicator>,
    /// Audio
    pub clips: Arc<dyn ClipPlayer>,
}

impl Capabilities {
    /// Bundle two capabilities
    pub fn new(indicator: Arc<dyn Indicator>, clips: Arc<dyn ClipPlayer>) -> Self {
        Self { indicator, clips }
    }

    /// Play a clip, logging failures
    pub fn play_clip(&self, id: u32) {
        if let Err(e) = self.clips.play_clip(id) {
            warn!("Clip {} not played: {}", id, e);
        }
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::new(Arc::new(NoopIndicator), Arc::new(NoopClipPlayer))
    }
}

/// Forwards indicator changes to the capability, once per change
pub struct IndicatorDriver {
    indicator: Arc<dyn Indicator>,
    last: Option<bool>,
    degraded: bool,
}

impl IndicatorDriver {
    /// Wrap an indicator
    pub fn new(indicator: Arc<dyn Indicator>) -> Self {
        Self {
            indicator,
            last: None,
            degraded: false,
        }
    }

    /// The indicator failed and is no longer driven
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Request a state; repeated requests for the same state are dropped
    pub fn apply(&mut self, on: bool) {
        if self.degraded || self.last == Some(on) {
            return;
        }
        match self.indicator.set_indicator(on) {
            Ok(()) => self.last = Some(on),
            Err(e) => {
                warn!("Indicator degraded, using visual fallback: {}", e);
                self.degraded = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<bool>>,
    }

    impl Indicator for Recorder {
        fn set_indicator(&self, on: bool) -> Result<(), CapabilityError> {
            self.calls.lock().push(on);
            Ok(())
        }
    }

    #[test]
    fn test_driver_forwards_only_changes() {
        let recorder = Arc::new(Recorder::default());
        let mut driver = IndicatorDriver::new(recorder.clone());
        for on in [false, false, true, true, true, false] {
            driver.apply(on);
        }
        assert_eq!(*recorder.calls.lock(), vec![false, true, false]);
        assert!(!driver.is_degraded());
    }

    #[test]
    fn test_driver_degrades_on_failure() {
        let mut driver = IndicatorDriver::new(Arc::new(UnavailableIndicator));
        driver.apply(true);
        assert!(driver.is_degraded());
        // Further requests are swallowed
        driver.apply(false);
        assert!(driver.is_degraded());
    }
}
