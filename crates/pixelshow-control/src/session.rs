//! Controller-side session coordination.
//!
//! The [`SessionCoordinator`] owns at most one [`ControllerSession`] at a
//! time. Joining another event tears the current subscription down first,
//! so commands can never leak into the previous session.

use crate::bus::{BroadcastBus, PresenceMeta, PresenceState, Role, Subscription};
use crate::error::{ControlError, Result};
use pixelshow_core::protocol;
use pixelshow_core::{Clock, EffectCommand, ModeFlag, SensorFrame};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// Default bound on a single publish
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(2);

/// Membership of a session, rebuilt from full presence snapshots
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresenceRoster {
    members: HashMap<String, Vec<PresenceMeta>>,
}

impl PresenceRoster {
    /// Roster from a presence snapshot
    pub fn from_snapshot(snapshot: &PresenceState) -> Self {
        Self {
            members: snapshot.clone(),
        }
    }

    /// Connected count: tracked metas summed over all keys
    pub fn count(&self) -> usize {
        self.members.values().map(Vec::len).sum()
    }

    /// Connected count for one role
    pub fn count_role(&self, role: Role) -> usize {
        self.members
            .values()
            .flatten()
            .filter(|meta| meta.role == role)
            .count()
    }

    /// Metadata tracked under a key
    pub fn get(&self, key: &str) -> Option<&[PresenceMeta]> {
        self.members.get(key).map(Vec::as_slice)
    }

    /// Presence keys
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.members.keys().map(String::as_str)
    }
}

/// The controller's handle on one event channel
pub struct ControllerSession {
    subscription: Subscription,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for ControllerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerSession")
            .field("subscription", &self.subscription)
            .finish_non_exhaustive()
    }
}

impl ControllerSession {
    /// Event id
    pub fn event_id(&self) -> &str {
        self.subscription.event_id()
    }

    /// Presence key of this controller
    pub fn key(&self) -> &str {
        self.subscription.key()
    }

    /// Broadcast an effect, starting on receipt unless it carries `start_at`
    pub async fn send_effect(&self, cmd: &EffectCommand) -> Result<()> {
        info!("Sending {} to {}", cmd.kind(), self.event_id());
        self.subscription.send(protocol::encode_effect(cmd)?).await
    }

    /// Broadcast an effect that every device starts `lead` from now
    pub async fn send_effect_in(&self, cmd: &EffectCommand, lead: Duration) -> Result<()> {
        let start_at = self.clock.now_ms() + lead.as_millis() as u64;
        self.send_effect(&cmd.clone().with_start_at(start_at)).await
    }

    /// Return every device to idle
    pub async fn send_stop(&self) -> Result<()> {
        info!("Stopping show on {}", self.event_id());
        self.subscription.send(protocol::encode_stop()?).await
    }

    /// Toggle audio-reactive mode
    pub async fn set_mode(&self, flag: ModeFlag) -> Result<()> {
        info!("Audio-reactive mode {}", if flag.audio_reactive { "on" } else { "off" });
        self.subscription.send(protocol::encode_mode(flag)?).await
    }

    /// Relay a conditioned sensor frame
    pub async fn publish_sensor_frame(&self, frame: SensorFrame) -> Result<()> {
        self.subscription.send(protocol::encode_sensor(frame)?).await
    }

    /// Ask every device to play a clip
    pub async fn play_clip(&self, id: u32) -> Result<()> {
        self.subscription.send(protocol::encode_sound(id)?).await
    }

    /// Drive every device's indicator; `None` toggles
    pub async fn send_flash(&self, on: Option<bool>) -> Result<()> {
        self.subscription.send(protocol::encode_flash(on)?).await
    }

    /// Announce this connection in the roster under `role`
    pub async fn track_presence(&self, role: Role) -> Result<()> {
        self.subscription
            .track(PresenceMeta {
                role,
                phase: None,
                t: self.clock.now_ms(),
            })
            .await
    }

    /// Current roster
    pub fn roster(&self) -> PresenceRoster {
        PresenceRoster::from_snapshot(&self.subscription.presence())
    }

    /// Number of connections in the session
    pub fn get_connected_count(&self) -> usize {
        self.roster().count()
    }

    /// Presence snapshots as they arrive
    pub fn roster_updates(&self) -> watch::Receiver<PresenceState> {
        self.subscription.presence_updates()
    }
}

/// Creates, replaces and releases the controller's session
pub struct SessionCoordinator {
    bus: Arc<dyn BroadcastBus>,
    clock: Arc<dyn Clock>,
    key: String,
    publish_timeout: Duration,
    session: Option<ControllerSession>,
}

impl SessionCoordinator {
    /// Coordinator with a fresh `admin-…` presence key
    pub fn new(bus: Arc<dyn BroadcastBus>, clock: Arc<dyn Clock>) -> Self {
        Self {
            bus,
            clock,
            key: format!("admin-{}", uuid::Uuid::new_v4().simple()),
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
            session: None,
        }
    }

    /// Override the publish timeout
    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    /// Presence key used for every session of this coordinator
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Join `event_id`, leaving the current session first
    pub async fn create_or_join_session(&mut self, event_id: &str) -> Result<&ControllerSession> {
        self.leave().await;

        let subscription = Subscription::open(
            self.bus.clone(),
            event_id,
            &self.key,
            self.publish_timeout,
        )
        .await?;
        info!("Controller joined {}", event_id);

        let session = self.session.insert(ControllerSession {
            subscription,
            clock: self.clock.clone(),
        });
        Ok(&*session)
    }

    /// The active session
    pub fn session(&self) -> Result<&ControllerSession> {
        self.session.as_ref().ok_or(ControlError::NotJoined)
    }

    /// Release the active session, if any
    pub async fn leave(&mut self) {
        if let Some(session) = self.session.take() {
            let event_id = session.event_id().to_string();
            if let Err(e) = session.subscription.unsubscribe().await {
                warn!("Leaving {} failed: {}", event_id, e);
            }
        }
    }
}
