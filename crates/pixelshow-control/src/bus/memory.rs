//! In-process broadcast bus.
//!
//! One hub per channel: a tokio broadcast sender for messages and a watch
//! sender for presence. Used by the local simulation and by tests; it can be
//! switched offline to exercise transport failures.

use super::{BroadcastBus, BusLink, Delivery, PresenceMeta, PresenceState};
use crate::error::{ControlError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use pixelshow_core::Envelope;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{broadcast, watch};
use tracing::{debug, trace};

/// Default per-channel message buffer
pub const DEFAULT_CAPACITY: usize = 256;

struct Hub {
    messages: broadcast::Sender<Delivery>,
    presence: watch::Sender<PresenceState>,
}

impl Hub {
    fn new(capacity: usize) -> Self {
        let (messages, _) = broadcast::channel(capacity);
        let (presence, _) = watch::channel(PresenceState::new());
        Self { messages, presence }
    }
}

/// Broadcast bus living inside this process
pub struct InMemoryBus {
    hubs: Mutex<HashMap<String, Hub>>,
    capacity: usize,
    offline: AtomicBool,
}

impl InMemoryBus {
    /// Bus with the default buffer size
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Bus buffering `capacity` messages per channel
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            hubs: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            offline: AtomicBool::new(false),
        }
    }

    /// Make every operation fail until switched back online
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of live subscriptions on a channel
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.hubs
            .lock()
            .get(channel)
            .map_or(0, |hub| hub.messages.receiver_count())
    }

    /// Current presence of a channel
    pub fn presence(&self, channel: &str) -> PresenceState {
        self.hubs
            .lock()
            .get(channel)
            .map(|hub| hub.presence.borrow().clone())
            .unwrap_or_default()
    }

    /// Number of channels currently held open
    pub fn channel_count(&self) -> usize {
        self.hubs.lock().len()
    }

    /// Tear a channel down; its subscribers observe the close
    pub fn close(&self, channel: &str) {
        if self.hubs.lock().remove(channel).is_some() {
            debug!("Closed channel {}", channel);
        }
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(ControlError::Transport("bus offline".to_string()))
        } else {
            Ok(())
        }
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BroadcastBus for InMemoryBus {
    async fn join(&self, channel: &str, key: &str) -> Result<BusLink> {
        self.check_online()?;
        let mut hubs = self.hubs.lock();
        let hub = hubs
            .entry(channel.to_string())
            .or_insert_with(|| Hub::new(self.capacity));
        trace!("{} joined {}", key, channel);
        Ok(BusLink {
            messages: hub.messages.subscribe(),
            presence: hub.presence.subscribe(),
        })
    }

    async fn publish(&self, channel: &str, from: &str, envelope: Envelope) -> Result<()> {
        self.check_online()?;
        let hubs = self.hubs.lock();
        if let Some(hub) = hubs.get(channel) {
            // No receivers is not an error for a broadcast
            let _ = hub.messages.send(Delivery {
                from: from.to_string(),
                envelope,
            });
        }
        Ok(())
    }

    async fn track(&self, channel: &str, key: &str, meta: PresenceMeta) -> Result<()> {
        self.check_online()?;
        let hubs = self.hubs.lock();
        let hub = hubs
            .get(channel)
            .ok_or_else(|| ControlError::Transport(format!("{} is not joined", channel)))?;
        hub.presence.send_modify(|state| {
            state.insert(key.to_string(), vec![meta]);
        });
        Ok(())
    }

    async fn leave(&self, channel: &str, key: &str) -> Result<()> {
        self.check_online()?;
        let mut hubs = self.hubs.lock();
        let idle = match hubs.get(channel) {
            Some(hub) => {
                hub.presence.send_if_modified(|state| state.remove(key).is_some());
                hub.messages.receiver_count() == 0 && hub.presence.borrow().is_empty()
            }
            None => false,
        };
        if idle {
            hubs.remove(channel);
            debug!("Released idle channel {}", channel);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Role;
    use pixelshow_core::Topic;
    use serde_json::json;

    fn meta(role: Role) -> PresenceMeta {
        PresenceMeta {
            role,
            phase: None,
            t: 0,
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber() {
        let bus = InMemoryBus::new();
        let mut a = bus.join("event:x", "a").await.unwrap();
        let mut b = bus.join("event:x", "b").await.unwrap();

        let env = Envelope::new(Topic::Cmd, json!({"type": "stop"}));
        bus.publish("event:x", "c", env.clone()).await.unwrap();

        assert_eq!(a.messages.recv().await.unwrap().envelope, env);
        assert_eq!(b.messages.recv().await.unwrap().from, "c");
    }

    #[tokio::test]
    async fn test_channels_are_isolated() {
        let bus = InMemoryBus::new();
        let mut other = bus.join("event:y", "a").await.unwrap();
        bus.join("event:x", "b").await.unwrap();

        bus.publish("event:x", "c", Envelope::new(Topic::Cmd, json!({})))
            .await
            .unwrap();
        assert!(other.messages.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_presence_track_and_leave() {
        let bus = InMemoryBus::new();
        let link = bus.join("event:x", "a").await.unwrap();
        bus.track("event:x", "a", meta(Role::Client)).await.unwrap();
        bus.track("event:x", "a", meta(Role::Client)).await.unwrap();
        assert_eq!(link.presence.borrow().len(), 1);

        bus.leave("event:x", "a").await.unwrap();
        assert!(bus.presence("event:x").is_empty());
    }

    #[tokio::test]
    async fn test_last_leave_releases_channel() {
        let bus = InMemoryBus::new();
        let a = bus.join("event:x", "a").await.unwrap();
        let b = bus.join("event:x", "b").await.unwrap();
        bus.track("event:x", "a", meta(Role::Client)).await.unwrap();
        bus.track("event:x", "b", meta(Role::Client)).await.unwrap();

        drop(a);
        bus.leave("event:x", "a").await.unwrap();
        assert_eq!(bus.channel_count(), 1);

        drop(b);
        bus.leave("event:x", "b").await.unwrap();
        assert_eq!(bus.channel_count(), 0);

        // Joining again starts from a fresh hub
        bus.join("event:x", "c").await.unwrap();
        assert_eq!(bus.channel_count(), 1);
        assert!(bus.presence("event:x").is_empty());
    }

    #[tokio::test]
    async fn test_channel_kept_while_presence_remains() {
        let bus = InMemoryBus::new();
        drop(bus.join("event:x", "a").await.unwrap());
        bus.track("event:x", "a", meta(Role::Client)).await.unwrap();
        drop(bus.join("event:x", "b").await.unwrap());

        bus.leave("event:x", "b").await.unwrap();
        assert_eq!(bus.channel_count(), 1);
        assert_eq!(bus.presence("event:x").len(), 1);
    }

    #[tokio::test]
    async fn test_offline_bus_fails() {
        let bus = InMemoryBus::new();
        bus.set_offline(true);
        assert!(matches!(
            bus.join("event:x", "a").await,
            Err(ControlError::Transport(_))
        ));
        bus.set_offline(false);
        assert!(bus.join("event:x", "a").await.is_ok());
    }

    #[tokio::test]
    async fn test_subscriber_count_drops_with_receiver() {
        let bus = InMemoryBus::new();
        let link = bus.join("event:x", "a").await.unwrap();
        assert_eq!(bus.subscriber_count("event:x"), 1);
        drop(link);
        assert_eq!(bus.subscriber_count("event:x"), 0);
    }
}
