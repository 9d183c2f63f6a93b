//! Broadcast bus adapter.
//!
//! A [`BroadcastBus`] is a publish/subscribe transport keyed by channel name
//! plus a presence set per channel. The real transport lives outside this
//! crate; [`memory::InMemoryBus`] implements it in-process.
//!
//! [`Subscription`] is the owned handle a controller or device holds while it
//! is part of a session. Dropping it (or calling
//! [`Subscription::unsubscribe`]) releases the channel.

pub mod memory;

use crate::error::{ControlError, Result};
use async_trait::async_trait;
use pixelshow_core::Envelope;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

pub use memory::InMemoryBus;

/// Who is behind a presence entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A rendering device
    Client,
    /// The show controller
    Admin,
    /// A sensor bridge
    Bridge,
}

/// Metadata tracked for one connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceMeta {
    /// Connection role
    pub role: Role,
    /// Phase offset of a device
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<u32>,
    /// Time the entry was tracked, ms since the Unix epoch
    pub t: u64,
}

/// Full presence state of a channel: key to the metas tracked under it
pub type PresenceState = HashMap<String, Vec<PresenceMeta>>;

/// A message as delivered to subscribers
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Presence key of the publisher
    pub from: String,
    /// The message
    pub envelope: Envelope,
}

/// Receiving ends handed out on join
#[derive(Debug)]
pub struct BusLink {
    /// Broadcast messages of the channel
    pub messages: broadcast::Receiver<Delivery>,
    /// Presence snapshots of the channel
    pub presence: watch::Receiver<PresenceState>,
}

/// Publish/subscribe transport with presence
#[async_trait]
pub trait BroadcastBus: Send + Sync {
    /// Subscribe to a channel
    async fn join(&self, channel: &str, key: &str) -> Result<BusLink>;

    /// Broadcast to every other subscriber of the channel
    async fn publish(&self, channel: &str, from: &str, envelope: Envelope) -> Result<()>;

    /// Announce or update this connection's presence
    async fn track(&self, channel: &str, key: &str, meta: PresenceMeta) -> Result<()>;

    /// Drop this connection's presence
    async fn leave(&self, channel: &str, key: &str) -> Result<()>;
}

/// Channel name of an event
pub fn channel_for(event_id: &str) -> String {
    format!("event:{}", event_id)
}

/// An active subscription to one event channel
pub struct Subscription {
    bus: Arc<dyn BroadcastBus>,
    event_id: String,
    channel: String,
    key: String,
    messages: broadcast::Receiver<Delivery>,
    presence: watch::Receiver<PresenceState>,
    publish_timeout: Duration,
}

impl Subscription {
    /// Subscribe to the channel of `event_id` under presence key `key`.
    ///
    /// This is the only fatal bus failure: any error is reported as
    /// [`ControlError::CannotJoin`].
    pub async fn open(
        bus: Arc<dyn BroadcastBus>,
        event_id: &str,
        key: &str,
        publish_timeout: Duration,
    ) -> Result<Self> {
        let channel = channel_for(event_id);
        let link = bus
            .join(&channel, key)
            .await
            .map_err(|e| ControlError::CannotJoin {
                event_id: event_id.to_string(),
                reason: e.to_string(),
            })?;
        info!("Subscribed to {} as {}", channel, key);

        Ok(Self {
            bus,
            event_id: event_id.to_string(),
            channel,
            key: key.to_string(),
            messages: link.messages,
            presence: link.presence,
            publish_timeout,
        })
    }

    /// Event this subscription belongs to
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    /// Presence key of this connection
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Publish, bounded by the publish timeout
    pub async fn send(&self, envelope: Envelope) -> Result<()> {
        let event = envelope.event.clone();
        match tokio::time::timeout(
            self.publish_timeout,
            self.bus.publish(&self.channel, &self.key, envelope),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                warn!("Publishing {} on {} timed out", event, self.channel);
                Err(ControlError::PublishTimeout(self.publish_timeout))
            }
        }
    }

    /// Announce presence
    pub async fn track(&self, meta: PresenceMeta) -> Result<()> {
        self.bus.track(&self.channel, &self.key, meta).await
    }

    /// Next message from another connection, `None` once the channel closed.
    ///
    /// Cancel-safe.
    pub async fn recv(&mut self) -> Option<Envelope> {
        loop {
            match self.messages.recv().await {
                Ok(delivery) if delivery.from == self.key => continue,
                Ok(delivery) => return Some(delivery.envelope),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("{} lagged, skipped {} messages", self.key, skipped);
                    continue;
                }
                Err(RecvError::Closed) => {
                    debug!("Channel {} closed", self.channel);
                    return None;
                }
            }
        }
    }

    /// Latest presence snapshot
    pub fn presence(&self) -> PresenceState {
        self.presence.borrow().clone()
    }

    /// Presence updates, for waiting on roster changes
    pub fn presence_updates(&self) -> watch::Receiver<PresenceState> {
        self.presence.clone()
    }

    /// Leave the channel, dropping presence and the subscription
    pub async fn unsubscribe(self) -> Result<()> {
        let Subscription {
            bus,
            channel,
            key,
            messages,
            presence,
            ..
        } = self;
        info!("Leaving {} as {}", channel, key);
        // Receivers are released before leaving
        drop(messages);
        drop(presence);
        bus.leave(&channel, &key).await
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .field("key", &self.key)
            .finish()
    }
}
