mod common;

use async_trait::async_trait;
use common::*;
use pixelshow_control::bus::{channel_for, BusLink};
use pixelshow_control::{
    run_sensor_bridge, BridgeStats, BroadcastBus, ControlError, InMemoryBus, PresenceMeta, Role,
    SessionCoordinator,
};
use pixelshow_core::{Color, EffectCommand, Envelope, ManualClock, SignalConditioner, SignalConfig};
use std::sync::Arc;
use std::time::Duration;

/// Bus whose publishes never complete
struct HangingBus {
    inner: InMemoryBus,
}

#[async_trait]
impl BroadcastBus for HangingBus {
    async fn join(&self, channel: &str, key: &str) -> pixelshow_control::Result<BusLink> {
        self.inner.join(channel, key).await
    }

    async fn publish(
        &self,
        _channel: &str,
        _from: &str,
        _envelope: Envelope,
    ) -> pixelshow_control::Result<()> {
        std::future::pending().await
    }

    async fn track(
        &self,
        channel: &str,
        key: &str,
        meta: PresenceMeta,
    ) -> pixelshow_control::Result<()> {
        self.inner.track(channel, key, meta).await
    }

    async fn leave(&self, channel: &str, key: &str) -> pixelshow_control::Result<()> {
        self.inner.leave(channel, key).await
    }
}

fn coordinator(bus: &Arc<InMemoryBus>, clock: &ManualClock) -> SessionCoordinator {
    SessionCoordinator::new(bus.clone(), Arc::new(clock.clone()))
}

#[tokio::test]
async fn test_operations_need_a_session() {
    let bus = Arc::new(InMemoryBus::new());
    let coordinator = coordinator(&bus, &ManualClock::new(0));
    assert!(matches!(coordinator.session(), Err(ControlError::NotJoined)));
}

#[tokio::test]
async fn test_joining_another_event_releases_the_previous_one() {
    let bus = Arc::new(InMemoryBus::new());
    let mut coordinator = coordinator(&bus, &ManualClock::new(0));

    coordinator.create_or_join_session("A").await.unwrap();
    assert_eq!(bus.subscriber_count(&channel_for("A")), 1);

    let session = coordinator.create_or_join_session("B").await.unwrap();
    assert_eq!(session.event_id(), "B");
    assert_eq!(bus.subscriber_count(&channel_for("A")), 0);
    assert_eq!(bus.subscriber_count(&channel_for("B")), 1);
    assert_eq!(bus.channel_count(), 1);

    // Rejoining the same event still leaves exactly one subscription
    coordinator.create_or_join_session("B").await.unwrap();
    assert_eq!(bus.subscriber_count(&channel_for("B")), 1);

    coordinator.leave().await;
    assert_eq!(bus.subscriber_count(&channel_for("B")), 0);
    assert_eq!(bus.channel_count(), 0);
    assert!(coordinator.session().is_err());
}

#[tokio::test]
async fn test_commands_do_not_leak_into_previous_session() {
    let bus = Arc::new(InMemoryBus::new());
    let clock = ManualClock::new(0);
    let device = join_device(&bus, "client-a", 0, &clock, plain_capabilities()).await;

    let mut coordinator = coordinator(&bus, &clock);
    coordinator.create_or_join_session(EVENT).await.unwrap();
    let session = coordinator.create_or_join_session("OTHER").await.unwrap();
    session
        .send_effect(&EffectCommand::solid(Color::white()))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(device.current_frame().color(), Some(Color::black()));
    device.leave().await;
}

#[tokio::test]
async fn test_cannot_join_when_transport_is_down() {
    let bus = Arc::new(InMemoryBus::new());
    bus.set_offline(true);
    let mut coordinator = coordinator(&bus, &ManualClock::new(0));

    let err = coordinator.create_or_join_session(EVENT).await.unwrap_err();
    assert!(matches!(err, ControlError::CannotJoin { .. }));
    assert!(err.to_string().contains(EVENT));
}

#[tokio::test(start_paused = true)]
async fn test_publish_is_bounded_by_timeout() {
    let bus = Arc::new(HangingBus {
        inner: InMemoryBus::new(),
    });
    let mut coordinator = SessionCoordinator::new(bus, Arc::new(ManualClock::new(0)))
        .with_publish_timeout(Duration::from_millis(50));
    let session = coordinator.create_or_join_session(EVENT).await.unwrap();

    let err = session.send_stop().await.unwrap_err();
    assert!(matches!(err, ControlError::PublishTimeout(d) if d == Duration::from_millis(50)));
}

#[tokio::test]
async fn test_controller_can_announce_itself() {
    let bus = Arc::new(InMemoryBus::new());
    let mut coordinator = coordinator(&bus, &ManualClock::new(42));
    let session = coordinator.create_or_join_session(EVENT).await.unwrap();

    session.track_presence(Role::Bridge).await.unwrap();
    let roster = session.roster();
    assert_eq!(roster.count_role(Role::Bridge), 1);
    assert_eq!(roster.get(session.key()).unwrap()[0].t, 42);
}

#[tokio::test]
async fn test_sensor_bridge_counts_lines() {
    let bus = Arc::new(InMemoryBus::new());
    let clock = ManualClock::new(0);
    let mut coordinator = coordinator(&bus, &clock);
    let session = coordinator.create_or_join_session(EVENT).await.unwrap();
    let mut conditioner =
        SignalConditioner::with_clock(SignalConfig::default(), Arc::new(clock.clone()));

    // The clock never moves, so only the first valid sample passes the throttle
    let input: &[u8] = b"500\nabc\n\n520\n1e999\n";
    let stats = run_sensor_bridge(input, &mut conditioner, session)
        .await
        .unwrap();

    assert_eq!(
        stats,
        BridgeStats {
            lines: 5,
            dropped: 3,
            published: 1,
            failures: 0,
        }
    );
}

#[tokio::test]
async fn test_sensor_bridge_survives_publish_failures() {
    let bus = Arc::new(InMemoryBus::new());
    let clock = ManualClock::new(0);
    let mut coordinator = coordinator(&bus, &clock);
    let session = coordinator.create_or_join_session(EVENT).await.unwrap();
    let mut conditioner =
        SignalConditioner::with_clock(SignalConfig::default(), Arc::new(clock.clone()));

    bus.set_offline(true);
    let input: &[u8] = b"500\n";
    let stats = run_sensor_bridge(input, &mut conditioner, session)
        .await
        .unwrap();
    assert_eq!(stats.published, 0);
    assert_eq!(stats.failures, 1);
}

#[tokio::test]
async fn test_sensor_frames_reach_devices() {
    let bus = Arc::new(InMemoryBus::new());
    let clock = ManualClock::new(0);
    let device = join_device(&bus, "client-a", 0, &clock, plain_capabilities()).await;
    let mut coordinator = coordinator(&bus, &clock);
    let session = coordinator.create_or_join_session(EVENT).await.unwrap();

    session
        .set_mode(pixelshow_core::ModeFlag::audio_reactive())
        .await
        .unwrap();
    session
        .send_effect(&EffectCommand::new(
            pixelshow_core::EffectKind::Solid,
            Color::rgb(255, 0, 0),
            Color::rgb(0, 0, 255),
            500,
            1.0,
        ))
        .await
        .unwrap();

    let mut conditioner =
        SignalConditioner::with_clock(SignalConfig::default(), Arc::new(clock.clone()));
    let input: &[u8] = b"500\n";
    run_sensor_bridge(input, &mut conditioner, session)
        .await
        .unwrap();

    // First frame has zero energy: the overlay shows color_b
    wait_for_frame(&device, |f| f.color() == Some(Color::rgb(0, 0, 255))).await;
    device.leave().await;
}
