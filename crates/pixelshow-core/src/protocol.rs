//! Broadcast wire protocol.
//!
//! Every message on the bus is an [`Envelope`] tagged with an event name:
//!
//! | Event    | Payload |
//! |----------|---------|
//! | `cmd`    | `{type: "effect", startAt?, payload}`, `{type: "stop"}`, `{type: "sound", id}`, `{type: "flash", on?}` |
//! | `mode`   | `{audioReactive: bool}` (`music` accepted as an alias) |
//! | `sensor` | `{energy, beat}` (`norm`/`clap` accepted as aliases) |
//!
//! Payloads are validated here, once, at the boundary. Anything that does
//! not match decodes to [`Inbound::Ignored`] instead of an error: a device
//! must never stop rendering because of a malformed message.

use crate::color::Color;
use crate::effect::{EffectCommand, EffectKind, ModeFlag};
use crate::error::Result;
use crate::signal::SensorFrame;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::debug;

/// Broadcast topics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topic {
    /// Effect, stop, sound and flash commands
    Cmd,
    /// Audio-reactive mode toggle
    Mode,
    /// Conditioned sensor frames
    Sensor,
}

impl Topic {
    /// Event name on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cmd => "cmd",
            Self::Mode => "mode",
            Self::Sensor => "sensor",
        }
    }

    /// Parse an event name
    pub fn from_event(event: &str) -> Option<Topic> {
        match event {
            "cmd" => Some(Self::Cmd),
            "mode" => Some(Self::Mode),
            "sensor" => Some(Self::Sensor),
            _ => None,
        }
    }
}

/// A broadcast message as carried by the transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Event name (see [`Topic`])
    pub event: String,
    /// Loosely typed JSON payload
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    /// Wrap a payload for a topic
    pub fn new(topic: Topic, payload: Value) -> Self {
        Self {
            event: topic.as_str().to_string(),
            payload,
        }
    }

    /// Known topic of this envelope, if any
    pub fn topic(&self) -> Option<Topic> {
        Topic::from_event(&self.event)
    }
}

fn default_intensity() -> f64 {
    1.0
}

/// Effect parameters as sent on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectPayload {
    /// Effect family
    pub effect: EffectKind,
    /// `[color_a, color_b]`
    pub colors: [Color; 2],
    /// Period in milliseconds
    #[serde(rename = "speedMs")]
    pub speed_ms: f64,
    /// Intensity, 0.1 - 1
    #[serde(default = "default_intensity")]
    pub intensity: f64,
}

impl EffectPayload {
    /// Build a clamped command
    pub fn to_command(&self, start_at: Option<u64>) -> EffectCommand {
        let period = self.speed_ms.clamp(0.0, u32::MAX as f64) as u32;
        let cmd = EffectCommand::new(
            self.effect,
            self.colors[0],
            self.colors[1],
            period,
            self.intensity as f32,
        );
        match start_at {
            Some(at) => cmd.with_start_at(at),
            None => cmd,
        }
    }
}

impl From<&EffectCommand> for EffectPayload {
    fn from(cmd: &EffectCommand) -> Self {
        Self {
            effect: cmd.kind(),
            colors: [cmd.color_a(), cmd.color_b()],
            speed_ms: cmd.period_ms() as f64,
            intensity: cmd.intensity() as f64,
        }
    }
}

/// Clip ids arrive as numbers or numeric strings; anything else is `None`
fn clip_id<'de, D>(deserializer: D) -> std::result::Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(parse_clip_id))
}

fn parse_clip_id(value: &Value) -> Option<u32> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    (n.is_finite() && n >= 1.0 && n.fract() == 0.0 && n <= u32::MAX as f64).then_some(n as u32)
}

/// Nested clip id, `{type: "sound", payload: {id}}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoundPayload {
    /// Clip id
    #[serde(default, deserialize_with = "clip_id")]
    pub id: Option<u32>,
}

/// Payload of the `cmd` topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CmdMessage {
    /// Start (or schedule) an effect
    Effect {
        /// Absolute start time in ms since the Unix epoch
        #[serde(rename = "startAt", default, skip_serializing_if = "Option::is_none")]
        start_at: Option<f64>,
        /// Effect parameters
        payload: EffectPayload,
    },
    /// Return to idle
    Stop,
    /// Play a preloaded clip
    Sound {
        /// Clip id
        #[serde(
            default,
            deserialize_with = "clip_id",
            skip_serializing_if = "Option::is_none"
        )]
        id: Option<u32>,
        /// Alternative nesting of the clip id
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<SoundPayload>,
    },
    /// Drive the indicator directly; toggles when `on` is absent
    Flash {
        /// Desired indicator state
        #[serde(default, skip_serializing_if = "Option::is_none")]
        on: Option<bool>,
    },
    /// Any other `type`
    #[serde(other)]
    Unknown,
}

/// Payload of the `mode` topic
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModeMessage {
    /// Audio-reactive overlay enabled
    #[serde(rename = "audioReactive", alias = "music", default)]
    pub audio_reactive: bool,
}

/// Payload of the `sensor` topic
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorMessage {
    /// Normalized energy
    #[serde(alias = "norm")]
    pub energy: f64,
    /// Beat detected
    #[serde(alias = "clap", default)]
    pub beat: bool,
}

/// Clip played when a sound command carries no usable id
pub const DEFAULT_CLIP_ID: u32 = 1;

/// A validated inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Start or schedule an effect
    Effect(EffectCommand),
    /// Return to idle
    Stop,
    /// Play a clip
    Sound {
        /// Clip id, never zero
        clip: u32,
    },
    /// Drive the indicator directly
    Flash {
        /// Desired state, `None` toggles
        on: Option<bool>,
    },
    /// Mode toggle
    Mode(ModeFlag),
    /// Sensor frame
    Sensor(SensorFrame),
    /// Unknown topic, unknown kind or malformed payload
    Ignored,
}

/// Validate an envelope. Never fails.
pub fn decode(envelope: &Envelope) -> Inbound {
    let Some(topic) = envelope.topic() else {
        debug!("Ignoring message with unknown event {:?}", envelope.event);
        return Inbound::Ignored;
    };

    let decoded = match topic {
        Topic::Cmd => serde_json::from_value::<CmdMessage>(envelope.payload.clone())
            .map(decode_cmd),
        Topic::Mode => {
            serde_json::from_value::<ModeMessage>(envelope.payload.clone()).map(|m| {
                Inbound::Mode(ModeFlag {
                    audio_reactive: m.audio_reactive,
                })
            })
        }
        Topic::Sensor => {
            serde_json::from_value::<SensorMessage>(envelope.payload.clone()).map(|s| {
                let energy = if s.energy.is_finite() {
                    s.energy.clamp(0.0, 1.0) as f32
                } else {
                    0.0
                };
                Inbound::Sensor(SensorFrame {
                    energy,
                    beat: s.beat,
                })
            })
        }
    };

    decoded.unwrap_or_else(|e| {
        debug!("Ignoring malformed {} payload: {}", topic.as_str(), e);
        Inbound::Ignored
    })
}

fn decode_cmd(msg: CmdMessage) -> Inbound {
    match msg {
        CmdMessage::Effect { start_at, payload } => {
            let start_at = start_at
                .filter(|t| t.is_finite() && *t > 0.0)
                .map(|t| t as u64);
            Inbound::Effect(payload.to_command(start_at))
        }
        CmdMessage::Stop => Inbound::Stop,
        CmdMessage::Sound { id, payload } => {
            let clip = id
                .or(payload.and_then(|p| p.id))
                .filter(|id| *id != 0)
                .unwrap_or(DEFAULT_CLIP_ID);
            Inbound::Sound { clip }
        }
        CmdMessage::Flash { on } => Inbound::Flash { on },
        CmdMessage::Unknown => {
            debug!("Ignoring unknown command type");
            Inbound::Ignored
        }
    }
}

fn cmd_envelope(msg: &CmdMessage) -> Result<Envelope> {
    Ok(Envelope::new(Topic::Cmd, serde_json::to_value(msg)?))
}

/// `cmd` envelope starting or scheduling `cmd`
pub fn encode_effect(cmd: &EffectCommand) -> Result<Envelope> {
    cmd_envelope(&CmdMessage::Effect {
        start_at: cmd.start_at().map(|t| t as f64),
        payload: EffectPayload::from(cmd),
    })
}

/// `cmd` envelope stopping every device
pub fn encode_stop() -> Result<Envelope> {
    cmd_envelope(&CmdMessage::Stop)
}

/// `cmd` envelope playing clip `id`
pub fn encode_sound(id: u32) -> Result<Envelope> {
    cmd_envelope(&CmdMessage::Sound {
        id: Some(id),
        payload: None,
    })
}

/// `cmd` envelope driving the indicator
pub fn encode_flash(on: Option<bool>) -> Result<Envelope> {
    cmd_envelope(&CmdMessage::Flash { on })
}

/// `mode` envelope
pub fn encode_mode(flag: ModeFlag) -> Result<Envelope> {
    let msg = ModeMessage {
        audio_reactive: flag.audio_reactive,
    };
    Ok(Envelope::new(Topic::Mode, serde_json::to_value(msg)?))
}

/// `sensor` envelope
pub fn encode_sensor(frame: SensorFrame) -> Result<Envelope> {
    let msg = SensorMessage {
        energy: frame.energy as f64,
        beat: frame.beat,
    };
    Ok(Envelope::new(Topic::Sensor, serde_json::to_value(msg)?))
}
