//! `lunar-types` – shared data model for the lunar rover bridge.
//!
//! Everything that crosses a crate boundary lives here: bus [`Topic`]s and
//! [`Envelope`]s, the client command record ([`CommandPayload`]), the session
//! lifecycle signals, and the workspace-wide [`BridgeError`].

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Topics
// ---------------------------------------------------------------------------

/// Opaque pub/sub topic identifier.
///
/// Subscribers compare topics by exact byte equality, never by prefix.
/// Topics are configured as text, so the bridge only names UTF-8 topics;
/// an incoming frame whose topic bytes are not valid UTF-8 can never match
/// one and is discarded like any other foreign topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The four well-known topics of a rover session.
///
/// `telemetry` is the only topic ever subscribed to; the other three are
/// publish-only. All four must be UTF-8 (see [`Topic`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicSet {
    /// Platform → bridge sensor stream.
    #[serde(default = "default_telemetry_topic")]
    pub telemetry: Topic,
    /// Bridge → platform `{v, w}` velocity commands.
    #[serde(default = "default_motion_topic")]
    pub motion: Topic,
    /// Bridge → platform `{alpha}` tilt commands.
    #[serde(default = "default_tilt_topic")]
    pub tilt: Topic,
    /// Bridge → platform `{state: "run" | "stop"}` lifecycle signals.
    #[serde(default = "default_setup_topic")]
    pub setup: Topic,
}

fn default_telemetry_topic() -> Topic {
    Topic::new("lunar-rover-sensors")
}
fn default_motion_topic() -> Topic {
    Topic::new("motors-commands")
}
fn default_tilt_topic() -> Topic {
    Topic::new("tilt-motor-command")
}
fn default_setup_topic() -> Topic {
    Topic::new("motors-setup")
}

impl Default for TopicSet {
    fn default() -> Self {
        Self {
            telemetry: default_telemetry_topic(),
            motion: default_motion_topic(),
            tilt: default_tilt_topic(),
            setup: default_setup_topic(),
        }
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// A two-part bus message: `(topic, payload)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub topic: Topic,
    pub payload: Bytes,
}

impl Envelope {
    pub fn new(topic: Topic, payload: impl Into<Bytes>) -> Self {
        Self {
            topic,
            payload: payload.into(),
        }
    }

    /// Validate a raw multi-part message against a subscription `filter`.
    ///
    /// Returns `None` unless the message has exactly two frames and the first
    /// frame equals `filter` byte-for-byte.
    pub fn from_frames(mut frames: Vec<Bytes>, filter: &Topic) -> Option<Self> {
        if frames.len() != 2 || frames[0].as_ref() != filter.as_bytes() {
            return None;
        }
        let payload = frames.pop()?;
        Some(Self {
            topic: filter.clone(),
            payload,
        })
    }

    /// Split into the `[topic, payload]` frames sent on the wire.
    pub fn into_frames(self) -> Vec<Bytes> {
        vec![Bytes::from(self.topic.0), self.payload]
    }
}

// ---------------------------------------------------------------------------
// Client commands
// ---------------------------------------------------------------------------

/// A decoded client command record.
///
/// Only `v`, `w` and `alpha` carry meaning; every other field is kept so the
/// motion publish forwards the record as the client sent it.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandPayload {
    fields: Map<String, Value>,
}

impl CommandPayload {
    /// Decode one client text message.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::CommandDecode`] when `text` is not JSON or is
    /// JSON but not an object.
    pub fn parse(text: &str) -> Result<Self, BridgeError> {
        match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(fields)) => Ok(Self { fields }),
            Ok(other) => Err(BridgeError::CommandDecode(format!(
                "expected a JSON object, got {}",
                json_kind(&other)
            ))),
            Err(e) => Err(BridgeError::CommandDecode(e.to_string())),
        }
    }

    /// `true` when the record carries `v`, which triggers a motion publish.
    pub fn has_velocity(&self) -> bool {
        self.fields.contains_key("v")
    }

    pub fn linear_velocity(&self) -> Option<f64> {
        self.fields.get("v").and_then(Value::as_f64)
    }

    pub fn angular_velocity(&self) -> Option<f64> {
        self.fields.get("w").and_then(Value::as_f64)
    }

    /// The tilt command carried by this record, if `alpha` is present.
    pub fn tilt(&self) -> Option<TiltCommand> {
        self.fields.get("alpha").map(|alpha| TiltCommand {
            alpha: alpha.clone(),
        })
    }

    /// Re-encode the whole record for the motion-command topic.
    pub fn encode(&self) -> Result<Bytes, BridgeError> {
        serde_json::to_vec(&self.fields)
            .map(Bytes::from)
            .map_err(|e| BridgeError::CommandDecode(e.to_string()))
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// `{"alpha": <radians>}` published on the tilt topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TiltCommand {
    pub alpha: Value,
}

impl TiltCommand {
    pub fn radians(alpha: f64) -> Self {
        Self {
            alpha: Value::from(alpha),
        }
    }
}

/// Inclusive magnitude band a platform velocity must fall in, zero aside.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VelocityBand {
    pub min: f64,
    pub max: f64,
}

impl VelocityBand {
    /// `true` for zero (stop) or when `|value|` lies within `[min, max]`.
    pub fn accepts(&self, value: f64) -> bool {
        value == 0.0 || (self.min..=self.max).contains(&value.abs())
    }
}

/// Linear velocity band in m/s.
pub const LINEAR_VELOCITY_BAND: VelocityBand = VelocityBand {
    min: 0.162,
    max: 0.44,
};

/// Angular velocity band in rad/s.
pub const ANGULAR_VELOCITY_BAND: VelocityBand = VelocityBand {
    min: 1.48,
    max: 3.5,
};

// ---------------------------------------------------------------------------
// Session lifecycle
// ---------------------------------------------------------------------------

/// `{"state": "run" | "stop"}` published on the setup topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum SessionSignal {
    Run,
    Stop,
}

/// Lifecycle of one client session. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Active,
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Active => write!(f, "active"),
            SessionState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Default tilt sent when a session starts: 30 degrees.
pub const DEFAULT_TILT_RAD: f64 = std::f64::consts::FRAC_PI_6;

/// Per-session settings shared by every accepted client.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub topics: TopicSet,
    /// Tilt angle published right after the `run` signal.
    pub initial_tilt_rad: f64,
    /// End the session when telemetry stays silent this long. `None` waits
    /// forever.
    pub telemetry_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            topics: TopicSet::default(),
            initial_tilt_rad: DEFAULT_TILT_RAD,
            telemetry_timeout: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Error type shared by every bridge component.
///
/// A client closing its connection is not an error; the direction that saw
/// it simply returns `Ok(())`.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bus transport fault: {0}")]
    Transport(String),

    #[error("Malformed telemetry payload: {0}")]
    TelemetryDecode(String),

    #[error("Malformed client command: {0}")]
    CommandDecode(String),

    #[error("Client connection error: {0}")]
    Client(String),

    #[error("No telemetry received for {0:?}")]
    TelemetryTimeout(Duration),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Server error: {0}")]
    Server(String),
}
