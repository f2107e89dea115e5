//! Message envelope, typed payloads, and the JSON wire codec.
//!
//! Every message on the bus is an [`Envelope`]: a kind, the sender, a Lamport
//! timestamp, and a payload object. The wire format is JSON; receivers ignore
//! unknown payload fields so newer publishers can add fields without breaking
//! older fleets. The legacy `fire_alert` payload shape (`row`/`col`) is
//! accepted and normalized into the `fire_announce` record.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use brigade_core::{AgentId, FireId};

/// The `action` value carried by extinguish coordination messages.
pub const EXTINGUISHED_ACTION: &str = "extinguished";

/// Enumerated message kinds, as they appear in the wire `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// A fire announcement, new or spread.
    FireAnnounce,
    /// Legacy fire announcement shape; equivalent to [`MessageKind::FireAnnounce`].
    FireAlert,
    /// A bid on an announced fire.
    Bid,
    /// A winner announcement.
    BidDecision,
    /// A periodic heartbeat.
    TruckStatus,
    /// Extinguish events and ancillary coordination.
    Coordination,
    /// Ricart-Agrawala refill request.
    WaterReq,
    /// Ricart-Agrawala refill reply.
    WaterReply,
    /// Ricart-Agrawala refill release.
    WaterRelease,
}

impl MessageKind {
    /// The wire name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::FireAnnounce => "fire_announce",
            MessageKind::FireAlert => "fire_alert",
            MessageKind::Bid => "bid",
            MessageKind::BidDecision => "bid_decision",
            MessageKind::TruckStatus => "truck_status",
            MessageKind::Coordination => "coordination",
            MessageKind::WaterReq => "water_req",
            MessageKind::WaterReply => "water_reply",
            MessageKind::WaterRelease => "water_release",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message on the bus. Immutable after publish.
///
/// `from` and `lamport` are stamped by the transport at publish time, never
/// by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Message kind.
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Sender identifier.
    pub from: AgentId,
    /// Lamport timestamp stamped at publish.
    pub lamport: u64,
    /// Typed payload object per kind.
    #[serde(default = "empty_payload")]
    pub payload: Value,
}

fn empty_payload() -> Value {
    Value::Object(serde_json::Map::new())
}

impl Envelope {
    /// Assemble an envelope. Transports use this when stamping a publish.
    pub fn new(kind: MessageKind, from: AgentId, lamport: u64, payload: Value) -> Self {
        Self {
            kind,
            from,
            lamport,
            payload,
        }
    }

    /// Decode the payload into a typed record.
    ///
    /// Unknown fields are ignored; a missing or wrong-typed required field is
    /// a decode failure. An absent payload decodes as the empty object.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T, CodecError> {
        let payload = if self.payload.is_null() {
            empty_payload()
        } else {
            self.payload.clone()
        };
        Ok(serde_json::from_value(payload)?)
    }
}

// === Payloads ===

/// A fire announcement: the fire's cell and intensity.
///
/// Deserializes from both the current shape (`id_x`/`id_y`) and the legacy
/// `fire_alert` shape (`row`/`col`); always serializes in the current shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "FireAnnounceWire")]
pub struct FireAnnouncePayload {
    pub id_x: i32,
    pub id_y: i32,
    pub intensity: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tick: Option<u64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FireAnnounceWire {
    Announce {
        id_x: i32,
        id_y: i32,
        intensity: u32,
        #[serde(default)]
        tick: Option<u64>,
    },
    Legacy {
        row: i32,
        col: i32,
        intensity: u32,
    },
}

impl From<FireAnnounceWire> for FireAnnouncePayload {
    fn from(wire: FireAnnounceWire) -> Self {
        match wire {
            FireAnnounceWire::Announce {
                id_x,
                id_y,
                intensity,
                tick,
            } => Self {
                id_x,
                id_y,
                intensity,
                tick,
            },
            FireAnnounceWire::Legacy {
                row,
                col,
                intensity,
            } => Self {
                id_x: row,
                id_y: col,
                intensity,
                tick: None,
            },
        }
    }
}

impl FireAnnouncePayload {
    /// Announce the fire at the given cell.
    pub fn new(fire: FireId, intensity: u32, tick: Option<u64>) -> Self {
        Self {
            id_x: fire.x,
            id_y: fire.y,
            intensity,
            tick,
        }
    }

    /// The announced fire's identifier.
    pub fn fire(&self) -> FireId {
        FireId::new(self.id_x, self.id_y)
    }
}

/// A bid on a fire: the bidder's Manhattan score and Lamport timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BidPayload {
    pub fire_x: i32,
    pub fire_y: i32,
    pub bidder: AgentId,
    pub score: u32,
    pub lamport: u64,
}

impl BidPayload {
    /// The fire being bid on.
    pub fn fire(&self) -> FireId {
        FireId::new(self.fire_x, self.fire_y)
    }
}

/// A winner announcement for one fire's collection window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BidDecisionPayload {
    pub fire_x: i32,
    pub fire_y: i32,
    pub winner: AgentId,
    pub lamport: u64,
}

impl BidDecisionPayload {
    /// The fire the decision is for.
    pub fn fire(&self) -> FireId {
        FireId::new(self.fire_x, self.fire_y)
    }
}

/// A periodic heartbeat with position and water state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TruckStatusPayload {
    pub row: i32,
    pub col: i32,
    pub water: u32,
    pub max_water: u32,
    pub task: String,
}

/// An extinguish event on the coordination channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtinguishedPayload {
    pub action: String,
    pub target_row: i32,
    pub target_col: i32,
    pub water_used: u32,
}

impl ExtinguishedPayload {
    /// An extinguish event for the given cell.
    pub fn new(target_row: i32, target_col: i32, water_used: u32) -> Self {
        Self {
            action: EXTINGUISHED_ACTION.to_string(),
            target_row,
            target_col,
            water_used,
        }
    }

    /// Whether this coordination message is an extinguish event.
    pub fn is_extinguished(&self) -> bool {
        self.action == EXTINGUISHED_ACTION
    }
}

/// A Ricart-Agrawala refill request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaterReqPayload {
    pub ts: u64,
}

/// A Ricart-Agrawala refill reply. The sender is the envelope `from`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaterReplyPayload {}

/// A Ricart-Agrawala refill release. The sender is the envelope `from`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaterReleasePayload {}

// === Codec ===

/// JSON wire codec with a frame-size guard.
#[derive(Debug, Clone)]
pub struct Codec {
    max_frame: usize,
}

impl Codec {
    /// Default maximum frame size (64 KiB).
    pub const DEFAULT_MAX_FRAME: usize = 64 * 1024;

    /// Create a codec with default settings.
    pub fn new() -> Self {
        Self {
            max_frame: Self::DEFAULT_MAX_FRAME,
        }
    }

    /// Create a codec with a custom maximum frame size.
    pub fn with_max_frame(max_frame: usize) -> Self {
        Self { max_frame }
    }

    /// Maximum frame size accepted by this codec.
    pub fn max_frame(&self) -> usize {
        self.max_frame
    }

    /// Encode an envelope to a JSON frame.
    pub fn encode(&self, envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
        let frame = serde_json::to_vec(envelope)?;
        if frame.len() > self.max_frame {
            return Err(CodecError::FrameTooLarge {
                size: frame.len(),
                max: self.max_frame,
            });
        }
        Ok(frame)
    }

    /// Decode an envelope from a JSON frame.
    pub fn decode(&self, frame: &[u8]) -> Result<Envelope, CodecError> {
        if frame.len() > self.max_frame {
            return Err(CodecError::FrameTooLarge {
                size: frame.len(),
                max: self.max_frame,
            });
        }
        Ok(serde_json::from_slice(frame)?)
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors during envelope encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("frame too large: {size} bytes exceeds limit of {max} bytes")]
    FrameTooLarge { size: usize, max: usize },

    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),
}
