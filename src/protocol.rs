//! Wire protocol between the game server and this client.
//!
//! This module owns **every message that crosses the socket boundary**.
//!
//! ## Message names
//!
//! | Direction       | Names                                                        |
//! |-----------------|--------------------------------------------------------------|
//! | server → client | `connection`, `connect_error`, `disconnect`, `error`,        |
//! |                 | `update` / `frameUpdate`, `assetUpdate`, `viewUpdate`,       |
//! |                 | `transition`, `headline`, `forward`, `attached`, `message`,  |
//! |                 | `ping`                                                       |
//! | client → server | dialect-specific info / input / state-change, `playerjoin`,  |
//! |                 | `pong`                                                       |
//!
//! ## Design rules
//!
//! 1. Field names on the wire are camelCase; Rust fields are snake_case.
//! 2. Inbound payloads are decoded once, here, into [`ServerMessage`]; nothing
//!    downstream touches raw JSON.
//! 3. Every field a server generation may omit has a serde default.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::types::{EntityId, ProtocolDialect};

// ---------------------------------------------------------------------------
// Framing
// ---------------------------------------------------------------------------

/// One named message as carried by a text frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireFrame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl WireFrame {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

// ---------------------------------------------------------------------------
// Entity descriptors  (carried by update / frameUpdate)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpriteRef {
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_animation")]
    pub animation: String,
    /// Fractional frames are floored when drawn.
    #[serde(default)]
    pub frame: f64,
    /// Older servers send a signed scale (`-1` = mirrored) instead of a bool.
    #[serde(default, deserialize_with = "de_mirror")]
    pub mirror: bool,
    #[serde(default)]
    pub tile_x: bool,
    #[serde(default)]
    pub scroll_speed: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tint: Option<u32>,
}

impl Default for SpriteRef {
    fn default() -> Self {
        Self {
            name: String::new(),
            animation: default_animation(),
            frame: 0.0,
            mirror: false,
            tile_x: false,
            scroll_speed: 0.0,
            tint: None,
        }
    }
}

impl SpriteRef {
    pub fn new(name: impl Into<String>, animation: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            animation: animation.into(),
            ..Default::default()
        }
    }

    pub fn frame_index(&self) -> usize {
        if self.frame.is_finite() && self.frame > 0.0 {
            self.frame.floor() as usize
        } else {
            0
        }
    }
}

fn default_animation() -> String {
    "default".into()
}

fn de_mirror<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Flag(bool),
        Scale(f64),
    }
    Ok(match Raw::deserialize(d)? {
        Raw::Flag(b) => b,
        Raw::Scale(s) => s < 0.0,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bubble {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub star: bool,
}

/// Server-authoritative description of one visible entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityDescriptor {
    pub id: EntityId,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub z: f64,
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub height: f64,
    #[serde(default)]
    pub sprite: SpriteRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bubble: Option<Bubble>,
    #[serde(default)]
    pub shadow: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub below_y: Option<f64>,
}

impl EntityDescriptor {
    pub fn new(id: impl Into<EntityId>, sprite: SpriteRef) -> Self {
        Self {
            id: id.into(),
            x: 0.0,
            y: 0.0,
            z: 0.0,
            width: 0.0,
            height: 0.0,
            sprite,
            bubble: None,
            shadow: false,
            below_y: None,
        }
    }

    pub fn at(mut self, x: f64, y: f64, z: f64) -> Self {
        self.x = x;
        self.y = y;
        self.z = z;
        self
    }
}

/// Removal entries only need an id; anything else the server sends is ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRef {
    pub id: EntityId,
}

/// One world-state packet.
///
/// Delta servers fill `added` / `removed` / `changed`; snapshot servers fill
/// `in_view` (sent as `inView` or, by the oldest servers, `contents`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FramePacket {
    #[serde(default)]
    pub view_x: f64,
    #[serde(default)]
    pub view_y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_scale: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added: Option<Vec<EntityDescriptor>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed: Option<Vec<EntityRef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changed: Option<Vec<EntityDescriptor>>,
    #[serde(default, alias = "contents", skip_serializing_if = "Option::is_none")]
    pub in_view: Option<Vec<EntityDescriptor>>,
}

impl FramePacket {
    pub fn is_delta(&self) -> bool {
        self.added.is_some() || self.removed.is_some() || self.changed.is_some()
    }

    pub fn delta(
        added: Vec<EntityDescriptor>,
        removed: Vec<EntityId>,
        changed: Vec<EntityDescriptor>,
    ) -> Self {
        Self {
            added: Some(added),
            removed: Some(removed.into_iter().map(|id| EntityRef { id }).collect()),
            changed: Some(changed),
            ..Default::default()
        }
    }

    pub fn snapshot(in_view: Vec<EntityDescriptor>) -> Self {
        Self {
            in_view: Some(in_view),
            ..Default::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Assets  (assetUpdate, connection.initialData.assets)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpriteAsset {
    pub image_path: String,
    #[serde(default = "one")]
    pub frame_count: u32,
    #[serde(default)]
    pub frame_speed: f64,
    /// All frames live in one horizontal strip instead of one file each.
    #[serde(default)]
    pub single_image: bool,
    #[serde(default)]
    pub x_offset: f64,
    #[serde(default)]
    pub y_offset: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

fn one() -> u32 {
    1
}

/// Sprite name → animation name → asset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetManifest {
    #[serde(default)]
    pub sprites: BTreeMap<String, BTreeMap<String, SpriteAsset>>,
}

impl AssetManifest {
    pub fn is_empty(&self) -> bool {
        self.sprites.values().all(|anims| anims.is_empty())
    }

    pub fn animation_count(&self) -> usize {
        self.sprites.values().map(|anims| anims.len()).sum()
    }

    pub fn insert(&mut self, name: &str, animation: &str, asset: SpriteAsset) {
        self.sprites
            .entry(name.to_string())
            .or_default()
            .insert(animation.to_string(), asset);
    }
}

// ---------------------------------------------------------------------------
// Session / lifecycle payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub initial_data: Option<Value>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ConnectionInfo {
    /// Assets bundled with the handshake (`initialData.assets`), if any.
    pub fn bundled_assets(&self) -> Option<AssetManifest> {
        let assets = self.initial_data.as_ref()?.get("assets")?;
        serde_json::from_value(assets.clone()).ok()
    }

    /// Initial view scale bundled with the handshake, if any.
    pub fn view_scale(&self) -> Option<f64> {
        self.initial_data.as_ref()?.get("viewScale")?.as_f64()
    }
}

/// Server-side view dimensions; the client rescales to fit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewUpdate {
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    /// Milliseconds until the client returns to the operating state.
    #[serde(default, alias = "durationMs")]
    pub duration: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forward {
    #[serde(alias = "server", alias = "url")]
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attached {
    pub id: EntityId,
}

// ---------------------------------------------------------------------------
// Inbound message union
// ---------------------------------------------------------------------------

/// Every server message the client understands.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Connection(ConnectionInfo),
    ConnectError(String),
    Disconnect(Option<String>),
    Error(String),
    Update(FramePacket),
    AssetUpdate(AssetManifest),
    ViewUpdate(ViewUpdate),
    Transition(Transition),
    Headline(String),
    Forward(Forward),
    Attached(EntityId),
    Message(String),
    Ping,
}

impl ServerMessage {
    /// Decode a named inbound message.
    pub fn decode(event: &str, data: Value) -> Result<Self, ProtocolError> {
        let msg = match event {
            events::CONNECTION => Self::Connection(parse(event, data)?),
            events::CONNECT_ERROR => Self::ConnectError(text_of(&data)),
            events::DISCONNECT => {
                Self::Disconnect(if data.is_null() { None } else { Some(text_of(&data)) })
            }
            events::ERROR => Self::Error(text_of(&data)),
            events::UPDATE | events::FRAME_UPDATE => {
                // Older servers wrap the frame in `{ packet: ... }`.
                let frame = match data {
                    Value::Object(mut map) if map.contains_key("packet") => {
                        map.remove("packet").unwrap_or_default()
                    }
                    other => other,
                };
                Self::Update(parse(event, frame)?)
            }
            events::ASSET_UPDATE => Self::AssetUpdate(parse(event, data)?),
            events::VIEW_UPDATE => Self::ViewUpdate(parse(event, data)?),
            events::TRANSITION => Self::Transition(parse(event, data)?),
            events::HEADLINE => Self::Headline(text_of(&data)),
            events::FORWARD => match data {
                Value::String(address) => Self::Forward(Forward { address }),
                other => Self::Forward(parse(event, other)?),
            },
            events::ATTACHED => match data {
                Value::Object(_) => Self::Attached(parse::<Attached>(event, data)?.id),
                other => Self::Attached(parse(event, other)?),
            },
            events::MESSAGE => Self::Message(text_of(&data)),
            events::PING => Self::Ping,
            other => return Err(ProtocolError::UnknownMessage(other.to_string())),
        };
        Ok(msg)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Connection(_) => events::CONNECTION,
            Self::ConnectError(_) => events::CONNECT_ERROR,
            Self::Disconnect(_) => events::DISCONNECT,
            Self::Error(_) => events::ERROR,
            Self::Update(_) => events::UPDATE,
            Self::AssetUpdate(_) => events::ASSET_UPDATE,
            Self::ViewUpdate(_) => events::VIEW_UPDATE,
            Self::Transition(_) => events::TRANSITION,
            Self::Headline(_) => events::HEADLINE,
            Self::Forward(_) => events::FORWARD,
            Self::Attached(_) => events::ATTACHED,
            Self::Message(_) => events::MESSAGE,
            Self::Ping => events::PING,
        }
    }
}

fn parse<T: serde::de::DeserializeOwned>(event: &str, data: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(data).map_err(|e| ProtocolError::malformed(event, e))
}

/// Servers send human-readable text either bare or as `{ message: ... }`.
fn text_of(data: &Value) -> String {
    match data {
        Value::String(s) => s.clone(),
        Value::Object(map) => match map.get("message") {
            Some(Value::String(s)) => s.clone(),
            _ => data.to_string(),
        },
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Dialects
// ---------------------------------------------------------------------------

impl ProtocolDialect {
    pub fn info_event(self) -> &'static str {
        match self {
            ProtocolDialect::Node => events::CLIENT_INFO,
            ProtocolDialect::Room => events::INFO,
        }
    }

    pub fn input_event(self) -> &'static str {
        match self {
            ProtocolDialect::Node => events::CLIENT_INPUT,
            ProtocolDialect::Room => events::INPUT,
        }
    }

    pub fn state_change_event(self) -> &'static str {
        match self {
            ProtocolDialect::Node => events::CLIENT_STATE_CHANGE,
            ProtocolDialect::Room => events::STATE_CHANGE,
        }
    }

    /// Wire name of the operating state.
    pub fn operating_state(self) -> &'static str {
        match self {
            ProtocolDialect::Node => "running",
            ProtocolDialect::Room => "ready",
        }
    }
}

// ---------------------------------------------------------------------------
// Message name constants
// ---------------------------------------------------------------------------

pub mod events {
    pub const CONNECTION: &str = "connection";
    pub const CONNECT_ERROR: &str = "connect_error";
    pub const DISCONNECT: &str = "disconnect";
    pub const ERROR: &str = "error";
    pub const UPDATE: &str = "update";
    pub const FRAME_UPDATE: &str = "frameUpdate";
    pub const ASSET_UPDATE: &str = "assetUpdate";
    pub const VIEW_UPDATE: &str = "viewUpdate";
    pub const TRANSITION: &str = "transition";
    pub const HEADLINE: &str = "headline";
    pub const FORWARD: &str = "forward";
    pub const ATTACHED: &str = "attached";
    pub const MESSAGE: &str = "message";
    pub const PING: &str = "ping";

    pub const CLIENT_INFO: &str = "clientInfo";
    pub const CLIENT_INPUT: &str = "clientInput";
    pub const CLIENT_STATE_CHANGE: &str = "clientStateChange";
    pub const INFO: &str = "info";
    pub const INPUT: &str = "input";
    pub const STATE_CHANGE: &str = "stateChange";
    pub const PLAYER_JOIN: &str = "playerjoin";
    pub const PONG: &str = "pong";
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
