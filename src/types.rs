//! Core types shared across all modules.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Server-assigned entity identifier.
///
/// Servers of different generations send either integers or strings, so both
/// are accepted. Numeric ids order numerically and sort before string ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityId {
    Num(u64),
    Str(String),
}

impl From<u64> for EntityId {
    fn from(v: u64) -> Self {
        EntityId::Num(v)
    }
}

impl From<&str> for EntityId {
    fn from(v: &str) -> Self {
        EntityId::Str(v.to_string())
    }
}

impl From<String> for EntityId {
    fn from(v: String) -> Self {
        EntityId::Str(v)
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityId::Num(n) => write!(f, "{}", n),
            EntityId::Str(s) => f.write_str(s),
        }
    }
}

// ---------------------------------------------------------------------------
// Screen / view
// ---------------------------------------------------------------------------

/// Client display properties mirrored to the server whenever they change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenInfo {
    pub screen_width: u32,
    pub screen_height: u32,
    pub pixel_ratio: f64,
    pub touch_device: bool,
    /// Device orientation in degrees (0, 90, -90, 180); `None` on desktops.
    pub orientation: Option<i32>,
}

impl Default for ScreenInfo {
    fn default() -> Self {
        Self {
            screen_width: 1280,
            screen_height: 720,
            pixel_ratio: 1.0,
            touch_device: false,
            orientation: None,
        }
    }
}

/// Camera offset and scale delivered alongside each actor list.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewState {
    pub view_x: f64,
    pub view_y: f64,
    pub view_scale: f64,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            view_x: 0.0,
            view_y: 0.0,
            view_scale: 1.0,
        }
    }
}

impl ViewState {
    /// Scale that fits a server view of `target_w x target_h` into the
    /// client screen without cropping.
    pub fn fit_scale(screen: &ScreenInfo, target_w: f64, target_h: f64) -> f64 {
        if target_w <= 0.0 || target_h <= 0.0 {
            return 1.0;
        }
        let sx = screen.screen_width as f64 / target_w;
        let sy = screen.screen_height as f64 / target_h;
        sx.min(sy)
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Message vocabulary spoken by a server generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolDialect {
    /// `clientInfo` / `clientInput` / `clientStateChange`, operating state `running`.
    #[default]
    Node,
    /// `info` / `input` / `stateChange`, operating state `ready`.
    Room,
}

/// How inbound update packets are reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileMode {
    /// Delta when the packet carries any delta list, full snapshot otherwise.
    #[default]
    Auto,
    Delta,
    Snapshot,
}

/// When recorded input is transmitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputFlush {
    /// Coalesce everything recorded within one scheduler tick into a single
    /// message sent from [`crate::SyncClient::tick`].
    #[default]
    PerTick,
    /// Send after every recorded event.
    Immediate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub dialect: ProtocolDialect,
    pub reconcile_mode: ReconcileMode,
    /// Consecutive snapshots an actor may be missing from before eviction.
    pub eviction_threshold: u32,
    /// A release faster than this (ms) may count as a swipe.
    pub swipe_time_ms: u64,
    /// Minimum dominant-axis travel (px) for a swipe.
    pub swipe_distance: f64,
    pub input_flush: InputFlush,
    /// Base URL sprite image paths are resolved against.
    pub assets_url: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            dialect: ProtocolDialect::Node,
            reconcile_mode: ReconcileMode::Auto,
            eviction_threshold: 10,
            swipe_time_ms: 200,
            swipe_distance: 50.0,
            input_flush: InputFlush::PerTick,
            assets_url: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_id_accepts_numbers_and_strings() {
        let ids: Vec<EntityId> = serde_json::from_str(r#"[7, "ship-1"]"#).unwrap();
        assert_eq!(ids[0], EntityId::Num(7));
        assert_eq!(ids[1], EntityId::Str("ship-1".into()));
        assert!(ids[0] < ids[1]);
        assert_eq!(ids[1].to_string(), "ship-1");
    }

    #[test]
    fn numeric_ids_order_numerically() {
        assert!(EntityId::from(9) < EntityId::from(10));
    }

    #[test]
    fn fit_scale_uses_tighter_axis() {
        let screen = ScreenInfo {
            screen_width: 1000,
            screen_height: 500,
            ..Default::default()
        };
        assert!((ViewState::fit_scale(&screen, 500.0, 500.0) - 1.0).abs() < f64::EPSILON);
        assert!((ViewState::fit_scale(&screen, 2000.0, 500.0) - 0.5).abs() < f64::EPSILON);
        assert!((ViewState::fit_scale(&screen, 0.0, 500.0) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn config_defaults_fill_missing_fields() {
        let cfg: SyncConfig = serde_json::from_str(r#"{"dialect":"room"}"#).unwrap();
        assert_eq!(cfg.dialect, ProtocolDialect::Room);
        assert_eq!(cfg.eviction_threshold, 10);
        assert_eq!(cfg.input_flush, InputFlush::PerTick);
    }
}
