//! Local input accumulation between network flushes.
//!
//! Held keys and live pointers are *state* and persist across flushes.
//! Everything under [`InputEvents`] is *discrete* and is emptied by every
//! [`InputAggregator::flush`].

use std::collections::{BTreeMap, BTreeSet};

use serde::{Serialize, Serializer};

use crate::types::{EntityId, SyncConfig};

// ---------------------------------------------------------------------------
// Raw input occurrences
// ---------------------------------------------------------------------------

/// One discrete input occurrence as captured by the host (DOM, window, …).
///
/// Pointer timestamps are host milliseconds; only differences matter.
#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    KeyDown(String),
    KeyUp(String),
    PointerDown { id: u32, x: f64, y: f64, time_ms: u64 },
    PointerMove { id: u32, x: f64, y: f64, time_ms: u64 },
    PointerUp { id: u32, x: f64, y: f64, time_ms: u64 },
    MouseDown { button: u8, x: f64, y: f64 },
    MouseMove { x: f64, y: f64 },
    MouseUp { button: u8, x: f64, y: f64 },
    /// `count` consecutive taps (2 = double tap), sent as `tap_<count>`.
    Tap { count: u32, x: f64, y: f64 },
    ActorTap(EntityId),
    ActorClick(EntityId),
    Message(String),
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PointerState {
    pub start_x: f64,
    pub start_y: f64,
    pub start_time: u64,
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwipeDelta {
    pub x_dist: f64,
    pub y_dist: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActorTarget {
    pub id: EntityId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Swipe {
    Left,
    Right,
    Up,
    Down,
}

impl Swipe {
    /// Classify a pointer release.
    ///
    /// Screen coordinates: negative `dy` is up.
    pub fn classify(dx: f64, dy: f64, elapsed_ms: u64, max_ms: u64, min_dist: f64) -> Option<Swipe> {
        if elapsed_ms >= max_ms {
            return None;
        }
        if dx.abs() >= dy.abs() {
            if dx.abs() <= min_dist {
                return None;
            }
            Some(if dx > 0.0 { Swipe::Right } else { Swipe::Left })
        } else {
            if dy.abs() <= min_dist {
                return None;
            }
            Some(if dy > 0.0 { Swipe::Down } else { Swipe::Up })
        }
    }
}

/// Discrete events accumulated since the last flush, keyed by kind on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InputEvents {
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub keydown: BTreeMap<String, bool>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub keyup: BTreeMap<String, bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub swipeleft: Option<SwipeDelta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub swiperight: Option<SwipeDelta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub swipeup: Option<SwipeDelta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub swipedown: Option<SwipeDelta>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub touchstart: BTreeMap<u32, PointerState>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub touchmove: BTreeMap<u32, PointerState>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub touchend: BTreeMap<u32, PointerState>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub mousedown: BTreeMap<u8, Point>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub mouseup: BTreeMap<u8, Point>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mousemove: Option<Point>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actortap: Option<ActorTarget>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actorclick: Option<ActorTarget>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// `tap_<n>` entries.
    #[serde(flatten)]
    pub taps: BTreeMap<String, Point>,
}

impl InputEvents {
    pub fn is_empty(&self) -> bool {
        *self == InputEvents::default()
    }

    pub fn swipe(&self) -> Option<Swipe> {
        if self.swipeleft.is_some() {
            Some(Swipe::Left)
        } else if self.swiperight.is_some() {
            Some(Swipe::Right)
        } else if self.swipeup.is_some() {
            Some(Swipe::Up)
        } else if self.swipedown.is_some() {
            Some(Swipe::Down)
        } else {
            None
        }
    }

    fn set_swipe(&mut self, swipe: Swipe, delta: SwipeDelta) {
        let slot = match swipe {
            Swipe::Left => &mut self.swipeleft,
            Swipe::Right => &mut self.swiperight,
            Swipe::Up => &mut self.swipeup,
            Swipe::Down => &mut self.swipedown,
        };
        *slot = Some(delta);
    }
}

/// What gets transmitted: persistent state plus the flushed discrete events.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InputSnapshot {
    #[serde(serialize_with = "held_as_map")]
    pub keyboard: BTreeSet<String>,
    pub touches: BTreeMap<u32, PointerState>,
    pub events: InputEvents,
}

fn held_as_map<S: Serializer>(keys: &BTreeSet<String>, s: S) -> Result<S::Ok, S::Error> {
    s.collect_map(keys.iter().map(|k| (k, true)))
}

// ---------------------------------------------------------------------------
// Aggregator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct InputAggregator {
    keyboard: BTreeSet<String>,
    touches: BTreeMap<u32, PointerState>,
    events: InputEvents,
    swipe_time_ms: u64,
    swipe_distance: f64,
    dirty: bool,
}

impl Default for InputAggregator {
    fn default() -> Self {
        Self::new(&SyncConfig::default())
    }
}

impl InputAggregator {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            keyboard: BTreeSet::new(),
            touches: BTreeMap::new(),
            events: InputEvents::default(),
            swipe_time_ms: config.swipe_time_ms,
            swipe_distance: config.swipe_distance,
            dirty: false,
        }
    }

    /// Merge one occurrence into the pending snapshot.
    ///
    /// Returns `false` when the occurrence changed nothing (a repeated
    /// keydown for a key already held).
    pub fn record(&mut self, event: InputEvent) -> bool {
        match event {
            InputEvent::KeyDown(key) => {
                if !self.keyboard.insert(key.clone()) {
                    return false;
                }
                self.events.keydown.insert(key, true);
            }
            InputEvent::KeyUp(key) => {
                self.keyboard.remove(&key);
                self.events.keyup.insert(key, true);
            }
            InputEvent::PointerDown { id, x, y, time_ms } => {
                let p = PointerState {
                    start_x: x,
                    start_y: y,
                    start_time: time_ms,
                    x,
                    y,
                };
                self.touches.insert(id, p);
                self.events.touchstart.insert(id, p);
                self.events.touchmove.insert(id, p);
            }
            InputEvent::PointerMove { id, x, y, time_ms } => {
                let p = self.touches.entry(id).or_insert(PointerState {
                    start_x: x,
                    start_y: y,
                    start_time: time_ms,
                    x,
                    y,
                });
                p.x = x;
                p.y = y;
                let p = *p;
                self.events.touchmove.insert(id, p);
            }
            InputEvent::PointerUp { id, x, y, time_ms } => {
                let start = self.touches.remove(&id);
                let p = match start {
                    Some(s) => PointerState { x, y, ..s },
                    None => PointerState {
                        start_x: x,
                        start_y: y,
                        start_time: time_ms,
                        x,
                        y,
                    },
                };
                self.events.touchend.insert(id, p);

                let (dx, dy) = (p.x - p.start_x, p.y - p.start_y);
                let elapsed = time_ms.saturating_sub(p.start_time);
                if let Some(swipe) =
                    Swipe::classify(dx, dy, elapsed, self.swipe_time_ms, self.swipe_distance)
                {
                    self.events.set_swipe(
                        swipe,
                        SwipeDelta {
                            x_dist: dx,
                            y_dist: dy,
                        },
                    );
                }
            }
            InputEvent::MouseDown { button, x, y } => {
                self.events.mousedown.insert(button, Point { x, y });
            }
            InputEvent::MouseMove { x, y } => {
                self.events.mousemove = Some(Point { x, y });
            }
            InputEvent::MouseUp { button, x, y } => {
                self.events.mouseup.insert(button, Point { x, y });
            }
            InputEvent::Tap { count, x, y } => {
                self.events.taps.insert(format!("tap_{}", count), Point { x, y });
            }
            InputEvent::ActorTap(id) => {
                self.events.actortap = Some(ActorTarget { id });
            }
            InputEvent::ActorClick(id) => {
                self.events.actorclick = Some(ActorTarget { id });
            }
            InputEvent::Message(text) => {
                self.events.message = Some(text);
            }
        }
        self.dirty = true;
        true
    }

    /// Take the pending snapshot and empty the discrete events.
    pub fn flush(&mut self) -> InputSnapshot {
        self.dirty = false;
        InputSnapshot {
            keyboard: self.keyboard.clone(),
            touches: self.touches.clone(),
            events: std::mem::take(&mut self.events),
        }
    }

    /// True when something was recorded since the last flush.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Drop pending discrete events without transmitting them.
    pub fn discard_events(&mut self) {
        self.events = InputEvents::default();
        self.dirty = false;
    }

    /// Forget held keys and pointers too, e.g. when a text field takes focus.
    pub fn reset(&mut self) {
        self.keyboard.clear();
        self.touches.clear();
        self.discard_events();
    }

    pub fn held_keys(&self) -> &BTreeSet<String> {
        &self.keyboard
    }

    pub fn pointers(&self) -> &BTreeMap<u32, PointerState> {
        &self.touches
    }

    pub fn pending_events(&self) -> &InputEvents {
        &self.events
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classify_prefers_dominant_axis() {
        assert_eq!(Swipe::classify(80.0, 60.0, 50, 200, 50.0), Some(Swipe::Right));
        assert_eq!(Swipe::classify(-80.0, 60.0, 50, 200, 50.0), Some(Swipe::Left));
        assert_eq!(Swipe::classify(10.0, 70.0, 50, 200, 50.0), Some(Swipe::Down));
        assert_eq!(Swipe::classify(10.0, -70.0, 50, 200, 50.0), Some(Swipe::Up));
    }

    #[test]
    fn classify_rejects_short_or_slow() {
        assert_eq!(Swipe::classify(50.0, 0.0, 50, 200, 50.0), None);
        assert_eq!(Swipe::classify(120.0, 0.0, 200, 200, 50.0), None);
        // Dominant axis too short even though the other axis is long enough overall.
        assert_eq!(Swipe::classify(45.0, 40.0, 50, 200, 50.0), None);
    }

    #[test]
    fn keyup_fires_even_without_keydown() {
        let mut input = InputAggregator::default();
        assert!(input.record(InputEvent::KeyUp("W".into())));
        let snap = input.flush();
        assert_eq!(snap.events.keyup.get("W"), Some(&true));
        assert!(snap.keyboard.is_empty());
    }

    #[test]
    fn pointer_state_survives_flush() {
        let mut input = InputAggregator::default();
        input.record(InputEvent::PointerDown { id: 0, x: 1.0, y: 2.0, time_ms: 0 });
        let first = input.flush();
        assert_eq!(first.events.touchstart.len(), 1);

        input.record(InputEvent::PointerMove { id: 0, x: 5.0, y: 2.0, time_ms: 10 });
        let second = input.flush();
        assert!(second.events.touchstart.is_empty());
        assert_eq!(second.touches[&0].x, 5.0);
        assert_eq!(second.touches[&0].start_x, 1.0);
    }

    #[test]
    fn snapshot_wire_shape() {
        let mut input = InputAggregator::default();
        input.record(InputEvent::KeyDown("A".into()));
        input.record(InputEvent::Tap { count: 2, x: 3.0, y: 4.0 });
        input.record(InputEvent::ActorTap(EntityId::Num(7)));
        let v = serde_json::to_value(input.flush()).unwrap();
        assert_eq!(v["keyboard"], json!({"A": true}));
        assert_eq!(v["events"]["keydown"], json!({"A": true}));
        assert_eq!(v["events"]["tap_2"], json!({"x": 3.0, "y": 4.0}));
        assert_eq!(v["events"]["actortap"], json!({"id": 7}));
        assert!(v["events"].get("keyup").is_none());
    }

    #[test]
    fn reset_clears_state() {
        let mut input = InputAggregator::default();
        input.record(InputEvent::KeyDown("A".into()));
        input.record(InputEvent::PointerDown { id: 1, x: 0.0, y: 0.0, time_ms: 0 });
        input.reset();
        assert!(input.held_keys().is_empty());
        assert!(input.pointers().is_empty());
        assert!(!input.is_dirty());
        assert!(input.pending_events().is_empty());
    }
}
