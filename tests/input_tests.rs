//! InputAggregator integration tests

#[cfg(test)]
mod tests {
    use actor_sync::{EntityId, InputAggregator, InputEvent, Swipe, SyncConfig};
    use serde_json::json;

    fn down(x: f64, y: f64, t: u64) -> InputEvent {
        InputEvent::PointerDown {
            id: 0,
            x,
            y,
            time_ms: t,
        }
    }

    fn up(x: f64, y: f64, t: u64) -> InputEvent {
        InputEvent::PointerUp {
            id: 0,
            x,
            y,
            time_ms: t,
        }
    }

    // -----------------------------------------------------------------------
    // Flush
    // -----------------------------------------------------------------------

    #[test]
    fn second_flush_is_empty() {
        let mut input = InputAggregator::default();
        input.record(InputEvent::KeyDown("a".into()));
        input.record(InputEvent::Tap {
            count: 2,
            x: 1.0,
            y: 1.0,
        });
        assert!(!input.flush().events.is_empty());
        assert!(input.flush().events.is_empty());
    }

    #[test]
    fn held_state_survives_flush() {
        let mut input = InputAggregator::default();
        input.record(InputEvent::KeyDown("w".into()));
        input.record(down(10.0, 10.0, 0));
        input.flush();
        let snap = input.flush();
        assert!(snap.keyboard.contains("w"));
        assert_eq!(snap.touches.len(), 1);
    }

    // -----------------------------------------------------------------------
    // Key repeat
    // -----------------------------------------------------------------------

    #[test]
    fn repeated_keydown_fires_once() {
        let mut input = InputAggregator::default();
        assert!(input.record(InputEvent::KeyDown("A".into())));
        assert!(!input.record(InputEvent::KeyDown("A".into())));
        let snap = input.flush();
        assert_eq!(snap.events.keydown.len(), 1);
        assert!(snap.events.keydown.contains_key("A"));
    }

    #[test]
    fn keyup_always_fires() {
        let mut input = InputAggregator::default();
        assert!(input.record(InputEvent::KeyUp("A".into())));
        input.record(InputEvent::KeyDown("A".into()));
        input.record(InputEvent::KeyUp("A".into()));
        let snap = input.flush();
        assert!(snap.events.keyup.contains_key("A"));
        assert!(snap.keyboard.is_empty());
        assert!(input.record(InputEvent::KeyDown("A".into())));
    }

    // -----------------------------------------------------------------------
    // Swipes
    // -----------------------------------------------------------------------

    #[test]
    fn quick_upward_release_is_swipeup() {
        let mut input = InputAggregator::default();
        input.record(down(100.0, 100.0, 0));
        input.record(up(100.0, 40.0, 100));
        let snap = input.flush();
        assert_eq!(snap.events.swipe(), Some(Swipe::Up));
        assert!(snap.events.swipeup.is_some());
        assert!(snap.touches.is_empty());
    }

    #[test]
    fn slow_release_is_not_a_swipe() {
        let mut input = InputAggregator::default();
        input.record(down(100.0, 100.0, 0));
        input.record(up(100.0, 40.0, 900));
        let snap = input.flush();
        assert_eq!(snap.events.swipe(), None);
        assert!(snap.events.touchend.contains_key(&0));
    }

    #[test]
    fn short_travel_is_not_a_swipe() {
        let mut input = InputAggregator::default();
        input.record(down(100.0, 100.0, 0));
        input.record(up(130.0, 100.0, 50));
        assert_eq!(input.flush().events.swipe(), None);
    }

    #[test]
    fn horizontal_swipes_by_sign() {
        let cfg = SyncConfig::default();
        let mut input = InputAggregator::new(&cfg);
        input.record(down(100.0, 100.0, 0));
        input.record(up(200.0, 120.0, 50));
        assert_eq!(input.flush().events.swipe(), Some(Swipe::Right));

        input.record(down(100.0, 100.0, 1000));
        input.record(up(0.0, 90.0, 1050));
        assert_eq!(input.flush().events.swipe(), Some(Swipe::Left));
    }

    // -----------------------------------------------------------------------
    // Wire shape
    // -----------------------------------------------------------------------

    #[test]
    fn snapshot_serializes_wire_names() {
        let mut input = InputAggregator::default();
        input.record(InputEvent::KeyDown("space".into()));
        input.record(InputEvent::Tap {
            count: 2,
            x: 3.0,
            y: 4.0,
        });
        input.record(InputEvent::ActorTap(EntityId::Num(7)));
        input.record(InputEvent::Message("hi".into()));
        let v = serde_json::to_value(input.flush()).unwrap();

        assert_eq!(v["keyboard"], json!({"space": true}));
        assert_eq!(v["events"]["keydown"], json!({"space": true}));
        assert_eq!(v["events"]["tap_2"], json!({"x": 3.0, "y": 4.0}));
        assert_eq!(v["events"]["actortap"], json!({"id": 7}));
        assert_eq!(v["events"]["message"], json!("hi"));
        assert!(v["events"].get("swipeup").is_none());
    }

    #[test]
    fn reset_forgets_everything() {
        let mut input = InputAggregator::default();
        input.record(InputEvent::KeyDown("a".into()));
        input.record(down(1.0, 1.0, 0));
        input.reset();
        assert!(input.held_keys().is_empty());
        assert!(input.pointers().is_empty());
        assert!(!input.is_dirty());
    }
}
