//! `EntityReconciler`: local mirror of the actors the server says are visible.
//!
//! Two packet shapes are understood:
//!
//! | Shape    | Carries                        | Removal signal                    |
//! |----------|--------------------------------|-----------------------------------|
//! | delta    | `added`, `removed`, `changed`  | explicit, immediate               |
//! | snapshot | `inView` (whole visible set)   | absent for `eviction_threshold`   |
//! |          |                                | consecutive snapshots             |
//!
//! After every pass the live set is re-sorted into paint order and each
//! actor's mirroring is recomputed from its current descriptor. The
//! reconciler is owned by [`crate::SyncClient`] and is the only writer of the
//! actor map.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::assets::AssetCatalog;
use crate::error::ProtocolError;
use crate::protocol::{EntityDescriptor, FramePacket};
use crate::types::{EntityId, ReconcileMode, SyncConfig};

// ---------------------------------------------------------------------------
// Actor record
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Actor {
    pub id: EntityId,
    /// Last descriptor received, replaced wholesale on change.
    pub src: EntityDescriptor,
    pub frames_unseen: u32,
    /// Presentation flag derived from `src` on every pass.
    pub mirrored: bool,
    /// Creation serial; unchanged for the lifetime of the record.
    serial: u64,
}

impl Actor {
    fn new(src: EntityDescriptor, serial: u64) -> Self {
        Self {
            id: src.id.clone(),
            mirrored: src.sprite.mirror,
            src,
            frames_unseen: 0,
            serial,
        }
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn position(&self) -> (f64, f64, f64) {
        (self.src.x, self.src.y, self.src.z)
    }
}

/// Paint order: `z` ascending, then `x` ascending, then id.
pub fn paint_order(a: &Actor, b: &Actor) -> Ordering {
    a.src
        .z
        .total_cmp(&b.src.z)
        .then_with(|| a.src.x.total_cmp(&b.src.x))
        .then_with(|| a.id.cmp(&b.id))
}

/// What one reconciliation pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub added: usize,
    pub changed: usize,
    pub removed: usize,
    pub evicted: usize,
    pub skipped: usize,
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct EntityReconciler {
    actors: HashMap<EntityId, Actor>,
    /// Ids of `actors` in paint order.
    order: Vec<EntityId>,
    eviction_threshold: u32,
    mode: ReconcileMode,
    next_serial: u64,
}

impl Default for EntityReconciler {
    fn default() -> Self {
        Self::new(&SyncConfig::default())
    }
}

impl EntityReconciler {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            actors: HashMap::new(),
            order: Vec::new(),
            eviction_threshold: config.eviction_threshold,
            mode: config.reconcile_mode,
            next_serial: 0,
        }
    }

    pub fn mode(&self) -> ReconcileMode {
        self.mode
    }

    /// Apply one packet, dispatching on the configured mode.
    pub fn apply(
        &mut self,
        packet: &FramePacket,
        catalog: &AssetCatalog,
    ) -> Result<ReconcileReport, ProtocolError> {
        match (self.mode, packet.is_delta()) {
            (ReconcileMode::Auto, true) | (ReconcileMode::Delta, true) => {
                Ok(self.apply_delta(packet, catalog))
            }
            (ReconcileMode::Auto, false) | (ReconcileMode::Snapshot, false) => {
                let empty = Vec::new();
                let in_view = packet.in_view.as_ref().unwrap_or(&empty);
                Ok(self.apply_snapshot(in_view, catalog))
            }
            (ReconcileMode::Delta, false) => Err(ProtocolError::UnexpectedShape {
                expected: "delta",
                found: "snapshot",
            }),
            (ReconcileMode::Snapshot, true) => Err(ProtocolError::UnexpectedShape {
                expected: "snapshot",
                found: "delta",
            }),
        }
    }

    /// Explicit removals first, then additions, then in-place changes.
    pub fn apply_delta(&mut self, packet: &FramePacket, catalog: &AssetCatalog) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        for r in packet.removed.iter().flatten() {
            if self.actors.remove(&r.id).is_some() {
                report.removed += 1;
            }
        }

        for desc in packet.added.iter().flatten() {
            if !self.admit(desc, catalog) {
                report.skipped += 1;
                continue;
            }
            self.upsert(desc.clone());
            report.added += 1;
        }

        for desc in packet.changed.iter().flatten() {
            if !self.admit(desc, catalog) {
                report.skipped += 1;
                continue;
            }
            if !self.actors.contains_key(&desc.id) {
                log::debug!("[reconciler] change for unknown actor {}; creating", desc.id);
            }
            self.upsert(desc.clone());
            report.changed += 1;
        }

        self.finish_pass();
        report
    }

    /// Treat `in_view` as the complete visible set.
    pub fn apply_snapshot(
        &mut self,
        in_view: &[EntityDescriptor],
        catalog: &AssetCatalog,
    ) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let mut seen: HashSet<EntityId> = HashSet::with_capacity(in_view.len());

        for desc in in_view {
            seen.insert(desc.id.clone());
            if !self.admit(desc, catalog) {
                report.skipped += 1;
                if let Some(actor) = self.actors.get_mut(&desc.id) {
                    actor.frames_unseen = 0;
                }
                continue;
            }
            if self.actors.contains_key(&desc.id) {
                report.changed += 1;
            } else {
                report.added += 1;
            }
            self.upsert(desc.clone());
        }

        let threshold = self.eviction_threshold;
        let before = self.actors.len();
        self.actors.retain(|id, actor| {
            if seen.contains(id) {
                return true;
            }
            actor.frames_unseen += 1;
            actor.frames_unseen < threshold
        });
        report.evicted = before - self.actors.len();

        self.finish_pass();
        report
    }

    /// Drop every actor (forward, disconnect).
    pub fn clear(&mut self) {
        self.actors.clear();
        self.order.clear();
    }

    pub fn get(&self, id: &EntityId) -> Option<&Actor> {
        self.actors.get(id)
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.actors.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.actors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }

    /// Live actors in paint order.
    pub fn actors(&self) -> Vec<&Actor> {
        self.order.iter().filter_map(|id| self.actors.get(id)).collect()
    }

    pub fn ids(&self) -> &[EntityId] {
        &self.order
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Descriptors naming a sprite must resolve against the catalog.
    /// An empty sprite name means the actor draws nothing and is always admitted.
    fn admit(&self, desc: &EntityDescriptor, catalog: &AssetCatalog) -> bool {
        if desc.sprite.name.is_empty() {
            return true;
        }
        match catalog.resolve(&desc.sprite) {
            Ok(_) => true,
            Err(e) => {
                log::warn!("[reconciler] skipping actor {}: {}", desc.id, e);
                false
            }
        }
    }

    fn upsert(&mut self, desc: EntityDescriptor) {
        match self.actors.get_mut(&desc.id) {
            Some(actor) => {
                actor.src = desc;
                actor.frames_unseen = 0;
            }
            None => {
                let serial = self.next_serial;
                self.next_serial += 1;
                self.actors.insert(desc.id.clone(), Actor::new(desc, serial));
            }
        }
    }

    fn finish_pass(&mut self) {
        for actor in self.actors.values_mut() {
            actor.mirrored = actor.src.sprite.mirror;
        }
        let actors = &self.actors;
        let mut order: Vec<EntityId> = actors.keys().cloned().collect();
        order.sort_by(|a, b| paint_order(&actors[a], &actors[b]));
        self.order = order;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::SpriteSheet;
    use crate::protocol::SpriteRef;

    fn catalog() -> AssetCatalog {
        let mut c = AssetCatalog::new();
        let sheet = SpriteSheet {
            frame_count: 1,
            frame_speed: 0.0,
            single_image: true,
            x_offset: 0.0,
            y_offset: 0.0,
            width: None,
            height: None,
            images: vec!["/ship.png".into()],
        };
        c.insert("ship", "default", sheet);
        c
    }

    fn ship(id: u64, x: f64, z: f64) -> EntityDescriptor {
        EntityDescriptor::new(id, SpriteRef::new("ship", "default")).at(x, 0.0, z)
    }

    #[test]
    fn delta_skips_unknown_sprite_but_keeps_batch() {
        let mut r = EntityReconciler::default();
        let bad = EntityDescriptor::new(2u64, SpriteRef::new("ghost", "default"));
        let report = r.apply_delta(&FramePacket::delta(vec![ship(1, 0.0, 0.0), bad], vec![], vec![]), &catalog());
        assert_eq!(report.added, 1);
        assert_eq!(report.skipped, 1);
        assert!(r.contains(&EntityId::Num(1)));
        assert!(!r.contains(&EntityId::Num(2)));
    }

    #[test]
    fn forced_modes_reject_other_shape() {
        let mut r = EntityReconciler::new(&SyncConfig {
            reconcile_mode: ReconcileMode::Delta,
            ..Default::default()
        });
        assert!(matches!(
            r.apply(&FramePacket::snapshot(vec![]), &catalog()),
            Err(ProtocolError::UnexpectedShape { expected: "delta", .. })
        ));

        let mut r = EntityReconciler::new(&SyncConfig {
            reconcile_mode: ReconcileMode::Snapshot,
            ..Default::default()
        });
        assert!(r
            .apply(&FramePacket::delta(vec![ship(1, 0.0, 0.0)], vec![], vec![]), &catalog())
            .is_err());
        assert!(r.is_empty());
    }

    #[test]
    fn auto_treats_empty_packet_as_snapshot() {
        let mut r = EntityReconciler::default();
        r.apply(&FramePacket::snapshot(vec![ship(1, 0.0, 0.0)]), &catalog())
            .unwrap();
        let report = r.apply(&FramePacket::default(), &catalog()).unwrap();
        assert_eq!(report.evicted, 0);
        assert_eq!(r.get(&EntityId::Num(1)).unwrap().frames_unseen, 1);
    }

    #[test]
    fn mirroring_follows_latest_descriptor() {
        let mut r = EntityReconciler::default();
        let mut d = ship(1, 0.0, 0.0);
        d.sprite.mirror = true;
        r.apply(&FramePacket::snapshot(vec![d.clone()]), &catalog()).unwrap();
        assert!(r.get(&EntityId::Num(1)).unwrap().mirrored);

        d.sprite.mirror = false;
        r.apply(&FramePacket::delta(vec![], vec![], vec![d]), &catalog())
            .unwrap();
        assert!(!r.get(&EntityId::Num(1)).unwrap().mirrored);
    }

    #[test]
    fn ties_on_z_and_x_break_by_id() {
        let mut r = EntityReconciler::default();
        r.apply(
            &FramePacket::snapshot(vec![ship(9, 1.0, 0.0), ship(4, 1.0, 0.0)]),
            &catalog(),
        )
        .unwrap();
        assert_eq!(r.ids(), &[EntityId::Num(4), EntityId::Num(9)]);
    }

    #[test]
    fn clear_empties_everything() {
        let mut r = EntityReconciler::default();
        r.apply(&FramePacket::snapshot(vec![ship(1, 0.0, 0.0)]), &catalog())
            .unwrap();
        r.clear();
        assert!(r.is_empty());
        assert!(r.actors().is_empty());
    }
}
