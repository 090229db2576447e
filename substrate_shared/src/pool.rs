//! Entity pool: exclusive owner and lifecycle manager of a set of entities.
//!
//! The pool maps id -> entity and preserves insertion order for iteration.
//! Removed-for-reuse entities live on a free list (a LIFO stack of whole
//! `Entity` values); popping one back out of `get_or_create` keeps the
//! instance and its heap allocations alive across churn-heavy spawns
//! (projectiles, particles).
//!
//! All mutation goes through pool operations. Snapshots handed out by
//! [`EntityPool::records`] and the filters are copies; mutating them never
//! affects pool state.

use std::collections::HashMap;

use tracing::warn;

use crate::entity::{Entity, EntityRecord, Shape};
use crate::error::PoolError;
use crate::math::Vec2;

/// How a batch operation reacts to a failing item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    /// Stop at the first failure and return it. Items already applied stay.
    Abort,
    /// Log each failure and continue with the remaining items.
    Ignore,
}

type EntityHook = Box<dyn FnMut(&Entity) + Send>;
type PoolHook = Box<dyn FnMut() + Send>;

/// Ordered, hook-observable collection of entities plus a free list.
#[derive(Default)]
pub struct EntityPool {
    entities: HashMap<String, Entity>,
    /// Insertion order of the ids in `entities`.
    order: Vec<String>,
    /// Recycled entities available for reuse. An entity is never in here
    /// and in `entities` at the same time.
    free: Vec<Entity>,

    on_add: Option<EntityHook>,
    on_remove: Option<EntityHook>,
    on_clear: Option<PoolHook>,
    on_recycle: Option<EntityHook>,
    on_reuse: Option<EntityHook>,
}

impl EntityPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores an entity. Ids must be unique within the pool.
    pub fn add(&mut self, entity: Entity) -> Result<(), PoolError> {
        let id = entity.id().to_string();
        if self.entities.contains_key(&id) {
            return Err(PoolError::DuplicateId(id));
        }
        self.order.push(id.clone());
        self.entities.insert(id.clone(), entity);
        if let Some(hook) = &mut self.on_add {
            hook(&self.entities[&id]);
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Entity> {
        self.entities.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Entity> {
        self.entities.get_mut(id)
    }

    pub fn has(&self, id: &str) -> bool {
        self.entities.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Number of recycled entities waiting for reuse.
    pub fn free_len(&self) -> usize {
        self.free.len()
    }

    /// Iterates entities in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.order.iter().filter_map(|id| self.entities.get(id))
    }

    /// Ordered snapshot copy of all entities.
    pub fn records(&self) -> Vec<EntityRecord> {
        self.iter().map(Entity::record).collect()
    }

    /// Runs every entity's own update function, in insertion order.
    pub fn tick(&mut self, dt: f32) {
        // Ids are cloned up front so an update function mutating its entity
        // cannot invalidate the iteration.
        let ids: Vec<String> = self.order.clone();
        for id in ids {
            if let Some(entity) = self.entities.get_mut(&id) {
                if let Some(mut f) = entity.take_update() {
                    f(entity, dt);
                    entity.restore_update(Some(f));
                }
            }
        }
    }

    /// Removes an entity, dropping it. Returns whether anything was removed.
    pub fn remove(&mut self, id: &str) -> bool {
        match self.entities.remove(id) {
            Some(entity) => {
                self.order.retain(|o| o != id);
                if let Some(hook) = &mut self.on_remove {
                    hook(&entity);
                }
                true
            }
            None => false,
        }
    }

    /// Adds a batch of entities. Returns the number applied.
    pub fn batch_add(
        &mut self,
        entities: Vec<Entity>,
        mode: BatchMode,
    ) -> Result<usize, PoolError> {
        let mut applied = 0;
        for entity in entities {
            let id = entity.id().to_string();
            match self.add(entity) {
                Ok(()) => applied += 1,
                Err(e) => match mode {
                    BatchMode::Abort => return Err(e),
                    BatchMode::Ignore => {
                        warn!(id = %id, error = %e, "batch_add: skipping entity");
                    }
                },
            }
        }
        Ok(applied)
    }

    /// Removes a batch of ids. Returns the number removed.
    pub fn batch_remove(&mut self, ids: &[&str], mode: BatchMode) -> Result<usize, PoolError> {
        let mut removed = 0;
        for id in ids {
            if self.remove(id) {
                removed += 1;
            } else {
                match mode {
                    BatchMode::Abort => return Err(PoolError::UnknownId(id.to_string())),
                    BatchMode::Ignore => {
                        warn!(id = %id, "batch_remove: no such entity");
                    }
                }
            }
        }
        Ok(removed)
    }

    /// Removes all entities (firing `on_remove` for each) then fires
    /// `on_clear`. No-op on an empty pool.
    pub fn clear(&mut self) {
        if self.entities.is_empty() {
            return;
        }
        for id in std::mem::take(&mut self.order) {
            if let Some(entity) = self.entities.remove(&id) {
                if let Some(hook) = &mut self.on_remove {
                    hook(&entity);
                }
            }
        }
        if let Some(hook) = &mut self.on_clear {
            hook();
        }
    }

    /// Moves an entity from the active set onto the free list.
    pub fn recycle(&mut self, id: &str) -> Result<(), PoolError> {
        let entity = self
            .entities
            .remove(id)
            .ok_or_else(|| PoolError::UnknownId(id.to_string()))?;
        self.order.retain(|o| o != id);
        if let Some(hook) = &mut self.on_recycle {
            hook(&entity);
        }
        self.free.push(entity);
        Ok(())
    }

    /// Pops a recycled entity (applying `reset` to restore a valid default
    /// state) or builds a fresh one with `create`. The returned entity is
    /// not in the pool; callers configure it and `add` it back.
    pub fn get_or_create(
        &mut self,
        create: impl FnOnce() -> Entity,
        reset: impl FnOnce(&mut Entity),
    ) -> Entity {
        match self.free.pop() {
            Some(mut entity) => {
                reset(&mut entity);
                if let Some(hook) = &mut self.on_reuse {
                    hook(&entity);
                }
                entity
            }
            None => create(),
        }
    }

    /// Entities with the given shape, in insertion order.
    pub fn filter_by_shape(&self, shape: Shape) -> Vec<EntityRecord> {
        self.iter()
            .filter(|e| e.shape == Some(shape))
            .map(Entity::record)
            .collect()
    }

    /// Entities whose location falls within the axis-aligned range.
    pub fn filter_by_location_range(
        &self,
        min: Vec2,
        max: Vec2,
    ) -> Result<Vec<EntityRecord>, PoolError> {
        if min.x > max.x {
            return Err(PoolError::InvalidRange {
                what: "location x",
                min: min.x,
                max: max.x,
            });
        }
        if min.y > max.y {
            return Err(PoolError::InvalidRange {
                what: "location y",
                min: min.y,
                max: max.y,
            });
        }
        Ok(self
            .iter()
            .filter(|e| {
                let l = e.location;
                l.x >= min.x && l.x <= max.x && l.y >= min.y && l.y <= max.y
            })
            .map(Entity::record)
            .collect())
    }

    /// Entities whose opacity falls within `[min, max]`. Entities without
    /// an explicit opacity render fully opaque and count as 1.0.
    pub fn filter_by_opacity(&self, min: f32, max: f32) -> Result<Vec<EntityRecord>, PoolError> {
        if min > max {
            return Err(PoolError::InvalidRange {
                what: "opacity",
                min,
                max,
            });
        }
        Ok(self
            .iter()
            .filter(|e| {
                let o = e.opacity().unwrap_or(1.0);
                o >= min && o <= max
            })
            .map(Entity::record)
            .collect())
    }

    pub fn set_on_add(&mut self, f: impl FnMut(&Entity) + Send + 'static) {
        self.on_add = Some(Box::new(f));
    }

    pub fn set_on_remove(&mut self, f: impl FnMut(&Entity) + Send + 'static) {
        self.on_remove = Some(Box::new(f));
    }

    pub fn set_on_clear(&mut self, f: impl FnMut() + Send + 'static) {
        self.on_clear = Some(Box::new(f));
    }

    pub fn set_on_recycle(&mut self, f: impl FnMut(&Entity) + Send + 'static) {
        self.on_recycle = Some(Box::new(f));
    }

    pub fn set_on_reuse(&mut self, f: impl FnMut(&Entity) + Send + 'static) {
        self.on_reuse = Some(Box::new(f));
    }

    /// Full teardown: clears the active set, drops the free list, and
    /// detaches every hook.
    pub fn destroy(&mut self) {
        self.destroy_with(|_| {});
    }

    /// Like [`destroy`](Self::destroy), invoking `teardown` for each
    /// recycled entity drained from the free list.
    pub fn destroy_with(&mut self, mut teardown: impl FnMut(Entity)) {
        self.clear();
        for entity in self.free.drain(..) {
            teardown(entity);
        }
        self.on_add = None;
        self.on_remove = None;
        self.on_clear = None;
        self.on_recycle = None;
        self.on_reuse = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn entity(id: &str) -> Entity {
        Entity::new(id, Vec2::ZERO, Vec2::new(50.0, 50.0)).unwrap()
    }

    #[test]
    fn add_get_remove_roundtrip() {
        let mut pool = EntityPool::new();
        pool.add(entity("p1")).unwrap();
        assert!(pool.has("p1"));
        assert_eq!(pool.get("p1").unwrap().location, Vec2::ZERO);
        assert!(pool.remove("p1"));
        assert!(!pool.has("p1"));
        assert!(!pool.remove("p1"));
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let mut pool = EntityPool::new();
        pool.add(entity("p1")).unwrap();
        assert!(matches!(
            pool.add(entity("p1")),
            Err(PoolError::DuplicateId(_))
        ));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn ids_are_reusable_after_removal() {
        let mut pool = EntityPool::new();
        pool.add(entity("p1")).unwrap();
        assert!(pool.remove("p1"));
        pool.add(entity("p1")).unwrap();
        assert!(pool.has("p1"));
    }

    #[test]
    fn records_is_an_ordered_snapshot_copy() {
        let mut pool = EntityPool::new();
        pool.add(entity("a")).unwrap();
        pool.add(entity("b")).unwrap();
        pool.add(entity("c")).unwrap();

        let mut snap = pool.records();
        assert_eq!(
            snap.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
            ["a", "b", "c"]
        );

        // Mutating the snapshot must not leak into the pool.
        snap.clear();
        assert_eq!(pool.records().len(), 3);

        let mut snap = pool.records();
        snap[0].location = [99.0, 99.0];
        assert_eq!(pool.get("a").unwrap().location, Vec2::ZERO);
    }

    #[test]
    fn insertion_order_survives_removal() {
        let mut pool = EntityPool::new();
        for id in ["a", "b", "c", "d"] {
            pool.add(entity(id)).unwrap();
        }
        pool.remove("b");
        assert_eq!(
            pool.records().iter().map(|r| r.id.clone()).collect::<Vec<_>>(),
            ["a", "c", "d"]
        );
    }

    #[test]
    fn batch_add_abort_keeps_earlier_items() {
        let mut pool = EntityPool::new();
        let batch = vec![entity("a"), entity("b"), entity("b"), entity("c")];
        let err = pool.batch_add(batch, BatchMode::Abort).unwrap_err();
        assert!(matches!(err, PoolError::DuplicateId(id) if id == "b"));
        // a and the first b were applied; c never was.
        assert_eq!(pool.len(), 2);
        assert!(!pool.has("c"));
    }

    #[test]
    fn batch_add_ignore_counts_successes() {
        let mut pool = EntityPool::new();
        let batch = vec![entity("a"), entity("a"), entity("b")];
        let n = pool.batch_add(batch, BatchMode::Ignore).unwrap();
        assert_eq!(n, 2);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn batch_remove_modes() {
        let mut pool = EntityPool::new();
        pool.add(entity("a")).unwrap();
        pool.add(entity("b")).unwrap();

        let err = pool
            .batch_remove(&["a", "ghost", "b"], BatchMode::Abort)
            .unwrap_err();
        assert!(matches!(err, PoolError::UnknownId(id) if id == "ghost"));
        assert!(!pool.has("a"));
        assert!(pool.has("b"));

        let n = pool
            .batch_remove(&["b", "ghost"], BatchMode::Ignore)
            .unwrap();
        assert_eq!(n, 1);
        assert!(pool.is_empty());
    }

    #[test]
    fn clear_fires_hooks_and_is_noop_when_empty() {
        let removed = Arc::new(AtomicUsize::new(0));
        let cleared = Arc::new(AtomicUsize::new(0));
        let mut pool = EntityPool::new();
        {
            let removed = removed.clone();
            pool.set_on_remove(move |_| {
                removed.fetch_add(1, Ordering::SeqCst);
            });
        }
        {
            let cleared = cleared.clone();
            pool.set_on_clear(move || {
                cleared.fetch_add(1, Ordering::SeqCst);
            });
        }

        pool.clear(); // empty: no hooks
        assert_eq!(cleared.load(Ordering::SeqCst), 0);

        pool.add(entity("a")).unwrap();
        pool.add(entity("b")).unwrap();
        pool.clear();
        assert_eq!(removed.load(Ordering::SeqCst), 2);
        assert_eq!(cleared.load(Ordering::SeqCst), 1);
        assert!(pool.is_empty());
    }

    #[test]
    fn recycle_then_get_or_create_reuses_the_instance() {
        let mut pool = EntityPool::new();
        pool.add(entity("p1")).unwrap();
        pool.get_mut("p1").unwrap().set_extra("hp", json!(1));

        pool.recycle("p1").unwrap();
        assert!(!pool.has("p1"));
        assert_eq!(pool.free_len(), 1);

        let reused = pool.get_or_create(
            || panic!("free list should be preferred"),
            |e| {
                e.location = Vec2::ZERO;
                e.set_extra("reset", json!(true));
            },
        );
        // Same instance: the hp marker from before recycling is still there.
        assert_eq!(reused.extra("hp"), Some(&json!(1)));
        assert_eq!(reused.extra("reset"), Some(&json!(true)));
        assert_eq!(pool.free_len(), 0);

        // Empty free list falls back to the factory.
        let fresh = pool.get_or_create(|| entity("p2"), |_| panic!("nothing to reset"));
        assert_eq!(fresh.id(), "p2");
    }

    #[test]
    fn recycle_unknown_id_fails() {
        let mut pool = EntityPool::new();
        assert!(matches!(
            pool.recycle("ghost"),
            Err(PoolError::UnknownId(_))
        ));
    }

    #[test]
    fn recycle_fires_hook_and_reuse_fires_hook() {
        let recycled = Arc::new(AtomicUsize::new(0));
        let reused = Arc::new(AtomicUsize::new(0));
        let mut pool = EntityPool::new();
        {
            let recycled = recycled.clone();
            pool.set_on_recycle(move |_| {
                recycled.fetch_add(1, Ordering::SeqCst);
            });
        }
        {
            let reused = reused.clone();
            pool.set_on_reuse(move |_| {
                reused.fetch_add(1, Ordering::SeqCst);
            });
        }

        pool.add(entity("p1")).unwrap();
        pool.recycle("p1").unwrap();
        assert_eq!(recycled.load(Ordering::SeqCst), 1);

        let _ = pool.get_or_create(|| entity("fresh"), |_| {});
        assert_eq!(reused.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn filters_validate_ranges_and_copy() {
        let mut pool = EntityPool::new();
        let mut a = entity("a");
        a.location = Vec2::new(10.0, 10.0);
        a.shape = Some(Shape::Rect);
        pool.add(a).unwrap();

        let mut b = entity("b");
        b.location = Vec2::new(100.0, 100.0);
        b.shape = Some(Shape::Circle);
        b.set_opacity(0.25).unwrap();
        pool.add(b).unwrap();

        assert_eq!(pool.filter_by_shape(Shape::Circle).len(), 1);

        let hits = pool
            .filter_by_location_range(Vec2::ZERO, Vec2::new(50.0, 50.0))
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");

        assert!(matches!(
            pool.filter_by_location_range(Vec2::new(5.0, 0.0), Vec2::new(0.0, 5.0)),
            Err(PoolError::InvalidRange { what: "location x", .. })
        ));

        // a has no explicit opacity and counts as 1.0.
        let opaque = pool.filter_by_opacity(0.5, 1.0).unwrap();
        assert_eq!(opaque.len(), 1);
        assert_eq!(opaque[0].id, "a");

        assert!(pool.filter_by_opacity(0.9, 0.1).is_err());
    }

    #[test]
    fn tick_runs_each_entity_update_with_dt() {
        let mut pool = EntityPool::new();
        let mut e = entity("mover");
        e.set_update(Box::new(|ent, dt| {
            ent.location.x += dt * 10.0;
        }));
        pool.add(e).unwrap();
        pool.add(entity("static")).unwrap();

        pool.tick(0.5);
        assert_eq!(pool.get("mover").unwrap().location.x, 5.0);
        assert_eq!(pool.get("static").unwrap().location.x, 0.0);
    }

    #[test]
    fn destroy_drains_free_list_and_detaches_hooks() {
        let removed = Arc::new(AtomicUsize::new(0));
        let torn_down = Arc::new(AtomicUsize::new(0));
        let mut pool = EntityPool::new();
        {
            let removed = removed.clone();
            pool.set_on_remove(move |_| {
                removed.fetch_add(1, Ordering::SeqCst);
            });
        }

        pool.add(entity("a")).unwrap();
        pool.add(entity("b")).unwrap();
        pool.recycle("a").unwrap();

        {
            let torn_down = torn_down.clone();
            pool.destroy_with(move |_| {
                torn_down.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(removed.load(Ordering::SeqCst), 1); // b
        assert_eq!(torn_down.load(Ordering::SeqCst), 1); // a, from the free list
        assert!(pool.is_empty());
        assert_eq!(pool.free_len(), 0);

        // Hooks are gone: adding again fires nothing.
        pool.add(entity("c")).unwrap();
        assert_eq!(removed.load(Ordering::SeqCst), 1);
    }
}
