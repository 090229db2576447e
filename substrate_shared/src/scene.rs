//! Scene composition.
//!
//! A scene binds one entity pool to one scheduler and one renderer handle.
//! `activate` registers an update closure (per-entity behavior, then the
//! scene's own `on_update` hook) and a render closure (clear to the scene
//! background, draw every pooled entity, then `on_render`). `destroy`
//! deregisters both closures before touching the pool, so no stale callback
//! can ever observe a half-destroyed pool. A destroyed scene is terminal; a
//! fresh scene must be built to reuse the slot.
//!
//! Scene management is a caller-owned [`SceneManager`] passed by reference
//! to whoever switches scenes; there is no process-wide singleton.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::anyhow;
use tracing::{info, warn};

use crate::entity::{Entity, EntityRecord, Shape};
use crate::error::PoolError;
use crate::pool::EntityPool;
use crate::render::{DrawStyle, Renderer};
use crate::scheduler::{CallbackId, GameLoop};

type UpdateHook = Box<dyn FnMut(f32) + Send>;
type RenderHook = Box<dyn FnMut() + Send>;
type DestroyHook = Box<dyn FnMut() + Send>;

/// One entity pool + renderer pair driven by a scheduler.
pub struct Scene {
    pool: Arc<Mutex<EntityPool>>,
    renderer: Arc<Mutex<dyn Renderer>>,
    background: String,
    is_active: bool,
    destroyed: bool,

    update_cb: Option<CallbackId>,
    render_cb: Option<CallbackId>,

    on_update: Option<UpdateHook>,
    on_render: Option<RenderHook>,
    on_destroy: Option<DestroyHook>,
}

fn lock_ignore_poison<T: ?Sized>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Scene {
    /// Constructs an inactive scene with an empty pool.
    pub fn new(renderer: Arc<Mutex<dyn Renderer>>) -> Self {
        Self {
            pool: Arc::new(Mutex::new(EntityPool::new())),
            renderer,
            background: "#000000".to_string(),
            is_active: false,
            destroyed: false,
            update_cb: None,
            render_cb: None,
            on_update: None,
            on_render: None,
            on_destroy: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    /// Color the surface is cleared to at the start of every render.
    pub fn set_background(&mut self, color: impl Into<String>) {
        self.background = color.into();
    }

    /// Shared handle to the scene's pool.
    pub fn pool(&self) -> Arc<Mutex<EntityPool>> {
        self.pool.clone()
    }

    pub fn add_entity(&self, entity: Entity) -> Result<(), PoolError> {
        lock_ignore_poison(&self.pool).add(entity)
    }

    pub fn remove_entity(&self, id: &str) -> bool {
        lock_ignore_poison(&self.pool).remove(id)
    }

    pub fn entity_record(&self, id: &str) -> Option<EntityRecord> {
        lock_ignore_poison(&self.pool).get(id).map(Entity::record)
    }

    /// Runs `f` with exclusive access to the pool.
    pub fn with_pool<R>(&self, f: impl FnOnce(&mut EntityPool) -> R) -> R {
        f(&mut lock_ignore_poison(&self.pool))
    }

    /// Scene-level hook run each frame after the per-entity updates.
    pub fn set_on_update(&mut self, f: impl FnMut(f32) + Send + 'static) {
        self.on_update = Some(Box::new(f));
    }

    /// Scene-level hook run each frame after all entities were drawn.
    pub fn set_on_render(&mut self, f: impl FnMut() + Send + 'static) {
        self.on_render = Some(Box::new(f));
    }

    pub fn set_on_destroy(&mut self, f: impl FnMut() + Send + 'static) {
        self.on_destroy = Some(Box::new(f));
    }

    /// Registers the scene's update/render closures with the scheduler.
    /// Warns and no-ops when already active or already destroyed.
    pub fn activate(&mut self, scheduler: &mut GameLoop) {
        if self.is_active {
            warn!("scene already active, activate ignored");
            return;
        }
        if self.destroyed {
            warn!("scene was destroyed, activate ignored; build a fresh scene");
            return;
        }

        let pool = self.pool.clone();
        let mut on_update = self.on_update.take();
        self.update_cb = Some(scheduler.add_update_callback(move |dt| {
            pool.lock()
                .map_err(|_| anyhow!("entity pool mutex poisoned"))?
                .tick(dt);
            if let Some(f) = on_update.as_mut() {
                f(dt);
            }
            Ok(())
        }));

        let pool = self.pool.clone();
        let renderer = self.renderer.clone();
        let background = self.background.clone();
        let mut on_render = self.on_render.take();
        self.render_cb = Some(scheduler.add_render_callback(move || {
            {
                let pool = pool
                    .lock()
                    .map_err(|_| anyhow!("entity pool mutex poisoned"))?;
                let mut renderer = renderer
                    .lock()
                    .map_err(|_| anyhow!("renderer mutex poisoned"))?;
                renderer.clear(&background);
                for entity in pool.iter() {
                    draw_entity(&mut *renderer, entity);
                }
            }
            if let Some(f) = on_render.as_mut() {
                f();
            }
            Ok(())
        }));

        self.is_active = true;
        info!("scene activated");
    }

    /// Deregisters the closures, tears the pool down, and fires
    /// `on_destroy`. Warns and no-ops when the scene is not active.
    /// Terminal: the scene cannot be reactivated afterwards.
    pub fn destroy(&mut self, scheduler: &mut GameLoop) {
        if !self.is_active {
            warn!("scene not active, destroy ignored");
            return;
        }

        // Deregistration first: after this point neither closure can fire,
        // so none observes the pool mid-teardown.
        if let Some(id) = self.update_cb.take() {
            scheduler.remove_update_callback(id);
        }
        if let Some(id) = self.render_cb.take() {
            scheduler.remove_render_callback(id);
        }

        lock_ignore_poison(&self.pool).destroy();

        self.is_active = false;
        self.destroyed = true;
        if let Some(f) = self.on_destroy.as_mut() {
            f();
        }
        info!("scene destroyed");
    }
}

/// Issues the draw call matching the entity's attributes: image first, then
/// shape (rect when unspecified). Entity location is the top-left corner.
fn draw_entity(renderer: &mut dyn Renderer, entity: &Entity) {
    let style = DrawStyle::of(entity);
    let size = entity.size();
    if let Some(src) = &entity.image_src {
        renderer.draw_image(src, entity.location, size, &style);
        return;
    }
    match entity.shape {
        Some(Shape::Circle) => {
            let center = entity.location + size * 0.5;
            let radius = size.x.min(size.y) * 0.5;
            renderer.draw_circle(center, radius, &style);
        }
        Some(Shape::Rect) | None => {
            renderer.draw_rect(entity.location, size, &style);
        }
    }
}

/// Caller-owned scene registry. Switching destroys and drops the previously
/// active scene (scenes are single-use) and activates the named one.
#[derive(Default)]
pub struct SceneManager {
    scenes: HashMap<String, Scene>,
    active: Option<String>,
}

impl SceneManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, scene: Scene) {
        self.scenes.insert(name.into(), scene);
    }

    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn scene(&self, name: &str) -> Option<&Scene> {
        self.scenes.get(name)
    }

    pub fn scene_mut(&mut self, name: &str) -> Option<&mut Scene> {
        self.scenes.get_mut(name)
    }

    /// Activates `name`, destroying whatever was active before. Returns
    /// false (with a warning) when no scene is registered under `name`.
    pub fn switch_to(&mut self, name: &str, scheduler: &mut GameLoop) -> bool {
        if !self.scenes.contains_key(name) {
            warn!(scene = %name, "no such scene registered");
            return false;
        }
        // Switching to the scene that is already active must not destroy it.
        if self.active.as_deref() == Some(name) {
            return true;
        }
        if let Some(prev) = self.active.take() {
            if let Some(mut scene) = self.scenes.remove(&prev) {
                scene.destroy(scheduler);
            }
        }
        if let Some(scene) = self.scenes.get_mut(name) {
            scene.activate(scheduler);
        }
        self.active = Some(name.to_string());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Vec2;
    use crate::render::{DrawCall, RecordingRenderer};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    fn entity(id: &str) -> Entity {
        Entity::new(id, Vec2::new(10.0, 20.0), Vec2::new(50.0, 50.0)).unwrap()
    }

    fn tick(game_loop: &mut GameLoop, t0: Instant, offset_ms: u64) {
        game_loop.tick_at(t0 + Duration::from_millis(offset_ms));
    }

    #[test]
    fn activate_registers_update_and_render() {
        let renderer = Arc::new(Mutex::new(RecordingRenderer::default()));
        let mut scene = Scene::new(renderer.clone());
        scene.set_background("#202020");

        let mut e = entity("p1");
        e.set_update(Box::new(|ent, dt| {
            ent.location.x += dt * 100.0;
        }));
        scene.add_entity(e).unwrap();

        let mut game_loop = GameLoop::new();
        scene.activate(&mut game_loop);

        let t0 = Instant::now();
        game_loop.start_at(t0, false);
        tick(&mut game_loop, t0, 100);

        // Entity moved via its own update function.
        let rec = scene.entity_record("p1").unwrap();
        assert!((rec.location[0] - 20.0).abs() < 1e-3);

        // Surface was cleared then the entity drawn.
        let guard = renderer.lock().unwrap();
        let calls = &guard.calls;
        assert_eq!(
            calls[0],
            DrawCall::Clear {
                color: "#202020".to_string()
            }
        );
        assert!(matches!(calls[1], DrawCall::Rect { .. }));
    }

    #[test]
    fn draw_call_matches_shape_and_image() {
        let renderer = Arc::new(Mutex::new(RecordingRenderer::default()));
        let scene = Scene::new(renderer.clone());

        let mut circle = entity("c");
        circle.shape = Some(Shape::Circle);
        scene.add_entity(circle).unwrap();

        let mut sprite = entity("s");
        sprite.image_src = Some("hero.png".to_string());
        scene.add_entity(sprite).unwrap();

        let mut game_loop = GameLoop::new();
        let mut scene = scene;
        scene.activate(&mut game_loop);
        let t0 = Instant::now();
        game_loop.start_at(t0, true);

        let calls = renderer.lock().unwrap().calls.clone();
        // clear, then circle, then image, in pool insertion order.
        assert!(matches!(
            calls[1],
            DrawCall::Circle { center, radius }
                if center == Vec2::new(35.0, 45.0) && radius == 25.0
        ));
        assert!(matches!(&calls[2], DrawCall::Image { src, .. } if src == "hero.png"));
    }

    #[test]
    fn scene_hooks_fire_after_entities() {
        let renderer: Arc<Mutex<dyn Renderer>> = Arc::new(Mutex::new(NullRendererForTest));
        let mut scene = Scene::new(renderer);
        let updates = Arc::new(AtomicUsize::new(0));
        let renders = Arc::new(AtomicUsize::new(0));
        {
            let updates = updates.clone();
            scene.set_on_update(move |_| {
                updates.fetch_add(1, Ordering::SeqCst);
            });
        }
        {
            let renders = renders.clone();
            scene.set_on_render(move || {
                renders.fetch_add(1, Ordering::SeqCst);
            });
        }

        let mut game_loop = GameLoop::new();
        scene.activate(&mut game_loop);
        let t0 = Instant::now();
        game_loop.start_at(t0, false);
        tick(&mut game_loop, t0, 16);
        tick(&mut game_loop, t0, 32);

        assert_eq!(updates.load(Ordering::SeqCst), 2);
        assert_eq!(renders.load(Ordering::SeqCst), 2);
    }

    struct NullRendererForTest;
    impl Renderer for NullRendererForTest {
        fn clear(&mut self, _color: &str) {}
        fn draw_rect(&mut self, _l: Vec2, _s: Vec2, _st: &DrawStyle) {}
        fn draw_circle(&mut self, _c: Vec2, _r: f32, _st: &DrawStyle) {}
        fn draw_image(&mut self, _src: &str, _l: Vec2, _s: Vec2, _st: &DrawStyle) {}
    }

    #[test]
    fn destroy_deregisters_before_pool_teardown() {
        let renderer: Arc<Mutex<dyn Renderer>> = Arc::new(Mutex::new(NullRendererForTest));
        let mut scene = Scene::new(renderer);
        scene.add_entity(entity("p1")).unwrap();

        let destroyed = Arc::new(AtomicUsize::new(0));
        {
            let destroyed = destroyed.clone();
            scene.set_on_destroy(move || {
                destroyed.fetch_add(1, Ordering::SeqCst);
            });
        }

        let mut game_loop = GameLoop::new();
        scene.activate(&mut game_loop);
        let t0 = Instant::now();
        game_loop.start_at(t0, false);
        tick(&mut game_loop, t0, 16);

        scene.destroy(&mut game_loop);
        assert!(!scene.is_active());
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
        assert!(scene.with_pool(|p| p.is_empty()));

        // The scene's closures are gone: further ticks touch nothing.
        tick(&mut game_loop, t0, 32);
        assert!(scene.with_pool(|p| p.is_empty()));

        // Guards: double destroy and post-destroy activate are no-ops.
        scene.destroy(&mut game_loop);
        scene.activate(&mut game_loop);
        assert!(!scene.is_active());
    }

    #[test]
    fn activate_twice_warns_and_keeps_one_registration() {
        let renderer: Arc<Mutex<dyn Renderer>> = Arc::new(Mutex::new(NullRendererForTest));
        let mut scene = Scene::new(renderer);
        let updates = Arc::new(AtomicUsize::new(0));
        {
            let updates = updates.clone();
            scene.set_on_update(move |_| {
                updates.fetch_add(1, Ordering::SeqCst);
            });
        }

        let mut game_loop = GameLoop::new();
        scene.activate(&mut game_loop);
        scene.activate(&mut game_loop); // ignored

        let t0 = Instant::now();
        game_loop.start_at(t0, false);
        tick(&mut game_loop, t0, 16);
        assert_eq!(updates.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn manager_switches_and_destroys_previous() {
        let renderer: Arc<Mutex<dyn Renderer>> = Arc::new(Mutex::new(NullRendererForTest));
        let mut game_loop = GameLoop::new();
        let mut manager = SceneManager::new();

        let menu = Scene::new(renderer.clone());
        let mut game = Scene::new(renderer.clone());
        let game_destroyed = Arc::new(AtomicUsize::new(0));
        {
            let game_destroyed = game_destroyed.clone();
            game.set_on_destroy(move || {
                game_destroyed.fetch_add(1, Ordering::SeqCst);
            });
        }

        manager.insert("menu", menu);
        manager.insert("game", game);

        assert!(manager.switch_to("game", &mut game_loop));
        assert_eq!(manager.active(), Some("game"));

        assert!(manager.switch_to("menu", &mut game_loop));
        assert_eq!(manager.active(), Some("menu"));
        assert_eq!(game_destroyed.load(Ordering::SeqCst), 1);
        // The destroyed scene was dropped from the registry.
        assert!(manager.scene("game").is_none());

        assert!(!manager.switch_to("ghost", &mut game_loop));
        assert_eq!(manager.active(), Some("menu"));
    }

    #[test]
    fn switching_to_the_active_scene_keeps_it_alive() {
        let renderer: Arc<Mutex<dyn Renderer>> = Arc::new(Mutex::new(NullRendererForTest));
        let mut game_loop = GameLoop::new();
        let mut manager = SceneManager::new();

        let mut game = Scene::new(renderer);
        let destroyed = Arc::new(AtomicUsize::new(0));
        {
            let destroyed = destroyed.clone();
            game.set_on_destroy(move || {
                destroyed.fetch_add(1, Ordering::SeqCst);
            });
        }
        manager.insert("game", game);
        assert!(manager.switch_to("game", &mut game_loop));

        // A repeat switch is a no-op: the scene stays registered, active,
        // and undestroyed.
        assert!(manager.switch_to("game", &mut game_loop));
        assert_eq!(manager.active(), Some("game"));
        assert!(manager.scene("game").is_some());
        assert!(manager.scene("game").unwrap().is_active());
        assert_eq!(destroyed.load(Ordering::SeqCst), 0);
    }
}
