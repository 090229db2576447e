//! Rendering abstraction.
//!
//! This crate intentionally does not depend on a graphics backend. Scenes
//! consume a small drawing surface trait; a real implementation would sit on
//! a canvas/GPU, while tests use the no-op or recording renderers.

use crate::entity::{Border, Entity};
use crate::math::Vec2;

/// Visual attributes accompanying a draw call, derived from an entity.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DrawStyle {
    pub background: Option<String>,
    pub opacity: Option<f32>,
    pub rotation: Option<f32>,
    pub border: Option<Border>,
}

impl DrawStyle {
    pub fn of(entity: &Entity) -> Self {
        Self {
            background: entity.background.clone(),
            opacity: entity.opacity(),
            rotation: entity.rotation,
            border: entity.border().cloned(),
        }
    }
}

/// A minimal 2D drawing surface.
pub trait Renderer: Send {
    /// Clears the whole surface to a solid color.
    fn clear(&mut self, color: &str);
    fn draw_rect(&mut self, location: Vec2, size: Vec2, style: &DrawStyle);
    fn draw_circle(&mut self, center: Vec2, radius: f32, style: &DrawStyle);
    fn draw_image(&mut self, src: &str, location: Vec2, size: Vec2, style: &DrawStyle);
}

/// A no-op renderer useful for headless runs.
#[derive(Default)]
pub struct NullRenderer;

impl Renderer for NullRenderer {
    fn clear(&mut self, _color: &str) {}
    fn draw_rect(&mut self, _location: Vec2, _size: Vec2, _style: &DrawStyle) {}
    fn draw_circle(&mut self, _center: Vec2, _radius: f32, _style: &DrawStyle) {}
    fn draw_image(&mut self, _src: &str, _location: Vec2, _size: Vec2, _style: &DrawStyle) {}
}

/// One captured draw call.
#[derive(Debug, Clone, PartialEq)]
pub enum DrawCall {
    Clear { color: String },
    Rect { location: Vec2, size: Vec2 },
    Circle { center: Vec2, radius: f32 },
    Image { src: String, location: Vec2 },
}

/// Records draw calls for assertions in tests.
#[derive(Default)]
pub struct RecordingRenderer {
    pub calls: Vec<DrawCall>,
}

impl Renderer for RecordingRenderer {
    fn clear(&mut self, color: &str) {
        self.calls.push(DrawCall::Clear {
            color: color.to_string(),
        });
    }

    fn draw_rect(&mut self, location: Vec2, size: Vec2, _style: &DrawStyle) {
        self.calls.push(DrawCall::Rect { location, size });
    }

    fn draw_circle(&mut self, center: Vec2, radius: f32, _style: &DrawStyle) {
        self.calls.push(DrawCall::Circle { center, radius });
    }

    fn draw_image(&mut self, src: &str, location: Vec2, _size: Vec2, _style: &DrawStyle) {
        self.calls.push(DrawCall::Image {
            src: src.to_string(),
            location,
        });
    }
}
