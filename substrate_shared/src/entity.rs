//! Entities: positioned, sized, renderable game objects with stable ids.
//!
//! Two representations:
//! - [`Entity`] is the validated, pool-owned object. Size and opacity can
//!   only change through typed setters, so an entity in a pool is valid by
//!   construction. It may carry a per-entity update function invoked by the
//!   scene each frame.
//! - [`EntityRecord`] is the plain serde value used on the wire and for
//!   snapshots. Open extension fields live in an explicit `extras` side map
//!   rather than on the record itself.
//!
//! Reconciling an incoming record with a stored entity is always
//! validate-then-replace: the whole record is checked first and the entity
//! is untouched on failure. There is no silent shallow overwrite.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ValidationError;
use crate::math::Vec2;

/// Renderable shape of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Shape {
    Rect,
    Circle,
}

/// Border drawn around an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Border {
    pub width: f32,
    pub color: String,
}

/// Per-entity behavior, invoked once per frame with delta-time seconds.
pub type UpdateFn = Box<dyn FnMut(&mut Entity, f32) + Send>;

/// Wire/snapshot shape of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: String,
    pub location: [f32; 2],
    pub size: [f32; 2],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opacity: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotation: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub border: Option<Border>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shape: Option<Shape>,
    #[serde(rename = "imageSrc", skip_serializing_if = "Option::is_none")]
    pub image_src: Option<String>,
    /// Game-specific extension fields (hp, speed, ...).
    #[serde(flatten)]
    pub extras: Map<String, Value>,
}

impl EntityRecord {
    /// Bare record with just identity, position, and extents.
    pub fn new(id: impl Into<String>, location: [f32; 2], size: [f32; 2]) -> Self {
        Self {
            id: id.into(),
            location,
            size,
            background: None,
            opacity: None,
            rotation: None,
            border: None,
            shape: None,
            image_src: None,
            extras: Map::new(),
        }
    }

    /// Checks every field invariant. Field-specific errors, first violation wins.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.is_empty() {
            return Err(ValidationError::EmptyId);
        }
        let [x, y] = self.location;
        if !x.is_finite() || !y.is_finite() {
            return Err(ValidationError::NonFiniteLocation { x, y });
        }
        let [w, h] = self.size;
        if !w.is_finite() || !h.is_finite() || w <= 0.0 || h <= 0.0 {
            return Err(ValidationError::NonPositiveSize { w, h });
        }
        if let Some(o) = self.opacity {
            if !o.is_finite() || !(0.0..=1.0).contains(&o) {
                return Err(ValidationError::OpacityOutOfRange(o));
            }
        }
        if let Some(r) = self.rotation {
            if !r.is_finite() {
                return Err(ValidationError::NonFiniteRotation(r));
            }
        }
        if let Some(b) = &self.border {
            if !b.width.is_finite() || b.width < 0.0 {
                return Err(ValidationError::NegativeBorderWidth(b.width));
            }
        }
        Ok(())
    }
}

/// A validated game entity. Owned exclusively by at most one pool at a time.
pub struct Entity {
    id: String,
    pub location: Vec2,
    size: Vec2,
    pub background: Option<String>,
    opacity: Option<f32>,
    pub rotation: Option<f32>,
    border: Option<Border>,
    pub shape: Option<Shape>,
    pub image_src: Option<String>,
    extras: Map<String, Value>,
    update: Option<UpdateFn>,
}

impl Entity {
    /// Creates an entity, validating id and size.
    pub fn new(
        id: impl Into<String>,
        location: Vec2,
        size: Vec2,
    ) -> Result<Self, ValidationError> {
        let id = id.into();
        if id.is_empty() {
            return Err(ValidationError::EmptyId);
        }
        if !location.is_finite() {
            return Err(ValidationError::NonFiniteLocation {
                x: location.x,
                y: location.y,
            });
        }
        if !size.is_finite() || size.x <= 0.0 || size.y <= 0.0 {
            return Err(ValidationError::NonPositiveSize {
                w: size.x,
                h: size.y,
            });
        }
        Ok(Self {
            id,
            location,
            size,
            background: None,
            opacity: None,
            rotation: None,
            border: None,
            shape: None,
            image_src: None,
            extras: Map::new(),
            update: None,
        })
    }

    /// Builds a validated entity from a wire record.
    pub fn from_record(rec: &EntityRecord) -> Result<Self, ValidationError> {
        rec.validate()?;
        let mut e = Self::new(rec.id.clone(), rec.location.into(), rec.size.into())?;
        e.background = rec.background.clone();
        e.opacity = rec.opacity;
        e.rotation = rec.rotation;
        e.border = rec.border.clone();
        e.shape = rec.shape;
        e.image_src = rec.image_src.clone();
        e.extras = rec.extras.clone();
        Ok(e)
    }

    /// Snapshots the entity as a wire record.
    pub fn record(&self) -> EntityRecord {
        EntityRecord {
            id: self.id.clone(),
            location: self.location.into(),
            size: self.size.into(),
            background: self.background.clone(),
            opacity: self.opacity,
            rotation: self.rotation,
            border: self.border.clone(),
            shape: self.shape,
            image_src: self.image_src.clone(),
            extras: self.extras.clone(),
        }
    }

    /// Validate-then-replace merge. The record must carry the same id; on any
    /// validation failure the entity is left unchanged. The update function
    /// survives the merge.
    pub fn apply_record(&mut self, rec: &EntityRecord) -> Result<(), ValidationError> {
        rec.validate()?;
        if rec.id != self.id {
            return Err(ValidationError::IdMismatch {
                current: self.id.clone(),
                proposed: rec.id.clone(),
            });
        }
        self.location = rec.location.into();
        self.size = rec.size.into();
        self.background = rec.background.clone();
        self.opacity = rec.opacity;
        self.rotation = rec.rotation;
        self.border = rec.border.clone();
        self.shape = rec.shape;
        self.image_src = rec.image_src.clone();
        self.extras = rec.extras.clone();
        Ok(())
    }

    /// Immutable once created.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn size(&self) -> Vec2 {
        self.size
    }

    /// Both components must be finite and strictly positive.
    pub fn set_size(&mut self, size: Vec2) -> Result<(), ValidationError> {
        if !size.is_finite() || size.x <= 0.0 || size.y <= 0.0 {
            return Err(ValidationError::NonPositiveSize {
                w: size.x,
                h: size.y,
            });
        }
        self.size = size;
        Ok(())
    }

    pub fn opacity(&self) -> Option<f32> {
        self.opacity
    }

    /// Must be finite and within [0, 1].
    pub fn set_opacity(&mut self, opacity: f32) -> Result<(), ValidationError> {
        if !opacity.is_finite() || !(0.0..=1.0).contains(&opacity) {
            return Err(ValidationError::OpacityOutOfRange(opacity));
        }
        self.opacity = Some(opacity);
        Ok(())
    }

    pub fn clear_opacity(&mut self) {
        self.opacity = None;
    }

    pub fn border(&self) -> Option<&Border> {
        self.border.as_ref()
    }

    pub fn set_border(&mut self, border: Border) -> Result<(), ValidationError> {
        if !border.width.is_finite() || border.width < 0.0 {
            return Err(ValidationError::NegativeBorderWidth(border.width));
        }
        self.border = Some(border);
        Ok(())
    }

    pub fn clear_border(&mut self) {
        self.border = None;
    }

    /// Extension fields side map.
    pub fn extras(&self) -> &Map<String, Value> {
        &self.extras
    }

    pub fn extra(&self, key: &str) -> Option<&Value> {
        self.extras.get(key)
    }

    pub fn set_extra(&mut self, key: impl Into<String>, value: Value) {
        self.extras.insert(key.into(), value);
    }

    /// Installs the per-frame behavior.
    pub fn set_update(&mut self, f: UpdateFn) {
        self.update = Some(f);
    }

    pub fn clear_update(&mut self) {
        self.update = None;
    }

    /// Temporarily detaches the update function so the scene can call it
    /// with `&mut self` without aliasing. Callers put it back afterwards.
    pub(crate) fn take_update(&mut self) -> Option<UpdateFn> {
        self.update.take()
    }

    pub(crate) fn restore_update(&mut self, f: Option<UpdateFn>) {
        if self.update.is_none() {
            self.update = f;
        }
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("id", &self.id)
            .field("location", &self.location)
            .field("size", &self.size)
            .field("shape", &self.shape)
            .field("opacity", &self.opacity)
            .field("has_update", &self.update.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_rejects_bad_fields() {
        assert!(matches!(
            Entity::new("", Vec2::ZERO, Vec2::new(1.0, 1.0)),
            Err(ValidationError::EmptyId)
        ));
        assert!(matches!(
            Entity::new("e", Vec2::ZERO, Vec2::new(0.0, 1.0)),
            Err(ValidationError::NonPositiveSize { .. })
        ));
        assert!(matches!(
            Entity::new("e", Vec2::ZERO, Vec2::new(1.0, f32::NAN)),
            Err(ValidationError::NonPositiveSize { .. })
        ));
    }

    #[test]
    fn typed_setters_enforce_invariants() {
        let mut e = Entity::new("e", Vec2::ZERO, Vec2::new(10.0, 10.0)).unwrap();
        assert!(e.set_opacity(0.5).is_ok());
        assert!(e.set_opacity(1.5).is_err());
        assert_eq!(e.opacity(), Some(0.5));

        assert!(e.set_size(Vec2::new(-1.0, 5.0)).is_err());
        assert_eq!(e.size(), Vec2::new(10.0, 10.0));
    }

    #[test]
    fn record_roundtrip_preserves_extras() {
        let mut e = Entity::new("p1", Vec2::new(1.0, 2.0), Vec2::new(50.0, 50.0)).unwrap();
        e.set_extra("hp", json!(100));
        e.shape = Some(Shape::Circle);

        let rec = e.record();
        assert_eq!(rec.extras.get("hp"), Some(&json!(100)));

        let back = Entity::from_record(&rec).unwrap();
        assert_eq!(back.id(), "p1");
        assert_eq!(back.extra("hp"), Some(&json!(100)));
        assert_eq!(back.shape, Some(Shape::Circle));
    }

    #[test]
    fn wire_record_uses_camel_case_field_names() {
        let mut rec = EntityRecord::new("p1", [0.0, 0.0], [50.0, 50.0]);
        rec.image_src = Some("hero.png".to_string());
        rec.shape = Some(Shape::Rect);
        rec.extras.insert("speed".to_string(), json!(2.5));

        let v = serde_json::to_value(&rec).unwrap();
        assert_eq!(v["imageSrc"], json!("hero.png"));
        assert_eq!(v["shape"], json!("rect"));
        assert_eq!(v["location"], json!([0.0, 0.0]));
        assert_eq!(v["speed"], json!(2.5));
        // Absent attributes stay off the wire.
        assert!(v.get("opacity").is_none());
    }

    #[test]
    fn apply_record_is_validate_then_replace() {
        let mut e = Entity::new("p1", Vec2::ZERO, Vec2::new(50.0, 50.0)).unwrap();
        e.set_opacity(0.5).unwrap();

        // Invalid merge leaves the entity untouched.
        let mut bad = e.record();
        bad.opacity = Some(7.0);
        assert!(e.apply_record(&bad).is_err());
        assert_eq!(e.opacity(), Some(0.5));
        assert_eq!(e.size(), Vec2::new(50.0, 50.0));

        // Id changes are rejected.
        let mut renamed = e.record();
        renamed.id = "p2".to_string();
        assert!(matches!(
            e.apply_record(&renamed),
            Err(ValidationError::IdMismatch { .. })
        ));

        // A valid merge replaces fields wholesale.
        let mut good = e.record();
        good.location = [9.0, 9.0];
        good.opacity = None;
        e.apply_record(&good).unwrap();
        assert_eq!(e.location, Vec2::new(9.0, 9.0));
        assert_eq!(e.opacity(), None);
    }

    #[test]
    fn apply_record_keeps_update_fn() {
        let mut e = Entity::new("p1", Vec2::ZERO, Vec2::new(1.0, 1.0)).unwrap();
        e.set_update(Box::new(|ent, dt| {
            ent.location.x += dt;
        }));
        let rec = e.record();
        e.apply_record(&rec).unwrap();
        assert!(e.take_update().is_some());
    }
}
