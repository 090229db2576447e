//! Error taxonomy.
//!
//! Validation and structural errors are fatal only to the operation that
//! triggered them, never to the pool, scene, or loop as a whole. Network
//! faults stay on the connection boundary and are surfaced through events
//! and logs rather than thrown across it.

use thiserror::Error;

/// Malformed entity fields, raised synchronously at the mutation boundary.
///
/// Messages name the offending field and what was expected so callers can
/// fix their input without inspecting internals.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("entity id must be a non-empty string")]
    EmptyId,
    #[error("size components must be finite and > 0, got {w}x{h}")]
    NonPositiveSize { w: f32, h: f32 },
    #[error("opacity must be a finite value in [0, 1], got {0}")]
    OpacityOutOfRange(f32),
    #[error("border width must be finite and >= 0, got {0}")]
    NegativeBorderWidth(f32),
    #[error("location components must be finite, got ({x}, {y})")]
    NonFiniteLocation { x: f32, y: f32 },
    #[error("rotation must be finite, got {0}")]
    NonFiniteRotation(f32),
    #[error("entity id is immutable, cannot change {current:?} to {proposed:?}")]
    IdMismatch { current: String, proposed: String },
}

/// Structural misuse of an entity pool.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("an entity with id {0:?} is already in the pool")]
    DuplicateId(String),
    #[error("no entity with id {0:?} in the pool")]
    UnknownId(String),
    #[error("invalid {what} range: min {min} must be <= max {max}")]
    InvalidRange {
        what: &'static str,
        min: f32,
        max: f32,
    },
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Network-layer failures. Reported to the application via the client's
/// event stream or server logs; never raised across the wire.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("no active connection")]
    NotConnected,
    #[error("timed out waiting for the assigned connection id")]
    HandshakeTimeout,
    #[error("server closed the connection: {reason}")]
    ServerClosed { reason: String },
    #[error("connection io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("message codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_messages_name_the_field() {
        let e = ValidationError::NonPositiveSize { w: 0.0, h: 50.0 };
        assert!(e.to_string().contains("size"));
        assert!(e.to_string().contains("0x50"));

        let e = ValidationError::OpacityOutOfRange(1.5);
        assert!(e.to_string().contains("opacity"));
        assert!(e.to_string().contains("[0, 1]"));
    }

    #[test]
    fn pool_errors_carry_the_id() {
        let e = PoolError::DuplicateId("p1".to_string());
        assert!(e.to_string().contains("p1"));
    }
}
