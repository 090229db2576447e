//! `substrate_shared`
//!
//! Shared libraries used by both client and server.
//!
//! Design goals:
//! - Deterministic and modular where practical.
//! - Clear separation of concerns (entities, pool, scheduler, scene, net).
//! - Validation enforced at the typed boundary, never silently coerced.
//! - No `unsafe`.

pub mod config;
pub mod entity;
pub mod error;
pub mod math;
pub mod net;
pub mod pool;
pub mod render;
pub mod scene;
pub mod scheduler;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::config::*;
    pub use crate::entity::*;
    pub use crate::error::*;
    pub use crate::math::*;
    pub use crate::net::*;
    pub use crate::pool::*;
    pub use crate::scheduler::*;
}
