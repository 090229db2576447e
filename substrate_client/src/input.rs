//! Input handling.
//!
//! Raw keyboard/mouse/touch capture lives outside the core; the substrate
//! only asks whether a logical action is currently active. A windowing
//! integration would implement [`InputSource`] over real device state.

use std::collections::HashSet;

/// Boolean query over logical input actions ("left", "fire", ...).
pub trait InputSource: Send {
    fn is_active(&self, action: &str) -> bool;
}

/// Fixed input state, useful for demos and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticInput {
    active: HashSet<String>,
}

impl StaticInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, action: impl Into<String>, active: bool) {
        let action = action.into();
        if active {
            self.active.insert(action);
        } else {
            self.active.remove(&action);
        }
    }
}

impl InputSource for StaticInput {
    fn is_active(&self, action: &str) -> bool {
        self.active.contains(action)
    }
}
