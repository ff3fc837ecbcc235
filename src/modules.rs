//! Subsystem isolation loader.
//!
//! Optional feature modules (web search, style profiling, future
//! integrations) are constructed through this loader so that one broken
//! integration cannot block unrelated features from initializing. A
//! factory failure — an `Err` or a panic — records the module as
//! unavailable with its reason; callers must branch on the slot instead
//! of assuming presence.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tracing::{info, warn};

use crate::error::ModuleError;

/// Construction outcome of one subsystem module.
///
/// An explicit tagged result, so a missing module cannot be dereferenced
/// by accident.
pub enum ModuleSlot<T: ?Sized> {
    Available(Arc<T>),
    Unavailable(String),
}

impl<T: ?Sized> ModuleSlot<T> {
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available(_))
    }

    /// The module, if it constructed.
    pub fn get(&self) -> Option<&Arc<T>> {
        match self {
            Self::Available(module) => Some(module),
            Self::Unavailable(_) => None,
        }
    }

    pub fn unavailable_reason(&self) -> Option<&str> {
        match self {
            Self::Available(_) => None,
            Self::Unavailable(reason) => Some(reason),
        }
    }
}

impl<T: ?Sized> Clone for ModuleSlot<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Available(module) => Self::Available(Arc::clone(module)),
            Self::Unavailable(reason) => Self::Unavailable(reason.clone()),
        }
    }
}

/// Runs module factories in order, containing failures per module.
#[derive(Default)]
pub struct SubsystemLoader {
    statuses: Vec<(String, Option<String>)>,
}

impl SubsystemLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Construct one module. A factory error or panic marks the module
    /// unavailable and loading continues with the rest.
    pub fn load<T, F>(&mut self, name: &str, factory: F) -> ModuleSlot<T>
    where
        T: ?Sized,
        F: FnOnce() -> Result<Arc<T>, ModuleError>,
    {
        let outcome = catch_unwind(AssertUnwindSafe(factory));

        let slot = match outcome {
            Ok(Ok(module)) => {
                info!(module = name, "Subsystem module loaded");
                ModuleSlot::Available(module)
            }
            Ok(Err(e)) => {
                warn!(module = name, error = %e, "Subsystem module unavailable");
                ModuleSlot::Unavailable(e.to_string())
            }
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "construction panicked".to_string());
                warn!(module = name, reason = %reason, "Subsystem module panicked during construction");
                ModuleSlot::Unavailable(format!("construction panicked: {reason}"))
            }
        };

        self.statuses
            .push((name.to_string(), slot.unavailable_reason().map(String::from)));
        slot
    }

    pub fn is_available(&self, name: &str) -> bool {
        self.statuses
            .iter()
            .any(|(n, reason)| n == name && reason.is_none())
    }

    pub fn unavailable_reason(&self, name: &str) -> Option<&str> {
        self.statuses
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, reason)| reason.as_deref())
    }

    /// (name, available) pairs in load order.
    pub fn report(&self) -> Vec<(&str, bool)> {
        self.statuses
            .iter()
            .map(|(n, reason)| (n.as_str(), reason.is_none()))
            .collect()
    }
}
