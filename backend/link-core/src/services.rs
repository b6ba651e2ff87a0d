//! Lazily built, per-client service accessors.
//!
//! One value per type. Construction runs at most once even when many tasks
//! ask for the same accessor at the same time; every caller receives a clone
//! of the cached value.

use crate::error::ClientError;

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use log::debug;
use once_cell::sync::OnceCell;

type Slot = Arc<OnceCell<Box<dyn Any + Send + Sync>>>;

#[derive(Default)]
pub struct ServiceRegistry {
    slots: Mutex<HashMap<TypeId, Slot>>,
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("cached", &self.len())
            .finish()
    }
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached `S`, building it with `factory` on first use.
    pub fn get_or_init<S, F>(&self, factory: F) -> Result<S, ClientError>
    where
        S: Clone + Send + Sync + 'static,
        F: FnOnce() -> S,
    {
        // The map lock only guards slot lookup; the factory runs under the
        // slot's own once-cell so other types are not blocked.
        let slot = Arc::clone(
            self.slots
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(TypeId::of::<S>())
                .or_default(),
        );

        let value = slot.get_or_init(|| {
            debug!("Building service accessor {}", type_name::<S>());
            Box::new(factory())
        });

        value.downcast_ref::<S>().cloned().ok_or_else(|| {
            ClientError::internal(format!(
                "cached accessor is not a {}",
                type_name::<S>()
            ))
        })
    }

    /// Number of accessors built so far.
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|slot| slot.get().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
