//! # Request Context
//!
//! A per-request, type-keyed bag. A middleware's handle phase stores values
//! here for its own fallback phase (CORS settings, timing start, rate-limit
//! counters). Clones of a request share the same bag, so values written by
//! the handler are visible to the fallbacks that run after it.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

type Slot = Box<dyn Any + Send + Sync>;

/// Request-scoped key/value storage
#[derive(Clone, Default)]
pub struct Context {
    data: Arc<RwLock<HashMap<TypeId, Slot>>>,
}

impl Context {
    /// Create an empty context
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value by its type, replacing any previous one
    pub fn insert<T: Send + Sync + 'static>(&self, value: T) {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        data.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Get a clone of the value stored for `T`
    #[must_use]
    pub fn get<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        data.get(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_ref::<T>())
            .cloned()
    }

    /// Remove and return the value stored for `T`
    pub fn take<T: Send + Sync + 'static>(&self) -> Option<T> {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        data.remove(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast::<T>().ok())
            .map(|boxed| *boxed)
    }

    /// Check if a value of type `T` is stored
    #[must_use]
    pub fn contains<T: 'static>(&self) -> bool {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        data.contains_key(&TypeId::of::<T>())
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("Context").field("entries", &data.len()).finish()
    }
}
