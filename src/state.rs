//! Shared relay state.
//!
//! DESIGN
//! ======
//! `RelayState` is injected into Axum handlers via the `State` extractor. It
//! holds the one realtime store every connected client reads, writes, and
//! subscribes through. The store is cheap to clone and internally locked.

use crate::store::MemoryStore;

#[derive(Clone, Default)]
pub struct RelayState {
    pub store: MemoryStore,
}

impl RelayState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// State over an existing store, e.g. one a test also inspects directly.
    #[must_use]
    pub fn with_store(store: MemoryStore) -> Self {
        Self { store }
    }
}
