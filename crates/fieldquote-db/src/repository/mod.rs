//! # Repository Module
//!
//! Typed access to the Local Durable Store's collections.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repositories over one store                          │
//! │                                                                         │
//! │  fieldquote-sync                                                       │
//! │       │                                                                 │
//! │       │  repos.actions().enqueue(payload)                              │
//! │       ▼                                                                 │
//! │  Repositories (cheap to clone, shares Arc<dyn DurableStore>)           │
//! │  ├── actions()       ActionRepository      → actions                   │
//! │  ├── dead_letters()  DeadLetterRepository  → dead_letter               │
//! │  ├── entities()      EntityCache           → quotes/customers/items    │
//! │  ├── blobs()         BlobRepository        → blobs                     │
//! │  ├── id_map()        IdMapRepository       → id_map                    │
//! │  ├── conflicts()     ConflictRepository    → conflicts                 │
//! │  └── remapper()      IdRemapper            → temp → real, atomically   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  DurableStore (SQLite or in-memory)                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod actions;
pub mod blobs;
pub mod conflicts;
pub mod dead_letter;
pub mod entities;
pub mod id_map;

use std::sync::Arc;

use crate::remap::IdRemapper;
use crate::store::DurableStore;

pub use actions::{action_key, ActionRepository};
pub use blobs::BlobRepository;
pub use conflicts::ConflictRepository;
pub use dead_letter::DeadLetterRepository;
pub use entities::EntityCache;
pub use id_map::IdMapRepository;

/// Entry point to every repository over one store.
#[derive(Clone)]
pub struct Repositories {
    store: Arc<dyn DurableStore>,
}

impl Repositories {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Repositories { store }
    }

    pub fn store(&self) -> &Arc<dyn DurableStore> {
        &self.store
    }

    pub fn actions(&self) -> ActionRepository {
        ActionRepository::new(self.store.clone())
    }

    pub fn dead_letters(&self) -> DeadLetterRepository {
        DeadLetterRepository::new(self.store.clone())
    }

    pub fn entities(&self) -> EntityCache {
        EntityCache::new(self.store.clone())
    }

    pub fn blobs(&self) -> BlobRepository {
        BlobRepository::new(self.store.clone())
    }

    pub fn id_map(&self) -> IdMapRepository {
        IdMapRepository::new(self.store.clone())
    }

    pub fn conflicts(&self) -> ConflictRepository {
        ConflictRepository::new(self.store.clone())
    }

    pub fn remapper(&self) -> IdRemapper {
        IdRemapper::new(self.store.clone())
    }
}
