// file: src/sync/mod.rs
//
// Optimistic synchronization engine. Mutations and change-stream merges meet
// only in `LocalStore::apply`.

pub mod coordinator;
pub mod engine;
pub mod mapping;
pub mod normalizer;
pub mod session;
pub mod store;
pub mod subscriber;

pub use coordinator::{MutationCoordinator, ReorderReport};
pub use engine::SyncEngine;
pub use mapping::{is_temp_id, new_temp_id, Positioned, SyncEntity, TEMP_ID_PREFIX};
pub use normalizer::normalize_change;
pub use session::{OwnerEngines, PlannerSession};
pub use store::LocalStore;
pub use subscriber::{merge_change, ChangeStreamSubscriber, StreamEnd};
