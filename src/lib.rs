// OpenPlan Library
// Optimistic sync engine for schedule items and pool tasks

pub mod config;
pub mod error;
pub mod http_config;
pub mod models;
pub mod notify;
pub mod persistence;
pub mod sync;
pub mod utils;

// Re-export commonly used types
pub use models::*;
pub use config::{validate_config, SyncConfig};
pub use error::{NormalizeError, PersistenceError, SyncError, SyncResult};
pub use notify::{ChannelNotifier, LogNotifier, Notification, NotificationLevel, Notifier};
pub use persistence::{Backend, ChangeSource, MemoryStore, Persistence, RestPersistence, SqliteStore};
pub use sync::{LocalStore, OwnerEngines, PlannerSession, ReorderReport, SyncEngine, SyncEntity};
pub use utils::retry::{Backoff, RetryPolicies, RetryPolicy};
