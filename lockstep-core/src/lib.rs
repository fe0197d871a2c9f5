//! lockstep core library: domain types, project configuration, persistent
//! key-value store, errors.
//!
//! - [`types`]: artifact kinds, restore actions, notifications
//! - [`config`]: `.lockstep.yaml` loading and the resolved [`ProjectLayout`]
//! - [`store`]: [`PersistentStore`] trait and the JSON-file backend
//! - [`error`]: [`ConfigError`], [`StoreError`]

pub mod config;
pub mod error;
pub mod store;
pub mod types;

pub use config::{ProjectConfig, ProjectLayout, ToolConfig};
pub use error::{ConfigError, StoreError};
pub use store::{JsonFileStore, MemoryStore, PersistentStore};
pub use types::{ArtifactKind, Notification, RestoreAction, TrackingContext};
