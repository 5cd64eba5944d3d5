//! convoy-state — durable controller state, embedded in the daemon.
//!
//! Everything the control loop must survive a restart with lives here:
//! service specs, rollout progress, scaling decisions, and the instance
//! records needed to re-adopt a running fleet. Storage is
//! [redb](https://docs.rs/redb); values are JSON under `&str` keys, with
//! `{service}:{instance_id}` composite keys where per-service prefix scans
//! are needed.
//!
//! `StateStore` clones cheaply (`Arc<Database>` inside) and is shared by
//! every reconciler task plus the API. An in-memory backend backs the
//! test suites.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
