//! redb table definitions for the Convoy state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).
//! Composite keys follow the pattern `{service}` or `{service}:{instance_id}`.

use redb::TableDefinition;

/// Validated service specs keyed by `{service}`.
pub const SPECS: TableDefinition<&str, &[u8]> = TableDefinition::new("specs");

/// Rollout state keyed by `{service}`.
pub const ROLLOUTS: TableDefinition<&str, &[u8]> = TableDefinition::new("rollouts");

/// Scaling state keyed by `{service}`.
pub const SCALING: TableDefinition<&str, &[u8]> = TableDefinition::new("scaling");

/// Instance records keyed by `{service}:{instance_id}`.
pub const INSTANCES: TableDefinition<&str, &[u8]> = TableDefinition::new("instances");
