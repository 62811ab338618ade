//! redb table definitions for the corral state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized
//! domain types). Instance names are globally unique, so instances are
//! keyed by name alone; pool membership is a field on the record.

use redb::TableDefinition;

/// Entities keyed by `{entity_id}`.
pub const ENTITIES: TableDefinition<&str, &[u8]> = TableDefinition::new("entities");

/// Pools keyed by `{pool_id}`.
pub const POOLS: TableDefinition<&str, &[u8]> = TableDefinition::new("pools");

/// Instance records keyed by `{instance_name}`.
pub const INSTANCES: TableDefinition<&str, &[u8]> = TableDefinition::new("instances");

/// Cached CI jobs keyed by decimal job ID.
pub const JOBS: TableDefinition<&str, &[u8]> = TableDefinition::new("jobs");

/// Controller identity singleton, keyed by `CONTROLLER_KEY`.
pub const CONTROLLER: TableDefinition<&str, &[u8]> = TableDefinition::new("controller");

/// The single row in the `controller` table.
pub const CONTROLLER_KEY: &str = "controller-info";
