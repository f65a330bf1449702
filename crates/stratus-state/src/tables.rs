//! redb table definitions for the provisioner record log.
//!
//! Both tables use `&str` keys and `&[u8]` values (JSON-serialized records).
//! Keys are composite and append-only: a new key is written for every state
//! change, never overwriting a prior one.

use redb::TableDefinition;

/// Node records keyed by `{launch_id}|{node_id}|{state}|{timestamp}|{nonce}`.
pub const NODE_RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("node_records");

/// Launch records keyed by `{launch_id}|{state}|{timestamp}|{nonce}`.
pub const LAUNCH_RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("launch_records");
