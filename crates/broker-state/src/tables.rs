//! redb table definitions for the broker state store.
//!
//! Record tables use `&str` keys (the record id) and `&[u8]` values
//! (JSON-serialized domain types).

use redb::TableDefinition;

/// Shape shared by every record table.
pub type RecordTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Organizations keyed by `{organization_id}`.
pub const ORGANIZATIONS: RecordTable = TableDefinition::new("organizations");

/// Clusters (limits and ledger counters) keyed by `{cluster_id}`.
pub const CLUSTERS: RecordTable = TableDefinition::new("clusters");

/// Deployments keyed by `{deployment_id}`.
pub const DEPLOYMENTS: RecordTable = TableDefinition::new("deployments");

/// Store-wide counters.
pub const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

/// Key in [`META`] holding the last assigned deployment sequence number.
pub const DEPLOYMENT_SEQ_KEY: &str = "deployment_seq";
