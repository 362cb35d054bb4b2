//! Typed view over a single redb write transaction.
//!
//! A `StateTxn` is only ever handed out by [`StateStore::transact`]. Every
//! read and write made through it belongs to the same transaction: either
//! all of them are committed or none are.
//!
//! [`StateStore::transact`]: crate::StateStore::transact

use redb::{ReadableTable, WriteTransaction};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{StateResult, map_err};
use crate::store::{encode, read_all, read_record};
use crate::tables::*;
use crate::types::*;

/// Read/write access to the store inside one transaction.
pub struct StateTxn<'a> {
    txn: &'a WriteTransaction,
}

impl<'a> StateTxn<'a> {
    pub(crate) fn new(txn: &'a WriteTransaction) -> Self {
        Self { txn }
    }

    // ── Organizations ──────────────────────────────────────────────

    pub fn get_organization(&self, id: &str) -> StateResult<Option<Organization>> {
        self.get(ORGANIZATIONS, id)
    }

    pub fn put_organization(&self, org: &Organization) -> StateResult<()> {
        self.put(ORGANIZATIONS, &org.id, org)
    }

    // ── Clusters ───────────────────────────────────────────────────

    pub fn get_cluster(&self, id: &str) -> StateResult<Option<Cluster>> {
        self.get(CLUSTERS, id)
    }

    pub fn put_cluster(&self, cluster: &Cluster) -> StateResult<()> {
        self.put(CLUSTERS, &cluster.id, cluster)
    }

    // ── Deployments ────────────────────────────────────────────────

    pub fn get_deployment(&self, id: &str) -> StateResult<Option<Deployment>> {
        self.get(DEPLOYMENTS, id)
    }

    pub fn put_deployment(&self, deployment: &Deployment) -> StateResult<()> {
        self.put(DEPLOYMENTS, &deployment.id, deployment)
    }

    /// All deployments on a cluster, in creation order.
    pub fn deployments_for_cluster(&self, cluster_id: &str) -> StateResult<Vec<Deployment>> {
        let table = self.txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        let mut deployments: Vec<Deployment> = read_all(&table)?;
        deployments.retain(|d| d.cluster_id == cluster_id);
        deployments.sort_by_key(|d| d.seq);
        Ok(deployments)
    }

    /// Claim the next deployment creation sequence number.
    pub fn next_deployment_seq(&self) -> StateResult<u64> {
        let mut table = self.txn.open_table(META).map_err(map_err!(Table))?;
        let current = table
            .get(DEPLOYMENT_SEQ_KEY)
            .map_err(map_err!(Read))?
            .map(|guard| guard.value())
            .unwrap_or(0);
        let next = current + 1;
        table
            .insert(DEPLOYMENT_SEQ_KEY, next)
            .map_err(map_err!(Write))?;
        Ok(next)
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn get<T: DeserializeOwned>(
        &self,
        def: RecordTable,
        key: &str,
    ) -> StateResult<Option<T>> {
        let table = self.txn.open_table(def).map_err(map_err!(Table))?;
        read_record(&table, key)
    }

    fn put<T: Serialize>(
        &self,
        def: RecordTable,
        key: &str,
        value: &T,
    ) -> StateResult<()> {
        let bytes = encode(value)?;
        let mut table = self.txn.open_table(def).map_err(map_err!(Table))?;
        table
            .insert(key, bytes.as_slice())
            .map_err(map_err!(Write))?;
        Ok(())
    }
}
