//! StateStore: redb-backed state persistence for the broker.
//!
//! Provides typed CRUD operations over organizations, clusters, and
//! deployments. All values are JSON-serialized into redb's `&[u8]` value
//! columns. The store supports both on-disk and in-memory backends (the
//! latter for testing).

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use redb::{Database, DatabaseError, ReadableDatabase, ReadableTable};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::{StateError, StateResult, map_err};
use crate::tables::*;
use crate::txn::StateTxn;
use crate::types::*;

/// Pause between attempts while waiting for a locked database file.
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(25);

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    ///
    /// redb holds an exclusive lock on the file for as long as any clone of
    /// the returned store is alive. Fails with [`StateError::Locked`] if
    /// another handle already holds it.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(|e| match e {
            DatabaseError::DatabaseAlreadyOpen => StateError::Locked(path.display().to_string()),
            other => StateError::Open(other.to_string()),
        })?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Like [`open`](Self::open), but waits up to `timeout` for a locked
    /// database file to be released.
    pub fn open_with_timeout(path: &Path, timeout: Duration) -> StateResult<Self> {
        let deadline = Instant::now() + timeout;
        loop {
            match Self::open(path) {
                Err(StateError::Locked(_)) if Instant::now() < deadline => {
                    std::thread::sleep(LOCK_RETRY_INTERVAL);
                }
                result => return result,
            }
        }
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(ORGANIZATIONS).map_err(map_err!(Table))?;
        txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
        txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        txn.open_table(META).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Run `f` inside a single write transaction.
    ///
    /// Commits if `f` returns `Ok`, aborts otherwise: on error nothing `f`
    /// wrote is visible to any other reader or writer. Write transactions
    /// are exclusive, so concurrent callers are serialized here.
    pub fn transact<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&StateTxn<'_>) -> Result<T, E>,
        E: From<StateError>,
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let result = f(&StateTxn::new(&txn));
        match result {
            Ok(value) => {
                txn.commit().map_err(map_err!(Transaction))?;
                Ok(value)
            }
            Err(e) => {
                if let Err(abort) = txn.abort() {
                    warn!(error = %abort, "failed to abort transaction");
                }
                Err(e)
            }
        }
    }

    // ── Organizations ──────────────────────────────────────────────

    /// Create and store a new organization.
    pub fn create_organization(&self, name: &str, now: u64) -> StateResult<Organization> {
        let org = Organization::new(name, now);
        self.transact(|txn| txn.put_organization(&org))?;
        debug!(id = %org.id, %name, "organization created");
        Ok(org)
    }

    /// Get an organization by ID.
    pub fn get_organization(&self, id: &str) -> StateResult<Option<Organization>> {
        self.get(ORGANIZATIONS, id)
    }

    /// List all organizations.
    pub fn list_organizations(&self) -> StateResult<Vec<Organization>> {
        self.list(ORGANIZATIONS)
    }

    // ── Clusters ───────────────────────────────────────────────────

    /// Create a cluster for an existing organization, fully available.
    pub fn create_cluster(
        &self,
        organization_id: &str,
        name: &str,
        limit: Resources,
        now: u64,
    ) -> StateResult<Cluster> {
        limit.validate().map_err(StateError::Invalid)?;
        let cluster = Cluster::new(organization_id, name, limit, now);
        self.transact(|txn| {
            if txn.get_organization(organization_id)?.is_none() {
                return Err(StateError::NotFound(format!(
                    "organization {organization_id}"
                )));
            }
            txn.put_cluster(&cluster)
        })?;
        debug!(id = %cluster.id, %organization_id, %limit, "cluster created");
        Ok(cluster)
    }

    /// Insert or update a cluster record.
    pub fn put_cluster(&self, cluster: &Cluster) -> StateResult<()> {
        self.transact(|txn| txn.put_cluster(cluster))?;
        debug!(id = %cluster.id, "cluster stored");
        Ok(())
    }

    /// Get a cluster by ID.
    pub fn get_cluster(&self, id: &str) -> StateResult<Option<Cluster>> {
        self.get(CLUSTERS, id)
    }

    /// List all clusters.
    pub fn list_clusters(&self) -> StateResult<Vec<Cluster>> {
        self.list(CLUSTERS)
    }

    /// List the clusters owned by an organization.
    pub fn list_clusters_for_organization(
        &self,
        organization_id: &str,
    ) -> StateResult<Vec<Cluster>> {
        let mut clusters = self.list_clusters()?;
        clusters.retain(|c| c.organization_id == organization_id);
        Ok(clusters)
    }

    // ── Deployments ────────────────────────────────────────────────

    /// Insert or update a deployment record.
    pub fn put_deployment(&self, deployment: &Deployment) -> StateResult<()> {
        self.transact(|txn| txn.put_deployment(deployment))?;
        debug!(id = %deployment.id, status = %deployment.status, "deployment stored");
        Ok(())
    }

    /// Get a deployment by ID.
    pub fn get_deployment(&self, id: &str) -> StateResult<Option<Deployment>> {
        self.get(DEPLOYMENTS, id)
    }

    /// List all deployments, in creation order.
    pub fn list_deployments(&self) -> StateResult<Vec<Deployment>> {
        let mut deployments: Vec<Deployment> = self.list(DEPLOYMENTS)?;
        deployments.sort_by_key(|d| d.seq);
        Ok(deployments)
    }

    /// List the deployments on a cluster, in creation order.
    pub fn list_deployments_for_cluster(&self, cluster_id: &str) -> StateResult<Vec<Deployment>> {
        let mut deployments = self.list_deployments()?;
        deployments.retain(|d| d.cluster_id == cluster_id);
        Ok(deployments)
    }

    /// List every `Running` deployment across all clusters, in creation order.
    pub fn list_running_deployments(&self) -> StateResult<Vec<Deployment>> {
        let mut deployments = self.list_deployments()?;
        deployments.retain(Deployment::is_running);
        Ok(deployments)
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn get<T: DeserializeOwned>(&self, def: RecordTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        read_record(&table, key)
    }

    fn list<T: DeserializeOwned>(&self, def: RecordTable) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        read_all(&table)
    }
}

pub(crate) fn encode<T: Serialize>(value: &T) -> StateResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(map_err!(Serialize))
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

/// Read and decode one record from any readable record table.
pub(crate) fn read_record<T, R>(table: &R, key: &str) -> StateResult<Option<T>>
where
    T: DeserializeOwned,
    R: ReadableTable<&'static str, &'static [u8]>,
{
    match table.get(key).map_err(map_err!(Read))? {
        Some(guard) => Ok(Some(decode(guard.value())?)),
        None => Ok(None),
    }
}

/// Read and decode every record of any readable record table.
pub(crate) fn read_all<T, R>(table: &R) -> StateResult<Vec<T>>
where
    T: DeserializeOwned,
    R: ReadableTable<&'static str, &'static [u8]>,
{
    let mut results = Vec::new();
    for entry in table.iter().map_err(map_err!(Read))? {
        let (_, value) = entry.map_err(map_err!(Read))?;
        results.push(decode(value.value())?);
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> StateStore {
        StateStore::open_in_memory().unwrap()
    }

    fn test_deployment(cluster: &Cluster, name: &str, seq: u64) -> Deployment {
        Deployment {
            id: format!("dep-{name}"),
            cluster_id: cluster.id.clone(),
            organization_id: cluster.organization_id.clone(),
            name: name.to_string(),
            image: "registry.local/train:latest".to_string(),
            requirement: Resources::new(1.0, 2.0, 0.0),
            priority: 0,
            status: DeploymentStatus::Pending,
            seq,
            created_at: 1000,
            started_at: None,
            completed_at: None,
            required_runtime_secs: 60,
            preempted_by: None,
        }
    }

    // ── Organization CRUD ──────────────────────────────────────────

    #[test]
    fn organization_create_and_get() {
        let store = test_store();
        let org = store.create_organization("acme", 1000).unwrap();

        let retrieved = store.get_organization(&org.id).unwrap();
        assert_eq!(retrieved, Some(org));
        assert_eq!(store.list_organizations().unwrap().len(), 1);
    }

    #[test]
    fn organization_get_nonexistent_returns_none() {
        let store = test_store();
        assert!(store.get_organization("nope").unwrap().is_none());
    }

    // ── Cluster CRUD ───────────────────────────────────────────────

    #[test]
    fn cluster_create_starts_fully_available() {
        let store = test_store();
        let org = store.create_organization("acme", 1000).unwrap();
        let limit = Resources::new(16.0, 32.0, 4.0);

        let cluster = store.create_cluster(&org.id, "gpu-a", limit, 1000).unwrap();

        assert_eq!(cluster.available, limit);
        assert_eq!(cluster.consumed(), Resources::ZERO);
        assert_eq!(store.get_cluster(&cluster.id).unwrap(), Some(cluster));
    }

    #[test]
    fn cluster_create_requires_organization() {
        let store = test_store();
        let result = store.create_cluster("ghost", "gpu-a", Resources::new(1.0, 1.0, 1.0), 1000);

        assert!(matches!(result, Err(StateError::NotFound(_))));
        assert!(store.list_clusters().unwrap().is_empty());
    }

    #[test]
    fn cluster_create_rejects_negative_limit() {
        let store = test_store();
        let org = store.create_organization("acme", 1000).unwrap();
        let result = store.create_cluster(&org.id, "bad", Resources::new(-1.0, 1.0, 0.0), 1000);

        assert!(matches!(result, Err(StateError::Invalid(_))));
    }

    #[test]
    fn clusters_listed_per_organization() {
        let store = test_store();
        let acme = store.create_organization("acme", 1000).unwrap();
        let globex = store.create_organization("globex", 1000).unwrap();
        let limit = Resources::new(8.0, 16.0, 1.0);
        store.create_cluster(&acme.id, "a1", limit, 1000).unwrap();
        store.create_cluster(&acme.id, "a2", limit, 1000).unwrap();
        store.create_cluster(&globex.id, "g1", limit, 1000).unwrap();

        assert_eq!(store.list_clusters().unwrap().len(), 3);
        assert_eq!(store.list_clusters_for_organization(&acme.id).unwrap().len(), 2);
        assert_eq!(store.list_clusters_for_organization(&globex.id).unwrap().len(), 1);
    }

    // ── Deployment CRUD ────────────────────────────────────────────

    #[test]
    fn deployment_put_and_get() {
        let store = test_store();
        let org = store.create_organization("acme", 1000).unwrap();
        let cluster = store
            .create_cluster(&org.id, "c", Resources::new(4.0, 8.0, 0.0), 1000)
            .unwrap();
        let dep = test_deployment(&cluster, "train", 1);

        store.put_deployment(&dep).unwrap();
        assert_eq!(store.get_deployment("dep-train").unwrap(), Some(dep));
    }

    #[test]
    fn deployments_listed_in_creation_order() {
        let store = test_store();
        let org = store.create_organization("acme", 1000).unwrap();
        let cluster = store
            .create_cluster(&org.id, "c", Resources::new(4.0, 8.0, 0.0), 1000)
            .unwrap();
        let other = store
            .create_cluster(&org.id, "d", Resources::new(4.0, 8.0, 0.0), 1000)
            .unwrap();

        // Ids sort opposite to sequence to make sure ordering is by seq.
        store.put_deployment(&test_deployment(&cluster, "z", 1)).unwrap();
        store.put_deployment(&test_deployment(&cluster, "a", 2)).unwrap();
        store.put_deployment(&test_deployment(&other, "m", 3)).unwrap();

        let names: Vec<String> = store
            .list_deployments_for_cluster(&cluster.id)
            .unwrap()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["z", "a"]);
        assert_eq!(store.list_deployments().unwrap().len(), 3);
    }

    #[test]
    fn running_deployments_filter() {
        let store = test_store();
        let org = store.create_organization("acme", 1000).unwrap();
        let cluster = store
            .create_cluster(&org.id, "c", Resources::new(4.0, 8.0, 0.0), 1000)
            .unwrap();
        let mut running = test_deployment(&cluster, "run", 1);
        running.status = DeploymentStatus::Running;
        running.started_at = Some(1000);
        store.put_deployment(&running).unwrap();
        store.put_deployment(&test_deployment(&cluster, "wait", 2)).unwrap();

        let all = store.list_running_deployments().unwrap();
        assert_eq!(all, vec![running]);
    }

    // ── Transactions ───────────────────────────────────────────────

    #[test]
    fn transact_commits_on_ok() {
        let store = test_store();
        let org = store.create_organization("acme", 1000).unwrap();
        let cluster = store
            .create_cluster(&org.id, "c", Resources::new(4.0, 8.0, 0.0), 1000)
            .unwrap();

        store
            .transact(|txn| {
                let mut c = txn.get_cluster(&cluster.id)?.unwrap();
                c.available = Resources::new(1.0, 2.0, 0.0);
                txn.put_cluster(&c)?;
                txn.put_deployment(&test_deployment(&c, "a", 1))
            })
            .unwrap();

        let stored = store.get_cluster(&cluster.id).unwrap().unwrap();
        assert_eq!(stored.available, Resources::new(1.0, 2.0, 0.0));
        assert!(store.get_deployment("dep-a").unwrap().is_some());
    }

    #[test]
    fn transact_rolls_back_on_err() {
        let store = test_store();
        let org = store.create_organization("acme", 1000).unwrap();
        let cluster = store
            .create_cluster(&org.id, "c", Resources::new(4.0, 8.0, 0.0), 1000)
            .unwrap();

        let result: StateResult<()> = store.transact(|txn| {
            let mut c = txn.get_cluster(&cluster.id)?.unwrap();
            c.available = Resources::ZERO;
            txn.put_cluster(&c)?;
            txn.put_deployment(&test_deployment(&c, "a", 1))?;
            Err(StateError::Invalid("abandon".to_string()))
        });

        assert!(result.is_err());
        assert_eq!(store.get_cluster(&cluster.id).unwrap(), Some(cluster));
        assert!(store.get_deployment("dep-a").unwrap().is_none());
    }

    #[test]
    fn transaction_sees_its_own_writes() {
        let store = test_store();
        let org = store.create_organization("acme", 1000).unwrap();
        let cluster = store
            .create_cluster(&org.id, "c", Resources::new(4.0, 8.0, 0.0), 1000)
            .unwrap();

        let count = store
            .transact(|txn| {
                txn.put_deployment(&test_deployment(&cluster, "a", 1))?;
                txn.put_deployment(&test_deployment(&cluster, "b", 2))?;
                Ok::<_, StateError>(txn.deployments_for_cluster(&cluster.id)?.len())
            })
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn deployment_sequence_is_strictly_increasing() {
        let store = test_store();
        let seqs: Vec<u64> = (0..3)
            .map(|_| store.transact(|txn| txn.next_deployment_seq()).unwrap())
            .collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn aborted_transaction_does_not_consume_sequence() {
        let store = test_store();
        let _: StateResult<u64> = store.transact(|txn| {
            txn.next_deployment_seq()?;
            Err(StateError::Invalid("abandon".to_string()))
        });
        assert_eq!(store.transact(|txn| txn.next_deployment_seq()).unwrap(), 1);
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        let cluster_id = {
            let store = StateStore::open(&db_path).unwrap();
            let org = store.create_organization("acme", 1000).unwrap();
            store
                .create_cluster(&org.id, "c", Resources::new(4.0, 8.0, 1.0), 1000)
                .unwrap()
                .id
        };

        // Reopen the same database file.
        let store = StateStore::open(&db_path).unwrap();
        let cluster = store.get_cluster(&cluster_id).unwrap();
        assert!(cluster.is_some());
        assert_eq!(cluster.unwrap().name, "c");
    }

    #[test]
    fn open_reports_locked_while_held() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");
        let _held = StateStore::open(&db_path).unwrap();

        assert!(matches!(StateStore::open(&db_path), Err(StateError::Locked(_))));
        assert!(matches!(
            StateStore::open_with_timeout(&db_path, Duration::from_millis(50)),
            Err(StateError::Locked(_))
        ));
    }

    #[test]
    fn open_with_timeout_waits_for_release() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");
        let held = StateStore::open(&db_path).unwrap();
        held.create_organization("acme", 1000).unwrap();

        let releaser = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            drop(held);
        });

        let store = StateStore::open_with_timeout(&db_path, Duration::from_secs(5)).unwrap();
        releaser.join().unwrap();
        assert_eq!(store.list_organizations().unwrap().len(), 1);
    }

    #[test]
    fn fractional_counters_survive_storage_exactly() {
        let store = test_store();
        let org = store.create_organization("acme", 1000).unwrap();
        let mut cluster = store
            .create_cluster(&org.id, "c", Resources::new(1.0, 1.0, 1.0), 1000)
            .unwrap();
        cluster.available = Resources::new(0.1 + 0.2, 2.0 / 3.0, 1.0 - 0.9);
        store.put_cluster(&cluster).unwrap();

        let stored = store.get_cluster(&cluster.id).unwrap().unwrap();
        assert_eq!(stored.available, cluster.available);
        assert_eq!(stored.consumed(), cluster.consumed());
    }

    // ── Edge cases ─────────────────────────────────────────────────

    #[test]
    fn empty_store_operations() {
        let store = test_store();

        assert!(store.list_organizations().unwrap().is_empty());
        assert!(store.list_clusters().unwrap().is_empty());
        assert!(store.list_deployments().unwrap().is_empty());
        assert!(store.list_deployments_for_cluster("any").unwrap().is_empty());
        assert!(store.list_running_deployments().unwrap().is_empty());
        assert!(store.get_cluster("nope").unwrap().is_none());
        assert!(store.get_deployment("nope").unwrap().is_none());
    }
}
