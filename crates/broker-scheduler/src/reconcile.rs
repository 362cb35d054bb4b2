//! Ledger reconciliation.
//!
//! Rebuilds a cluster's `available` counters from first principles:
//! `limit − Σ requirement(Running deployments)`. Used on daemon startup and
//! whenever the counters are suspected to have drifted.

use serde::Serialize;
use tracing::{info, warn};

use broker_state::*;

use crate::error::{SchedulerError, SchedulerResult};
use crate::scheduler::AdmissionScheduler;

/// Result of reconciling one cluster.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Reconciliation {
    pub cluster_id: ClusterId,
    /// `available` as stored before reconciliation.
    pub previous: Resources,
    /// `available` recomputed from the running set.
    pub available: Resources,
    /// Number of running deployments on the cluster.
    pub running: usize,
}

impl Reconciliation {
    pub fn drifted(&self) -> bool {
        self.previous != self.available
    }
}

/// Compute what `available` must be for `cluster` given its deployments.
///
/// Fails if the running deployments hold more than the cluster's limit.
pub fn recompute_available(
    cluster: &Cluster,
    deployments: &[Deployment],
) -> SchedulerResult<Resources> {
    let consumed: Resources = deployments
        .iter()
        .filter(|d| d.cluster_id == cluster.id && d.is_running())
        .map(|d| d.requirement)
        .sum();
    let available = cluster.limit - consumed;

    if available.cpu < -EPSILON || available.ram < -EPSILON || available.gpu < -EPSILON {
        return Err(SchedulerError::Oversubscribed {
            cluster_id: cluster.id.clone(),
            consumed,
            limit: cluster.limit,
        });
    }
    Ok(available.clamped())
}

impl AdmissionScheduler {
    /// Recompute and store one cluster's available resources.
    pub fn reconcile_cluster(&self, cluster_id: &str) -> SchedulerResult<Reconciliation> {
        let report = self.state().transact(|txn| {
            let mut cluster = txn
                .get_cluster(cluster_id)?
                .ok_or_else(|| SchedulerError::ClusterNotFound(cluster_id.to_string()))?;
            let deployments = txn.deployments_for_cluster(cluster_id)?;
            let available = recompute_available(&cluster, &deployments)?;

            let report = Reconciliation {
                cluster_id: cluster.id.clone(),
                previous: cluster.available,
                available,
                running: deployments.iter().filter(|d| d.is_running()).count(),
            };
            if report.drifted() {
                cluster.available = available;
                txn.put_cluster(&cluster)?;
            }
            Ok::<_, SchedulerError>(report)
        })?;

        if report.drifted() {
            warn!(
                cluster = %report.cluster_id,
                previous = %report.previous,
                available = %report.available,
                "ledger drift corrected"
            );
        }
        Ok(report)
    }

    /// Reconcile every cluster in the store.
    ///
    /// Each cluster is reconciled in its own transaction. Stops at the first
    /// failure.
    pub fn reconcile_all(&self) -> SchedulerResult<Vec<Reconciliation>> {
        let clusters = self.state().list_clusters()?;
        let mut reports = Vec::with_capacity(clusters.len());
        for cluster in &clusters {
            reports.push(self.reconcile_cluster(&cluster.id)?);
        }
        let drifted = reports.iter().filter(|r| r.drifted()).count();
        info!(clusters = reports.len(), drifted, "reconciliation complete");
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::DeploymentRequest;

    fn fixed_now() -> u64 {
        1_700_000_000
    }

    fn setup() -> (AdmissionScheduler, Cluster) {
        let scheduler =
            AdmissionScheduler::new(StateStore::open_in_memory().unwrap()).with_clock(fixed_now);
        let org = scheduler.state().create_organization("acme", 0).unwrap();
        let cluster = scheduler
            .state()
            .create_cluster(&org.id, "c", Resources::new(16.0, 32.0, 4.0), 0)
            .unwrap();
        (scheduler, cluster)
    }

    fn submit(scheduler: &AdmissionScheduler, cluster: &Cluster, cpu: f64) -> Deployment {
        scheduler
            .submit(&DeploymentRequest {
                cluster_id: cluster.id.clone(),
                name: "job".to_string(),
                image: "img".to_string(),
                requirement: Resources::new(cpu, cpu * 2.0, 1.0),
                priority: 0,
                required_runtime_secs: 60,
            })
            .unwrap()
            .deployment
    }

    #[test]
    fn consistent_ledger_reports_no_drift() {
        let (scheduler, cluster) = setup();
        submit(&scheduler, &cluster, 4.0);
        submit(&scheduler, &cluster, 2.0);

        let report = scheduler.reconcile_cluster(&cluster.id).unwrap();

        assert!(!report.drifted());
        assert_eq!(report.running, 2);
        assert_eq!(report.available, Resources::new(10.0, 20.0, 2.0));
    }

    #[test]
    fn drifted_ledger_is_rewritten() {
        let (scheduler, cluster) = setup();
        submit(&scheduler, &cluster, 4.0);

        // Simulate leaked capacity.
        let mut leaked = scheduler.state().get_cluster(&cluster.id).unwrap().unwrap();
        leaked.available = Resources::ZERO;
        scheduler.state().put_cluster(&leaked).unwrap();

        let report = scheduler.reconcile_cluster(&cluster.id).unwrap();

        assert!(report.drifted());
        assert_eq!(report.previous, Resources::ZERO);
        let stored = scheduler.state().get_cluster(&cluster.id).unwrap().unwrap();
        assert_eq!(stored.available, Resources::new(12.0, 24.0, 3.0));
    }

    #[test]
    fn oversubscribed_cluster_is_reported_not_written() {
        let (scheduler, cluster) = setup();
        let dep = submit(&scheduler, &cluster, 4.0);

        let mut inflated = dep.clone();
        inflated.requirement = Resources::new(64.0, 1.0, 1.0);
        scheduler.state().put_deployment(&inflated).unwrap();
        let before = scheduler.state().get_cluster(&cluster.id).unwrap();

        let result = scheduler.reconcile_cluster(&cluster.id);

        assert!(matches!(result, Err(SchedulerError::Oversubscribed { .. })));
        assert_eq!(scheduler.state().get_cluster(&cluster.id).unwrap(), before);
    }

    #[test]
    fn reconcile_unknown_cluster() {
        let (scheduler, _) = setup();
        assert!(matches!(
            scheduler.reconcile_cluster("missing"),
            Err(SchedulerError::ClusterNotFound(_))
        ));
    }

    #[test]
    fn reconcile_all_covers_every_cluster() {
        let (scheduler, cluster) = setup();
        let second = scheduler
            .state()
            .create_cluster(&cluster.organization_id, "d", Resources::new(1.0, 1.0, 1.0), 0)
            .unwrap();
        submit(&scheduler, &cluster, 1.0);

        let reports = scheduler.reconcile_all().unwrap();

        assert_eq!(reports.len(), 2);
        assert!(reports.iter().any(|r| r.cluster_id == second.id && r.running == 0));
        assert!(reports.iter().all(|r| !r.drifted()));
    }

    #[test]
    fn recompute_ignores_non_running() {
        let (scheduler, cluster) = setup();
        let mut dep = submit(&scheduler, &cluster, 4.0);
        dep.status = DeploymentStatus::Completed;

        let available = recompute_available(&cluster, &[dep]).unwrap();
        assert_eq!(available, cluster.limit);
    }
}
