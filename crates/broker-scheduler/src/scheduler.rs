//! Scheduler: admits pending deployments onto cluster ledgers.
//!
//! The `AdmissionScheduler`:
//! - Creates `Pending` deployment records for a cluster
//! - Admits them when the cluster can fit their requirement
//! - Preempts lower-priority running deployments when it cannot
//! - Rejects them, with no side effects, when preemption cannot help
//!
//! Each decision runs inside a single state store write transaction, so the
//! fit check, the ledger debit/credit and every status change commit
//! together or not at all.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use broker_state::*;

use crate::error::{SchedulerError, SchedulerResult};
use crate::ledger;
use crate::preemption::plan_preemption;

/// A request to run a workload on a cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeploymentRequest {
    pub cluster_id: ClusterId,
    pub name: String,
    pub image: String,
    pub requirement: Resources,
    /// Higher is more important.
    #[serde(default)]
    pub priority: i64,
    pub required_runtime_secs: u64,
}

/// Outcome of a successful admission.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Admission {
    /// The admitted deployment, now `Running`.
    pub deployment: Deployment,
    /// Deployments failed to make room, in preemption order.
    pub preempted: Vec<Deployment>,
}

impl Admission {
    pub fn preempted_ids(&self) -> Vec<&str> {
        self.preempted.iter().map(|d| d.id.as_str()).collect()
    }
}

/// Admission and preemption over the clusters of a state store.
#[derive(Clone)]
pub struct AdmissionScheduler {
    state: StateStore,
    /// Source of "now" for timestamps, in Unix seconds.
    clock: fn() -> u64,
}

impl AdmissionScheduler {
    /// Create a new scheduler over the given store.
    pub fn new(state: StateStore) -> Self {
        Self {
            state,
            clock: epoch_secs,
        }
    }

    /// Replace the wall clock used for timestamps.
    pub fn with_clock(mut self, clock: fn() -> u64) -> Self {
        self.clock = clock;
        self
    }

    /// The underlying state store.
    pub fn state(&self) -> &StateStore {
        &self.state
    }

    pub(crate) fn now(&self) -> u64 {
        (self.clock)()
    }

    /// Create a new `Pending` deployment on the request's cluster.
    pub fn create_deployment(&self, request: &DeploymentRequest) -> SchedulerResult<Deployment> {
        request
            .requirement
            .validate()
            .map_err(SchedulerError::InvalidRequirement)?;
        let now = self.now();

        let deployment = self.state.transact(|txn| {
            let cluster = txn
                .get_cluster(&request.cluster_id)?
                .ok_or_else(|| SchedulerError::ClusterNotFound(request.cluster_id.clone()))?;

            let deployment = Deployment {
                id: new_id(),
                cluster_id: cluster.id.clone(),
                organization_id: cluster.organization_id.clone(),
                name: request.name.clone(),
                image: request.image.clone(),
                requirement: request.requirement,
                priority: request.priority,
                status: DeploymentStatus::Pending,
                seq: txn.next_deployment_seq()?,
                created_at: now,
                started_at: None,
                completed_at: None,
                required_runtime_secs: request.required_runtime_secs,
                preempted_by: None,
            };
            txn.put_deployment(&deployment)?;
            Ok::<_, SchedulerError>(deployment)
        })?;

        debug!(
            id = %deployment.id,
            cluster = %deployment.cluster_id,
            priority = deployment.priority,
            requirement = %deployment.requirement,
            "deployment created"
        );
        Ok(deployment)
    }

    /// Create a deployment and immediately try to admit it.
    ///
    /// On rejection the created deployment stays `Pending` in the store.
    pub fn submit(&self, request: &DeploymentRequest) -> SchedulerResult<Admission> {
        let deployment = self.create_deployment(request)?;
        self.schedule(&deployment.cluster_id, &deployment.id)
    }

    /// Decide the fate of a pending deployment on a cluster.
    ///
    /// Admits it directly when it fits, otherwise preempts the cheapest
    /// sufficient set of strictly lower-priority running deployments. On any
    /// error the store is left exactly as it was.
    pub fn schedule(&self, cluster_id: &str, deployment_id: &str) -> SchedulerResult<Admission> {
        let now = self.now();
        let result = self
            .state
            .transact(|txn| admit(txn, cluster_id, deployment_id, now));

        match &result {
            Ok(admission) => {
                for victim in &admission.preempted {
                    info!(
                        victim = %victim.id,
                        victim_priority = victim.priority,
                        %cluster_id,
                        %deployment_id,
                        "preempted lower-priority deployment"
                    );
                }
                info!(
                    %deployment_id,
                    %cluster_id,
                    priority = admission.deployment.priority,
                    preempted = admission.preempted.len(),
                    "deployment admitted"
                );
            }
            Err(e) if e.is_rejection() => {
                warn!(%deployment_id, %cluster_id, error = %e, "deployment rejected");
            }
            Err(e) => {
                warn!(%deployment_id, %cluster_id, error = %e, "scheduling failed");
            }
        }
        result
    }
}

/// The admission decision, applied inside an open transaction.
fn admit(
    txn: &StateTxn<'_>,
    cluster_id: &str,
    deployment_id: &str,
    now: u64,
) -> SchedulerResult<Admission> {
    let mut cluster = txn
        .get_cluster(cluster_id)?
        .ok_or_else(|| SchedulerError::ClusterNotFound(cluster_id.to_string()))?;
    let mut deployment = txn
        .get_deployment(deployment_id)?
        .ok_or_else(|| SchedulerError::DeploymentNotFound(deployment_id.to_string()))?;

    if deployment.cluster_id != cluster.id {
        return Err(SchedulerError::ClusterMismatch {
            deployment_id: deployment.id,
            expected: deployment.cluster_id,
            cluster_id: cluster.id,
        });
    }
    if deployment.status != DeploymentStatus::Pending {
        return Err(SchedulerError::NotPending {
            id: deployment.id,
            status: deployment.status,
        });
    }

    let preempted = if ledger::can_fit(&cluster, &deployment.requirement) {
        Vec::new()
    } else {
        let on_cluster = txn.deployments_for_cluster(&cluster.id)?;
        let plan = plan_preemption(&cluster, &deployment, &on_cluster).ok_or_else(|| {
            SchedulerError::InsufficientResourcesAfterPreemption {
                cluster_id: cluster.id.clone(),
                deployment_id: deployment.id.clone(),
            }
        })?;
        for victim in &plan.victims {
            txn.put_deployment(victim)?;
        }
        cluster = plan.cluster;
        plan.victims
    };

    ledger::debit(&mut cluster, &deployment.requirement)?;
    deployment.status = DeploymentStatus::Running;
    deployment.started_at = Some(now);

    txn.put_cluster(&cluster)?;
    txn.put_deployment(&deployment)?;

    Ok(Admission {
        deployment,
        preempted,
    })
}

/// Current Unix epoch in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
