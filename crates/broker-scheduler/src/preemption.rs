//! Preemption planning: choose which running deployments to fail.
//!
//! Given a cluster that cannot fit a pending request, the planner:
//! 1. Collects `Running` deployments with priority strictly below the request's
//! 2. Orders them by ascending priority, then by creation sequence
//! 3. Credits them one by one to a working copy of the ledger, stopping as
//!    soon as the request fits
//!
//! Planning is pure. Nothing outside the returned plan is modified, so a plan
//! that cannot be completed is simply dropped.

use tracing::debug;

use broker_state::{Cluster, Deployment, DeploymentStatus};

use crate::ledger;

/// A preemption set that makes a request fit.
#[derive(Debug, Clone, PartialEq)]
pub struct PreemptionPlan {
    /// The cluster after crediting every victim, before debiting the request.
    pub cluster: Cluster,
    /// Victims in preemption order, already marked `Failed`.
    pub victims: Vec<Deployment>,
}

/// Running deployments eligible for preemption by a request of `priority`,
/// in the order they would be preempted.
pub fn preemption_candidates(deployments: &[Deployment], priority: i64) -> Vec<&Deployment> {
    let mut candidates: Vec<&Deployment> = deployments
        .iter()
        .filter(|d| d.is_running() && d.priority < priority)
        .collect();
    candidates.sort_by_key(|d| (d.priority, d.seq));
    candidates
}

/// Plan the smallest candidate prefix whose release lets `request` fit.
///
/// Returns `None` when even preempting every candidate would not be enough.
pub fn plan_preemption(
    cluster: &Cluster,
    request: &Deployment,
    deployments: &[Deployment],
) -> Option<PreemptionPlan> {
    // Nothing can ever make room beyond the cluster's own limit.
    if !request.requirement.fits_within(&cluster.limit) {
        debug!(
            cluster = %cluster.id,
            deployment = %request.id,
            requirement = %request.requirement,
            limit = %cluster.limit,
            "request exceeds cluster limit"
        );
        return None;
    }

    let mut working = cluster.clone();
    let mut victims = Vec::new();

    for candidate in preemption_candidates(deployments, request.priority) {
        ledger::credit(&mut working, &candidate.requirement);

        let mut victim = candidate.clone();
        victim.status = DeploymentStatus::Failed;
        victim.preempted_by = Some(request.id.clone());
        victims.push(victim);

        if ledger::can_fit(&working, &request.requirement) {
            return Some(PreemptionPlan {
                cluster: working,
                victims,
            });
        }
    }

    debug!(
        cluster = %cluster.id,
        deployment = %request.id,
        candidates = victims.len(),
        "preemption candidates exhausted"
    );
    None
}
