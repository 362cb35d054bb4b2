//! Resource ledger: the only code that moves a cluster's `available` counters.
//!
//! Every check is per dimension: a request fits only if CPU, RAM and GPU
//! each fit on their own.

use thiserror::Error;

use broker_state::{Cluster, Resources};

/// Ledger operation failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerError {
    #[error(
        "insufficient resources on cluster {cluster_id}: requested {requested}, available {available}"
    )]
    InsufficientResources {
        cluster_id: String,
        requested: Resources,
        available: Resources,
    },
}

/// True iff the cluster's available resources cover `requirement` in every
/// dimension, within rounding slack.
pub fn can_fit(cluster: &Cluster, requirement: &Resources) -> bool {
    requirement.fits_within(&cluster.available)
}

/// Take `requirement` out of the cluster's available resources.
///
/// Leaves the cluster untouched and fails if it does not fit.
pub fn debit(cluster: &mut Cluster, requirement: &Resources) -> Result<(), LedgerError> {
    if !can_fit(cluster, requirement) {
        return Err(LedgerError::InsufficientResources {
            cluster_id: cluster.id.clone(),
            requested: *requirement,
            available: cluster.available,
        });
    }
    // Rounding slack admitted by `can_fit` must not leave a counter negative.
    cluster.available = (cluster.available - *requirement).clamped();
    Ok(())
}

/// Return `requirement` to the cluster's available resources.
///
/// Not bounded by `limit`: callers only credit what an earlier debit took.
pub fn credit(cluster: &mut Cluster, requirement: &Resources) {
    cluster.available += *requirement;
}
