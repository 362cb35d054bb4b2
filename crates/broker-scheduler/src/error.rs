//! Scheduler error types.

use thiserror::Error;

use broker_state::{DeploymentStatus, Resources, StateError};

use crate::ledger::LedgerError;

/// Errors that can occur during admission and reconciliation.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("cluster not found: {0}")]
    ClusterNotFound(String),

    #[error("deployment not found: {0}")]
    DeploymentNotFound(String),

    #[error("deployment {id} is {status}, expected pending")]
    NotPending {
        id: String,
        status: DeploymentStatus,
    },

    #[error("deployment {deployment_id} belongs to cluster {expected}, not {cluster_id}")]
    ClusterMismatch {
        deployment_id: String,
        expected: String,
        cluster_id: String,
    },

    #[error("invalid resource requirement: {0}")]
    InvalidRequirement(String),

    #[error(
        "insufficient resources on cluster {cluster_id} for deployment {deployment_id} even after preemption"
    )]
    InsufficientResourcesAfterPreemption {
        cluster_id: String,
        deployment_id: String,
    },

    #[error("cluster {cluster_id} is oversubscribed: running deployments hold {consumed}, limit is {limit}")]
    Oversubscribed {
        cluster_id: String,
        consumed: Resources,
        limit: Resources,
    },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("state store error: {0}")]
    State(#[from] StateError),
}

impl SchedulerError {
    /// True for outcomes that reject a request rather than signal a fault.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::ClusterNotFound(_)
                | Self::InsufficientResourcesAfterPreemption { .. }
                | Self::Ledger(LedgerError::InsufficientResources { .. })
        )
    }
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
