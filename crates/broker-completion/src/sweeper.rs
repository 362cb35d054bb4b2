//! Completion sweeper: retires deployments past their required runtime.
//!
//! Scans `Running` deployments, and for each one whose runtime has elapsed
//! marks it `Completed` and credits its requirement back to the cluster.
//! Every deployment is handled in its own write transaction, re-read inside
//! that transaction, so a deployment preempted after the scan is skipped
//! rather than credited twice.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use broker_scheduler::ledger;
use broker_state::*;

/// Completes deployments whose runtime has elapsed.
#[derive(Clone)]
pub struct CompletionSweeper {
    state: StateStore,
}

impl CompletionSweeper {
    /// Create a new sweeper over the given store.
    pub fn new(state: StateStore) -> Self {
        Self { state }
    }

    /// Complete every running deployment whose runtime has elapsed at `now`.
    ///
    /// Returns the deployments transitioned by this pass. A deployment whose
    /// transaction fails is logged and left for the next pass; the rest of
    /// the pass still runs.
    pub fn sweep(&self, now: u64) -> StateResult<Vec<Deployment>> {
        let running = self.state.list_running_deployments()?;
        let checked = running.len();
        let mut completed = Vec::new();
        let mut failed = 0usize;

        for candidate in running.iter().filter(|d| d.runtime_elapsed(now)) {
            match self.state.transact(|txn| complete(txn, &candidate.id, now)) {
                Ok(Some(done)) => {
                    info!(
                        deployment = %done.id,
                        cluster = %done.cluster_id,
                        runtime_secs = done.required_runtime_secs,
                        "deployment completed"
                    );
                    completed.push(done);
                }
                Ok(None) => {}
                Err(e) => {
                    failed += 1;
                    error!(deployment = %candidate.id, error = %e, "failed to complete deployment");
                }
            }
        }

        debug!(checked, completed = completed.len(), failed, "completion sweep finished");
        Ok(completed)
    }
}

/// Run a sweep every `interval` until `shutdown` fires.
///
/// `open` is called at the start of each pass and the store it returns is
/// dropped when the pass ends, so the database file is only held while a
/// pass runs. A pass whose store cannot be opened is skipped.
pub async fn run_sweeper<F>(
    mut open: F,
    clock: fn() -> u64,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) where
    F: FnMut() -> StateResult<StateStore>,
{
    info!(interval_secs = interval.as_secs(), "completion sweeper started");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                match open() {
                    Ok(state) => {
                        if let Err(e) = CompletionSweeper::new(state).sweep(clock()) {
                            error!(error = %e, "completion sweep failed");
                        }
                    }
                    Err(StateError::Locked(path)) => {
                        debug!(%path, "store busy, sweep skipped");
                    }
                    Err(e) => {
                        error!(error = %e, "failed to open store for sweep");
                    }
                }
            }
            _ = shutdown.changed() => {
                info!("completion sweeper shutting down");
                break;
            }
        }
    }
}

/// Complete one deployment inside an open transaction.
///
/// Returns `None` if it is no longer due (already completed, preempted, or
/// gone since the scan).
fn complete(txn: &StateTxn<'_>, deployment_id: &str, now: u64) -> StateResult<Option<Deployment>> {
    let Some(mut deployment) = txn.get_deployment(deployment_id)? else {
        return Ok(None);
    };
    if !deployment.runtime_elapsed(now) {
        return Ok(None);
    }

    deployment.status = DeploymentStatus::Completed;
    deployment.completed_at = Some(now);
    txn.put_deployment(&deployment)?;

    match txn.get_cluster(&deployment.cluster_id)? {
        Some(mut cluster) => {
            ledger::credit(&mut cluster, &deployment.requirement);
            txn.put_cluster(&cluster)?;
        }
        None => {
            warn!(
                deployment = %deployment.id,
                cluster = %deployment.cluster_id,
                "completed deployment references a missing cluster, nothing credited"
            );
        }
    }

    Ok(Some(deployment))
}
