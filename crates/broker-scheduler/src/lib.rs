//! broker-scheduler: admission and preemption over cluster resource ledgers.
//!
//! Decides the fate of one pending deployment against one cluster:
//!
//! - Admit it when the cluster's available resources cover its requirement
//! - Otherwise preempt strictly lower-priority running deployments, lowest
//!   priority and oldest first, stopping as soon as the request fits
//! - Otherwise reject it, leaving every record untouched
//!
//! # Architecture
//!
//! ```text
//! AdmissionScheduler
//!   ├── StateStore::transact (one write transaction per decision)
//!   ├── ledger (can_fit / debit / credit on a Cluster)
//!   ├── preemption (pure victim selection on a working copy)
//!   └── reconcile (recompute `available` from the Running set)
//! ```

pub mod error;
pub mod ledger;
pub mod preemption;
pub mod reconcile;
pub mod scheduler;

pub use error::{SchedulerError, SchedulerResult};
pub use ledger::LedgerError;
pub use preemption::{PreemptionPlan, plan_preemption, preemption_candidates};
pub use reconcile::{Reconciliation, recompute_available};
pub use scheduler::{Admission, AdmissionScheduler, DeploymentRequest, epoch_secs};
