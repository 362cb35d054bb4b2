//! broker-completion: time-driven completion of running deployments.
//!
//! A deployment is admitted with a required runtime. Once that much time
//! has passed since admission, the sweeper marks it `Completed` and gives
//! its resources back to the cluster ledger, so capacity freed by finished
//! work is reusable exactly like capacity freed by preemption.
//!
//! # Architecture
//!
//! ```text
//! CompletionSweeper
//!   └── sweep(now): one pass over every Running deployment
//!       └── per deployment: one write transaction
//!           (re-check status, mark Completed, credit cluster)
//! run_sweeper(open, clock, interval, shutdown)
//!   └── background loop: open store, sweep, release store
//! ```
//!
//! Sweeping is idempotent: a second pass at the same `now` finds nothing
//! left to complete.

pub mod sweeper;

pub use sweeper::{CompletionSweeper, run_sweeper};
