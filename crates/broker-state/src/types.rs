//! Domain types for the broker state store.
//!
//! These types represent the persisted state of organizations, clusters,
//! and deployments. All types are serializable to/from JSON for storage
//! in redb tables.

use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an organization.
pub type OrganizationId = String;

/// Unique identifier for a cluster.
pub type ClusterId = String;

/// Unique identifier for a deployment.
pub type DeploymentId = String;

/// Generate a fresh opaque record id.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

// ── Resources ─────────────────────────────────────────────────────

/// Rounding slack tolerated when comparing resource amounts.
pub const EPSILON: f64 = 1e-9;

/// CPU / RAM / GPU amounts.
///
/// Used both for cluster capacity counters and for deployment
/// requirements. Comparisons are per dimension; there is no aggregate
/// or weighted ordering.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Resources {
    pub cpu: f64,
    pub ram: f64,
    pub gpu: f64,
}

impl Resources {
    pub const ZERO: Resources = Resources {
        cpu: 0.0,
        ram: 0.0,
        gpu: 0.0,
    };

    pub fn new(cpu: f64, ram: f64, gpu: f64) -> Self {
        Self { cpu, ram, gpu }
    }

    /// True iff every dimension of `self` is at most the same dimension of
    /// `other`, give or take [`EPSILON`] of rounding.
    pub fn fits_within(&self, other: &Resources) -> bool {
        self.cpu <= other.cpu + EPSILON
            && self.ram <= other.ram + EPSILON
            && self.gpu <= other.gpu + EPSILON
    }

    /// Every negative component raised to zero.
    pub fn clamped(self) -> Self {
        Self {
            cpu: self.cpu.max(0.0),
            ram: self.ram.max(0.0),
            gpu: self.gpu.max(0.0),
        }
    }

    /// Check that every component is finite and non-negative.
    pub fn validate(&self) -> Result<(), String> {
        for (dimension, value) in [("cpu", self.cpu), ("ram", self.ram), ("gpu", self.gpu)] {
            if !value.is_finite() {
                return Err(format!("{dimension} must be finite, got {value}"));
            }
            if value < 0.0 {
                return Err(format!("{dimension} must be non-negative, got {value}"));
            }
        }
        Ok(())
    }
}

impl fmt::Display for Resources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cpu={} ram={} gpu={}", self.cpu, self.ram, self.gpu)
    }
}

impl Add for Resources {
    type Output = Resources;

    fn add(self, rhs: Resources) -> Resources {
        Resources {
            cpu: self.cpu + rhs.cpu,
            ram: self.ram + rhs.ram,
            gpu: self.gpu + rhs.gpu,
        }
    }
}

impl AddAssign for Resources {
    fn add_assign(&mut self, rhs: Resources) {
        *self = *self + rhs;
    }
}

impl Sub for Resources {
    type Output = Resources;

    fn sub(self, rhs: Resources) -> Resources {
        Resources {
            cpu: self.cpu - rhs.cpu,
            ram: self.ram - rhs.ram,
            gpu: self.gpu - rhs.gpu,
        }
    }
}

impl SubAssign for Resources {
    fn sub_assign(&mut self, rhs: Resources) {
        *self = *self - rhs;
    }
}

impl std::iter::Sum for Resources {
    fn sum<I: Iterator<Item = Resources>>(iter: I) -> Self {
        iter.fold(Resources::ZERO, Add::add)
    }
}

// ── Organization ──────────────────────────────────────────────────

/// A tenant owning clusters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Organization {
    pub id: OrganizationId,
    pub name: String,
    /// Unix timestamp (seconds) when this organization was created.
    pub created_at: u64,
}

impl Organization {
    pub fn new(name: impl Into<String>, now: u64) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
            created_at: now,
        }
    }
}

// ── Cluster ───────────────────────────────────────────────────────

/// A cluster and its resource ledger.
///
/// `available` is `limit` minus the requirements of every `Running`
/// deployment on this cluster. It only moves through the scheduler's
/// ledger operations and the reconciliation routine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cluster {
    pub id: ClusterId,
    pub organization_id: OrganizationId,
    pub name: String,
    /// Total capacity.
    pub limit: Resources,
    /// Capacity not held by a running deployment.
    pub available: Resources,
    /// Unix timestamp (seconds) when this cluster was created.
    pub created_at: u64,
}

impl Cluster {
    /// A fresh cluster with its full limit available.
    pub fn new(
        organization_id: impl Into<String>,
        name: impl Into<String>,
        limit: Resources,
        now: u64,
    ) -> Self {
        Self {
            id: new_id(),
            organization_id: organization_id.into(),
            name: name.into(),
            limit,
            available: limit,
            created_at: now,
        }
    }

    /// Capacity currently held by running deployments.
    pub fn consumed(&self) -> Resources {
        self.limit - self.available
    }
}

// ── Deployment ────────────────────────────────────────────────────

/// A unit of work consuming cluster capacity while `Running`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Deployment {
    pub id: DeploymentId,
    pub cluster_id: ClusterId,
    /// Copied from the cluster at creation.
    pub organization_id: OrganizationId,
    pub name: String,
    /// Workload reference (e.g. a container image). Carried, never interpreted.
    pub image: String,
    pub requirement: Resources,
    /// Higher is more important.
    pub priority: i64,
    pub status: DeploymentStatus,
    /// Store-assigned creation sequence; strictly increasing.
    pub seq: u64,
    /// Unix timestamp (seconds) when this deployment was created.
    pub created_at: u64,
    /// Unix timestamp (seconds) of admission.
    pub started_at: Option<u64>,
    /// Unix timestamp (seconds) of natural completion.
    pub completed_at: Option<u64>,
    /// How long the deployment runs once admitted, in seconds.
    pub required_runtime_secs: u64,
    /// Set when this deployment was failed to make room for another.
    pub preempted_by: Option<DeploymentId>,
}

/// Lifecycle status of a deployment.
///
/// `Pending → Running → {Completed, Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl Deployment {
    pub fn is_running(&self) -> bool {
        self.status == DeploymentStatus::Running
    }

    /// True once a running deployment has been up for its required runtime.
    pub fn runtime_elapsed(&self, now: u64) -> bool {
        self.is_running()
            && self
                .started_at
                .is_some_and(|started| now.saturating_sub(started) >= self.required_runtime_secs)
    }
}
