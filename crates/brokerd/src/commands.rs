//! One-shot operator commands. Each prints its result as JSON on stdout.

use serde::Serialize;
use tracing::{debug, info};

use broker_completion::CompletionSweeper;
use broker_scheduler::{AdmissionScheduler, DeploymentRequest, epoch_secs};
use broker_state::{Resources, StateStore};

use crate::config::BrokerConfig;

/// Open the on-disk store, creating the data directory if needed.
///
/// A running daemon holds the database file only for the length of a sweep
/// pass; this waits up to the configured lock timeout for it.
pub fn open_store(config: &BrokerConfig) -> anyhow::Result<StateStore> {
    std::fs::create_dir_all(&config.store.data_dir)?;
    let db_path = config.db_path();
    let state = StateStore::open_with_timeout(&db_path, config.lock_timeout())?;
    debug!(path = ?db_path, "state store opened");
    Ok(state)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn reconcile(config: &BrokerConfig) -> anyhow::Result<()> {
    let scheduler = AdmissionScheduler::new(open_store(config)?);
    let reports = scheduler.reconcile_all()?;
    print_json(&reports)
}

pub fn create_org(config: &BrokerConfig, name: &str) -> anyhow::Result<()> {
    let org = open_store(config)?.create_organization(name, epoch_secs())?;
    info!(id = %org.id, %name, "organization created");
    print_json(&org)
}

pub fn list_orgs(config: &BrokerConfig) -> anyhow::Result<()> {
    print_json(&open_store(config)?.list_organizations()?)
}

pub fn create_cluster(
    config: &BrokerConfig,
    org: &str,
    name: &str,
    cpu: f64,
    ram: f64,
    gpu: f64,
) -> anyhow::Result<()> {
    let cluster = open_store(config)?.create_cluster(
        org,
        name,
        Resources::new(cpu, ram, gpu),
        epoch_secs(),
    )?;
    info!(id = %cluster.id, organization = %org, limit = %cluster.limit, "cluster created");
    print_json(&cluster)
}

pub fn list_clusters(config: &BrokerConfig, org: Option<&str>) -> anyhow::Result<()> {
    let state = open_store(config)?;
    let clusters = match org {
        Some(org) => state.list_clusters_for_organization(org)?,
        None => state.list_clusters()?,
    };
    print_json(&clusters)
}

pub fn submit(config: &BrokerConfig, request: DeploymentRequest) -> anyhow::Result<()> {
    let scheduler = AdmissionScheduler::new(open_store(config)?);
    let admission = scheduler.submit(&request)?;
    print_json(&admission)
}

/// Retry admission of an existing pending deployment.
pub fn schedule(config: &BrokerConfig, cluster: &str, deployment: &str) -> anyhow::Result<()> {
    let scheduler = AdmissionScheduler::new(open_store(config)?);
    let admission = scheduler.schedule(cluster, deployment)?;
    print_json(&admission)
}

/// Run one completion pass now.
pub fn sweep(config: &BrokerConfig) -> anyhow::Result<()> {
    let completed = CompletionSweeper::new(open_store(config)?).sweep(epoch_secs())?;
    print_json(&completed)
}

pub fn list_deployments(config: &BrokerConfig, cluster: Option<&str>) -> anyhow::Result<()> {
    let state = open_store(config)?;
    let deployments = match cluster {
        Some(cluster) => state.list_deployments_for_cluster(cluster)?,
        None => state.list_deployments()?,
    };
    print_json(&deployments)
}
