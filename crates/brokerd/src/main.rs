//! brokerd: the cluster resource broker daemon.
//!
//! Single binary that assembles the broker subsystems:
//! - State store (redb)
//! - Admission scheduler + ledger reconciliation
//! - Completion sweeper
//!
//! and exposes operator commands over the same store.
//!
//! # Usage
//!
//! ```text
//! brokerd --data-dir /var/lib/broker run --sweep-interval 10
//! brokerd org create acme
//! brokerd cluster create --org <id> --name gpu-a --cpu 16 --ram 32 --gpu 4
//! brokerd submit --cluster <id> --name train --cpu 4 --ram 8 --gpu 1 --priority 5 --runtime 3600
//! brokerd schedule --cluster <id> --deployment <id>
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use brokerd::config::{BrokerConfig, DEFAULT_LOG_FILTER};
use brokerd::{commands, daemon};

#[derive(Parser)]
#[command(name = "brokerd", about = "Cluster resource broker daemon")]
struct Cli {
    /// Path to a broker.toml config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory for persistent state (overrides the config file).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Reconcile every cluster, then run the completion sweeper until Ctrl-C.
    Run {
        /// Seconds between completion sweeps (overrides the config file).
        #[arg(long)]
        sweep_interval: Option<u64>,
    },

    /// Recompute every cluster's available resources from its running deployments.
    Reconcile,

    /// Organization management.
    Org {
        #[command(subcommand)]
        command: OrgCommand,
    },

    /// Cluster management.
    Cluster {
        #[command(subcommand)]
        command: ClusterCommand,
    },

    /// Create a deployment and try to admit it.
    Submit {
        #[arg(long)]
        cluster: String,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        image: String,
        #[arg(long, default_value = "0")]
        cpu: f64,
        #[arg(long, default_value = "0")]
        ram: f64,
        #[arg(long, default_value = "0")]
        gpu: f64,
        /// Higher is more important.
        #[arg(long, default_value = "0", allow_hyphen_values = true)]
        priority: i64,
        /// Required runtime in seconds.
        #[arg(long)]
        runtime: u64,
    },

    /// Retry admission of a pending deployment.
    Schedule {
        #[arg(long)]
        cluster: String,
        #[arg(long)]
        deployment: String,
    },

    /// Complete every deployment whose runtime has elapsed, once.
    Sweep,

    /// List deployments.
    Deployments {
        /// Only deployments on this cluster.
        #[arg(long)]
        cluster: Option<String>,
    },
}

#[derive(Subcommand)]
enum OrgCommand {
    /// Create an organization.
    Create { name: String },
    /// List organizations.
    List,
}

#[derive(Subcommand)]
enum ClusterCommand {
    /// Create a cluster with the given capacity.
    Create {
        #[arg(long)]
        org: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        cpu: f64,
        #[arg(long)]
        ram: f64,
        #[arg(long)]
        gpu: f64,
    },
    /// List clusters with their available resources.
    List {
        /// Only clusters owned by this organization.
        #[arg(long)]
        org: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = BrokerConfig::load(cli.config.as_deref())?;
    if let Some(data_dir) = cli.data_dir {
        config.store.data_dir = data_dir;
    }

    init_tracing(&config);

    match cli.command {
        Command::Run { sweep_interval } => {
            if let Some(secs) = sweep_interval {
                config.sweeper.interval_secs = secs;
            }
            daemon::run(&config).await
        }
        Command::Reconcile => commands::reconcile(&config),
        Command::Org { command } => match command {
            OrgCommand::Create { name } => commands::create_org(&config, &name),
            OrgCommand::List => commands::list_orgs(&config),
        },
        Command::Cluster { command } => match command {
            ClusterCommand::Create {
                org,
                name,
                cpu,
                ram,
                gpu,
            } => commands::create_cluster(&config, &org, &name, cpu, ram, gpu),
            ClusterCommand::List { org } => commands::list_clusters(&config, org.as_deref()),
        },
        Command::Submit {
            cluster,
            name,
            image,
            cpu,
            ram,
            gpu,
            priority,
            runtime,
        } => commands::submit(
            &config,
            broker_scheduler::DeploymentRequest {
                cluster_id: cluster,
                name,
                image,
                requirement: broker_state::Resources::new(cpu, ram, gpu),
                priority,
                required_runtime_secs: runtime,
            },
        ),
        Command::Schedule {
            cluster,
            deployment,
        } => commands::schedule(&config, &cluster, &deployment),
        Command::Sweep => commands::sweep(&config),
        Command::Deployments { cluster } => commands::list_deployments(&config, cluster.as_deref()),
    }
}

/// Install the global tracing subscriber. Logs go to stderr so command
/// output on stdout stays machine-readable.
fn init_tracing(config: &BrokerConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_filter()))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    if config.log.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}
