//! The `poiesis` binary: in-container entry points for the pipeline
//! stages. Each derived Job runs one of these subcommands; the API
//! launches `torc run` with the serialized task, and Torc's stage Jobs
//! run `tif run` / `texam run` / `tof run` against the task ConfigMap
//! mounted into the pod.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use poiesis_core::broker::MessageBroker;
use poiesis_core::broker::redis::RedisBroker;
use poiesis_core::config::Config;
use poiesis_core::filer::tif::Tif;
use poiesis_core::filer::tof::Tof;
use poiesis_core::filer::run_filer;
use poiesis_core::kubernetes::KubernetesPort;
use poiesis_core::kubernetes::adaptor::KubeAdapter;
use poiesis_core::security::SecurityContexts;
use poiesis_core::texam::Texam;
use poiesis_core::torc::Torc;
use poiesis_db::config::DbConfig;
use poiesis_db::mongo::MongoRepository;
use poiesis_db::repository::TaskRepository;
use poiesis_models::tes::TesTask;

#[derive(Parser)]
#[command(name = "poiesis", about = "GA4GH TES task engine on Kubernetes")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Task orchestrator: runs one task's pipeline to a terminal state
    Torc {
        #[command(subcommand)]
        command: TorcCommands,
    },
    /// Task input filer: stages inputs onto the shared volume
    Tif {
        #[command(subcommand)]
        command: StageCommands,
    },
    /// Task executor and monitor: runs the executor chain
    Texam {
        #[command(subcommand)]
        command: StageCommands,
    },
    /// Task output filer: uploads outputs from the shared volume
    Tof {
        #[command(subcommand)]
        command: StageCommands,
    },
}

#[derive(Subcommand)]
enum TorcCommands {
    /// Run the orchestrator for the given task
    Run {
        /// TES task request as a JSON string
        #[arg(long)]
        task: String,
    },
}

#[derive(Subcommand)]
enum StageCommands {
    /// Run the stage for the task mounted into this pod
    Run {
        /// Path to the serialized task (defaults to the mounted
        /// ConfigMap path from the environment)
        #[arg(long)]
        task_file: Option<PathBuf>,
    },
}

/// The connected ports every stage needs.
struct Services {
    config: Config,
    security: SecurityContexts,
    repo: Arc<dyn TaskRepository>,
    k8s: Arc<dyn KubernetesPort>,
    broker: Arc<dyn MessageBroker>,
}

async fn connect(config: Config) -> Result<Services> {
    let security =
        SecurityContexts::load(&config).context("failed to load security contexts")?;
    let repo = MongoRepository::connect(&DbConfig::from_env())
        .await
        .context("failed to connect to the document store")?;
    let k8s = KubeAdapter::new(config.namespace.clone())
        .await
        .context("failed to build the cluster client")?;
    let broker = RedisBroker::new(&config.broker).context("failed to connect to the broker")?;
    Ok(Services {
        config,
        security,
        repo: Arc::new(repo),
        k8s: Arc::new(k8s),
        broker: Arc::new(broker),
    })
}

fn parse_task(payload: &str) -> Result<TesTask> {
    serde_json::from_str(payload).context("invalid TES task JSON")
}

fn read_task_file(config: &Config, override_path: Option<PathBuf>) -> Result<TesTask> {
    let path = override_path.unwrap_or_else(|| config.task_request_path.clone());
    let payload = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read task from {}", path.display()))?;
    parse_task(&payload)
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env();
    init_tracing(&config.log_level);

    match cli.command {
        Commands::Torc {
            command: TorcCommands::Run { task },
        } => {
            let task = parse_task(&task)?;
            let services = connect(config).await?;
            let mut torc = Torc::new(
                task,
                services.repo,
                services.k8s,
                services.broker,
                services.config,
                services.security,
            )?;
            torc.execute().await?;
        }
        Commands::Tif {
            command: StageCommands::Run { task_file },
        } => {
            let task = read_task_file(&config, task_file)?;
            let services = connect(config).await?;
            let tif = Tif::new(&task, &services.config)?;
            run_filer(&tif, services.broker.as_ref()).await?;
        }
        Commands::Texam {
            command: StageCommands::Run { task_file },
        } => {
            let task = read_task_file(&config, task_file)?;
            let services = connect(config).await?;
            let texam = Texam::new(
                task,
                services.repo,
                services.k8s,
                services.broker,
                services.config,
                services.security,
            )?;
            texam.execute().await?;
        }
        Commands::Tof {
            command: StageCommands::Run { task_file },
        } => {
            let task = read_task_file(&config, task_file)?;
            let services = connect(config).await?;
            let tof = Tof::new(&task, &services.config)?;
            run_filer(&tof, services.broker.as_ref()).await?;
        }
    }

    Ok(())
}
