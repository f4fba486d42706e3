use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use cronfleet::config::{CoordinatorConfig, WorkerConfig};
use cronfleet::coordinator::Coordinator;
use cronfleet::shutdown::install_shutdown_handler;
use cronfleet::transport::run_worker_link;
use cronfleet::worker::WorkerNode;

#[derive(Parser, Debug)]
#[command(name = "cronfleet")]
#[command(version)]
#[command(about = "Recurring HTTP jobs dispatched across a pool of workers")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the coordinator (scheduler, registry, dashboard and worker hub)
    Coordinator(CoordinatorArgs),

    /// Start a worker and connect it to a coordinator
    Worker(WorkerArgs),

    /// Job management commands
    Job {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: JobCommands,
    },

    /// Cluster management commands
    Cluster {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: ClusterCommands,
    },
}

// =============================================================================
// Coordinator Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct CoordinatorArgs {
    /// Address for the dashboard and the /hub worker endpoint
    #[arg(long, default_value = "0.0.0.0:8080")]
    listen: SocketAddr,

    /// JSON file with job definitions to load at startup
    #[arg(long)]
    jobs_file: Option<PathBuf>,

    /// Run every Auto job locally, ignoring connected workers
    #[arg(long)]
    no_clustering: bool,

    /// Dispatch retries after the first attempt
    #[arg(long, default_value = "3")]
    max_retries: u32,

    /// Base delay in seconds for exponential dispatch backoff
    #[arg(long, default_value = "2")]
    retry_delay_secs: u64,

    /// Seconds without a heartbeat before a worker stops being selectable
    #[arg(long, default_value = "120")]
    liveness_window_secs: u64,

    /// Seconds without a heartbeat before a worker is evicted
    #[arg(long, default_value = "300")]
    stale_threshold_secs: u64,
}

// =============================================================================
// Worker Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct WorkerArgs {
    /// Instance name shown on the dashboard
    #[arg(long, default_value = "worker")]
    name: String,

    /// Coordinator hub URL
    #[arg(long, default_value = "ws://127.0.0.1:8080/hub")]
    coordinator: String,

    /// Concurrent execution slots
    #[arg(long, default_value = "10")]
    max_concurrent_jobs: usize,

    /// Pending commands held before the link applies backpressure
    #[arg(long, default_value = "1000")]
    queue_capacity: usize,

    /// Seconds between unsolicited heartbeats
    #[arg(long, default_value = "30")]
    heartbeat_secs: u64,

    /// Advertised host name
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Advertised IP address
    #[arg(long, default_value = "127.0.0.1")]
    ip: String,

    /// Advertised port
    #[arg(long, default_value = "5001")]
    port: u16,
}

// =============================================================================
// Client Arguments (shared by job and cluster commands)
// =============================================================================

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Coordinator dashboard address
    #[arg(long, short = 'a', default_value = "http://127.0.0.1:8080")]
    addr: String,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(clap::Subcommand, Debug)]
enum JobCommands {
    /// List configured jobs
    List,
    /// Fire a job now; reports whether the dispatch step succeeded
    Trigger {
        job_id: u64,
    },
    /// Show recorded executions of a job
    History {
        job_id: u64,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ClusterCommands {
    /// List connected workers and their load
    Workers,
}

// =============================================================================
// Dashboard API Types
// =============================================================================

#[derive(Serialize, Deserialize)]
struct JobItem {
    id: u64,
    name: String,
    method: String,
    url: String,
    status: String,
    execution: String,
    schedule: String,
}

#[derive(Serialize, Deserialize)]
struct TriggerOutput {
    job_id: u64,
    success: bool,
    error: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct ExecutionItem {
    worker_id: Option<String>,
    status: String,
    status_code: Option<u16>,
    error: Option<String>,
    duration_ms: u64,
    fired_at: String,
}

#[derive(Serialize, Deserialize)]
struct WorkerItem {
    id: String,
    name: String,
    host: String,
    port: u16,
    max_concurrent: usize,
    current_running: usize,
    queue_depth: usize,
    cpu_usage: f64,
    available: bool,
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

// =============================================================================
// Process Implementations
// =============================================================================

async fn run_coordinator(args: CoordinatorArgs) -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let mut config = CoordinatorConfig::new(args.listen);
    if let Some(path) = args.jobs_file {
        config = config.with_jobs_file(path);
    }
    config.dispatch.clustering_enabled = !args.no_clustering;
    config.dispatch.max_retries = args.max_retries;
    config.dispatch.retry_delay = Duration::from_secs(args.retry_delay_secs);
    config.registry.liveness_window = Duration::from_secs(args.liveness_window_secs);
    config.registry.stale_threshold = Duration::from_secs(args.stale_threshold_secs);

    let cancel = install_shutdown_handler();
    let coordinator = Coordinator::new(config).await?;
    coordinator.run(cancel).await?;
    Ok(())
}

async fn run_worker(args: WorkerArgs) -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let mut config = WorkerConfig::new(args.name, args.coordinator)
        .with_max_concurrent_jobs(args.max_concurrent_jobs)
        .with_queue_capacity(args.queue_capacity);
    config.heartbeat_interval = Duration::from_secs(args.heartbeat_secs);
    config.host = args.host;
    config.ip_address = args.ip;
    config.port = args.port;

    tracing::info!(
        name = %config.instance_name,
        coordinator = %config.coordinator_url,
        "Starting cronfleet worker"
    );

    let cancel = install_shutdown_handler();
    let (node, outbound) = WorkerNode::new(config)?;
    let node = Arc::new(node);

    let handles = node.start(&cancel);
    run_worker_link(node, outbound, cancel).await;
    for handle in handles {
        let _ = handle.await;
    }

    tracing::info!("Worker stopped");
    Ok(())
}

// =============================================================================
// Client Command Handlers
// =============================================================================

async fn handle_job_list(
    http: &reqwest::Client,
    client: &ClientArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let jobs: Vec<JobItem> = http
        .get(format!("{}/api/jobs", client.addr))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    match client.output {
        OutputFormat::Json => print_json(&jobs)?,
        OutputFormat::Table => {
            if jobs.is_empty() {
                println!("No jobs found.");
                return Ok(());
            }
            println!(
                "{:<6} {:<20} {:<8} {:<12} {:<18} URL",
                "ID", "NAME", "STATUS", "EXECUTION", "SCHEDULE"
            );
            println!("{}", "-".repeat(90));
            for job in &jobs {
                println!(
                    "{:<6} {:<20} {:<8} {:<12} {:<18} {} {}",
                    job.id,
                    job.name,
                    job.status,
                    job.execution,
                    job.schedule,
                    job.method,
                    job.url
                );
            }
        }
    }
    Ok(())
}

async fn handle_job_trigger(
    http: &reqwest::Client,
    client: &ClientArgs,
    job_id: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let output: TriggerOutput = http
        .post(format!("{}/api/jobs/{}/trigger", client.addr, job_id))
        .send()
        .await?
        .json()
        .await?;

    match client.output {
        OutputFormat::Json => print_json(&output)?,
        OutputFormat::Table => match (&output.error, output.success) {
            (Some(error), _) => println!("Job {}: {}", job_id, error),
            (None, true) => println!("Job {} dispatched successfully.", job_id),
            (None, false) => println!("Job {} was not dispatched; see its history for details.", job_id),
        },
    }
    Ok(())
}

async fn handle_job_history(
    http: &reqwest::Client,
    client: &ClientArgs,
    job_id: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let history: Vec<ExecutionItem> = http
        .get(format!("{}/api/jobs/{}/executions", client.addr, job_id))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    match client.output {
        OutputFormat::Json => print_json(&history)?,
        OutputFormat::Table => {
            if history.is_empty() {
                println!("No executions recorded for job {}.", job_id);
                return Ok(());
            }
            println!("{:<32} {:<8} {:<6} {:<10} {:<38} ERROR", "FIRED AT", "STATUS", "CODE", "DURATION", "WORKER");
            println!("{}", "-".repeat(110));
            for item in &history {
                let code = item.status_code.map(|c| c.to_string()).unwrap_or_else(|| "-".to_string());
                let worker = item.worker_id.as_deref().unwrap_or("local");
                let error = item.error.as_deref().unwrap_or("");
                // Keep rows on one line
                let error = if error.chars().count() > 40 {
                    format!("{}...", error.chars().take(37).collect::<String>())
                } else {
                    error.to_string()
                };
                println!(
                    "{:<32} {:<8} {:<6} {:<10} {:<38} {}",
                    item.fired_at,
                    item.status,
                    code,
                    format!("{}ms", item.duration_ms),
                    worker,
                    error
                );
            }
        }
    }
    Ok(())
}

async fn handle_cluster_workers(
    http: &reqwest::Client,
    client: &ClientArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let workers: Vec<WorkerItem> = http
        .get(format!("{}/api/workers", client.addr))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    match client.output {
        OutputFormat::Json => print_json(&workers)?,
        OutputFormat::Table => {
            if workers.is_empty() {
                println!("No workers connected.");
                return Ok(());
            }
            println!("{:<38} {:<16} {:<10} {:<8} {:<6} STATUS", "ID", "NAME", "RUNNING", "QUEUE", "CPU");
            println!("{}", "-".repeat(90));
            for worker in &workers {
                let status_icon = if worker.available { "[+]" } else { "[-]" };
                let status = if worker.available { "available" } else { "busy/stale" };
                println!(
                    "{:<38} {:<16} {:<10} {:<8} {:<6.2} {} {}",
                    worker.id,
                    worker.name,
                    format!("{}/{}", worker.current_running, worker.max_concurrent),
                    worker.queue_depth,
                    worker.cpu_usage,
                    status_icon,
                    status
                );
            }
        }
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Coordinator(coordinator_args) => {
            run_coordinator(coordinator_args).await?;
        }
        Commands::Worker(worker_args) => {
            run_worker(worker_args).await?;
        }
        Commands::Job { client, command } => {
            let http = reqwest::Client::new();
            match command {
                JobCommands::List => handle_job_list(&http, &client).await?,
                JobCommands::Trigger { job_id } => handle_job_trigger(&http, &client, job_id).await?,
                JobCommands::History { job_id } => handle_job_history(&http, &client, job_id).await?,
            }
        }
        Commands::Cluster { client, command } => {
            let http = reqwest::Client::new();
            match command {
                ClusterCommands::Workers => handle_cluster_workers(&http, &client).await?,
            }
        }
    }

    Ok(())
}
