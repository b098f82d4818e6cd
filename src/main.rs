use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use workmesh::client::CoordinatorClient;
use workmesh::config::{default_pool_size, default_worker_id, CoordinatorConfig, WorkerConfig};
use workmesh::coordinator::Coordinator;
use workmesh::shutdown::install_shutdown_handler;
use workmesh::task::{decode_value, encode_values, Task, Value};
use workmesh::worker::WorkerAgent;

#[derive(Parser, Debug)]
#[command(name = "workmesh")]
#[command(version)]
#[command(about = "Dispatch WebAssembly tasks to a pool of workers")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the coordinator
    Coordinator(CoordinatorArgs),

    /// Start a worker and register it with a coordinator
    Worker(WorkerArgs),

    /// Task submission and results
    Task {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: TaskCommands,
    },

    /// Inspect registered workers
    Workers {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: WorkersCommands,
    },
}

// =============================================================================
// Server Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct CoordinatorArgs {
    /// Port to listen on
    #[arg(long, default_value = "8080")]
    port: u16,

    /// Timeout for forwarding a task to a worker, in milliseconds
    #[arg(long, default_value = "10000")]
    dispatch_timeout_ms: u64,

    /// Mark workers unavailable when their last heartbeat is older than this.
    /// Off unless given.
    #[arg(long)]
    stale_worker_after_ms: Option<u64>,

    /// Number of reported results kept for lookup
    #[arg(long, default_value = "10000")]
    result_capacity: usize,
}

#[derive(Parser, Debug)]
struct WorkerArgs {
    /// Port to listen on for task delivery
    #[arg(long, default_value = "8081")]
    port: u16,

    /// Coordinator base URL
    #[arg(long, default_value = "http://localhost:8080")]
    coordinator_url: String,

    /// Worker ID (defaults to worker-<unix millis>)
    #[arg(long)]
    worker_id: Option<String>,

    /// Address the coordinator should use to reach this worker
    #[arg(long)]
    advertise_addr: Option<String>,

    /// Maximum concurrent tasks (defaults to available parallelism)
    #[arg(long)]
    pool_size: Option<usize>,

    /// Delay before the first heartbeat, in milliseconds
    #[arg(long, default_value = "5000")]
    heartbeat_initial_delay_ms: u64,

    /// Heartbeat period, in milliseconds
    #[arg(long, default_value = "10000")]
    heartbeat_interval_ms: u64,
}

// =============================================================================
// Client Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Coordinator address
    #[arg(long, short = 'a', global = true, default_value = "http://127.0.0.1:8080")]
    addr: String,

    /// Output format
    #[arg(long, short = 'o', global = true, default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(clap::Subcommand, Debug)]
enum TaskCommands {
    /// Submit a WebAssembly module entry point for execution
    Submit {
        /// Path to the .wasm payload
        payload: PathBuf,

        /// Exported function to call
        #[arg(long, short = 'e')]
        entry: String,

        /// Argument as kind:literal (i32:3, i64:4, f32:1.5, f64:2.5, bool:true, text:hi)
        #[arg(long = "arg")]
        args: Vec<Value>,

        /// Cache qualifier (defaults to the payload file stem)
        #[arg(long, short = 'q')]
        qualifier: Option<String>,

        #[arg(long, default_value = "0")]
        priority: i32,

        /// Declared deadline; recorded but not enforced
        #[arg(long, default_value = "0")]
        timeout_ms: u64,
    },
    /// Show the reported result of a task
    Result {
        /// The task ID (UUID)
        task_id: Uuid,
    },
}

#[derive(clap::Subcommand, Debug)]
enum WorkersCommands {
    /// List registered workers
    List,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TaskResultOutput {
    task_id: Uuid,
    success: bool,
    result: Option<String>,
    error_message: Option<String>,
}

// =============================================================================
// Server Implementation
// =============================================================================

async fn run_coordinator(args: CoordinatorArgs) -> Result<(), Box<dyn std::error::Error>> {
    let listen_addr: SocketAddr = format!("0.0.0.0:{}", args.port).parse()?;
    let config = CoordinatorConfig {
        listen_addr,
        dispatch_timeout_ms: args.dispatch_timeout_ms,
        stale_worker_after_ms: args.stale_worker_after_ms,
        result_capacity: args.result_capacity,
        ..CoordinatorConfig::default()
    };

    let shutdown = install_shutdown_handler("coordinator");
    let listener = TcpListener::bind(config.listen_addr).await?;
    Coordinator::new(config).run(listener, shutdown).await?;
    Ok(())
}

async fn run_worker(args: WorkerArgs) -> Result<(), Box<dyn std::error::Error>> {
    let listen_addr: SocketAddr = format!("0.0.0.0:{}", args.port).parse()?;
    let config = WorkerConfig {
        worker_id: args.worker_id.unwrap_or_else(default_worker_id),
        listen_addr,
        advertise_addr: args.advertise_addr,
        coordinator_url: args.coordinator_url,
        heartbeat_initial_delay_ms: args.heartbeat_initial_delay_ms,
        heartbeat_interval_ms: args.heartbeat_interval_ms,
        pool_size: args.pool_size.unwrap_or_else(default_pool_size).max(1),
        ..WorkerConfig::default()
    };

    let link = CoordinatorClient::new(
        config.coordinator_url.clone(),
        Duration::from_millis(config.request_timeout_ms),
    )?;
    let shutdown = install_shutdown_handler("worker");
    let listener = TcpListener::bind(config.listen_addr).await?;
    let agent = Arc::new(WorkerAgent::new(config, Arc::new(link)));
    agent.run(listener, shutdown).await?;
    Ok(())
}

// =============================================================================
// Client Implementation
// =============================================================================

fn client_for(args: &ClientArgs) -> Result<CoordinatorClient, Box<dyn std::error::Error>> {
    Ok(CoordinatorClient::new(
        args.addr.clone(),
        Duration::from_secs(30),
    )?)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run_task_command(
    client: ClientArgs,
    command: TaskCommands,
) -> Result<(), Box<dyn std::error::Error>> {
    let coordinator = client_for(&client)?;
    match command {
        TaskCommands::Submit {
            payload,
            entry,
            args,
            qualifier,
            priority,
            timeout_ms,
        } => {
            let bytes = tokio::fs::read(&payload).await?;
            let qualifier = match qualifier {
                Some(q) => q,
                None => payload
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .ok_or("cannot derive a qualifier from the payload path, pass --qualifier")?
                    .to_string(),
            };
            let task = Task::new(qualifier, entry, bytes, encode_values(&args)?)
                .with_priority(priority)
                .with_timeout_ms(timeout_ms);

            let response = coordinator.submit(&task).await?;
            match client.output {
                OutputFormat::Json => print_json(&response)?,
                OutputFormat::Table => {
                    println!("Task submitted");
                    println!("  Task ID:   {}", response.task_id);
                    println!("  Worker:    {}", response.worker_id);
                    println!("  Status:    {}", response.status);
                }
            }
        }
        TaskCommands::Result { task_id } => {
            let Some(result) = coordinator.result(task_id).await? else {
                return Err(format!("no result reported for task {}", task_id).into());
            };
            let decoded = match result.result() {
                Some(bytes) => Some(decode_value(bytes)?.to_string()),
                None => None,
            };
            let output = TaskResultOutput {
                task_id: result.task_id,
                success: result.is_success(),
                result: decoded,
                error_message: result.error_message().map(str::to_string),
            };
            match client.output {
                OutputFormat::Json => print_json(&output)?,
                OutputFormat::Table => {
                    println!("Task ID:   {}", output.task_id);
                    println!("Success:   {}", output.success);
                    if let Some(value) = &output.result {
                        println!("Result:    {}", value);
                    }
                    if let Some(error) = &output.error_message {
                        println!("Error:     {}", error);
                    }
                }
            }
        }
    }
    Ok(())
}

async fn run_workers_command(
    client: ClientArgs,
    command: WorkersCommands,
) -> Result<(), Box<dyn std::error::Error>> {
    let coordinator = client_for(&client)?;
    match command {
        WorkersCommands::List => {
            let workers = coordinator.list_workers().await?;
            match client.output {
                OutputFormat::Json => print_json(&workers)?,
                OutputFormat::Table => {
                    println!(
                        "{:<24} {:<32} {:<12} {:<8} {}",
                        "WORKER", "ADDRESS", "STATUS", "ACTIVE", "LAST HEARTBEAT"
                    );
                    for worker in workers {
                        println!(
                            "{:<24} {:<32} {:<12} {:<8} {}",
                            worker.worker_id,
                            worker.address,
                            worker.status.to_string(),
                            worker.active_tasks,
                            worker.last_heartbeat.to_rfc3339()
                        );
                    }
                }
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    match args.command {
        Commands::Coordinator(args) => run_coordinator(args).await,
        Commands::Worker(args) => run_worker(args).await,
        Commands::Task { client, command } => run_task_command(client, command).await,
        Commands::Workers { client, command } => run_workers_command(client, command).await,
    }
}
