use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use bdws_supervisor::config::{DispatchConfig, SupervisorConfig};
use bdws_supervisor::node::Node;
use bdws_supervisor::scheduler::{Job, JobResults, Payload, Registration, Worker};
use bdws_supervisor::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "bdws-supervisor")]
#[command(version)]
#[command(about = "Distributed batch-job supervisor")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the supervisor
    Server(ServerArgs),

    /// Submit a job to a running supervisor
    Submit(SubmitArgs),

    /// Register a worker with a running supervisor
    Register(RegisterArgs),
}

// =============================================================================
// Server Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Port to listen on for job submissions and registrations
    #[arg(long, default_value = "8080")]
    port: u16,

    /// Number of concurrent dispatch loops
    #[arg(long, default_value = "64")]
    dispatch_loops: usize,

    /// Cooldown before a worker that failed a task is used again (milliseconds)
    #[arg(long, default_value = "1000")]
    cooldown_ms: u64,

    /// Timeout for a single task sent to a worker (seconds)
    #[arg(long, default_value = "30")]
    request_timeout_secs: u64,

    /// Dispatch attempts per task before its job is abandoned (0 = retry forever)
    #[arg(long, default_value = "10")]
    max_attempts: u32,

    /// Maximum number of submissions waiting for intake
    #[arg(long, default_value = "100")]
    intake_capacity: usize,

    /// Maximum number of jobs tracked at once, finished or not
    #[arg(long, default_value = "10000")]
    max_jobs: usize,

    /// How long results of finished jobs are kept for collection (seconds)
    #[arg(long, default_value = "600")]
    result_retention_secs: u64,
}

// =============================================================================
// Client Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Supervisor address
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

#[derive(Parser, Debug)]
struct SubmitArgs {
    #[command(flatten)]
    client: ClientArgs,

    /// Program to run on the workers
    file: PathBuf,

    /// First parameter value (inclusive)
    #[arg(long, requires = "end")]
    start: Option<i64>,

    /// Last parameter value (inclusive)
    #[arg(long, requires = "start")]
    end: Option<i64>,

    /// Number of runs of an unparameterized job (0 = one per idle worker)
    #[arg(long, default_value = "0", conflicts_with = "start")]
    repeat: u32,

    /// Maximum number of machines for an unparameterized job (0 = all idle)
    #[arg(long, default_value = "0")]
    machines: u32,

    /// Return as soon as the job is accepted instead of waiting for results
    #[arg(long = "async")]
    no_wait: bool,

    /// Arguments passed to the program
    #[arg(last = true)]
    args: Vec<String>,
}

#[derive(Parser, Debug)]
struct RegisterArgs {
    #[command(flatten)]
    client: ClientArgs,

    /// Address workers are reachable at (host:port)
    #[arg(long)]
    hostname: String,

    #[arg(long, default_value = "1")]
    cores: u32,

    #[arg(long, default_value = "")]
    model_name: String,

    /// CPU speed in MHz
    #[arg(long, default_value = "0")]
    cpu_speed: f64,

    /// Available memory in MB
    #[arg(long, default_value = "0")]
    mem_available: u64,
}

#[derive(Serialize, Deserialize)]
struct AcceptedOutput {
    job_id: String,
}

#[derive(Deserialize)]
struct ErrorOutput {
    error: String,
}

// =============================================================================
// Server Implementation
// =============================================================================

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    let listen_addr: SocketAddr = format!("0.0.0.0:{}", args.port).parse()?;

    let dispatch = DispatchConfig::default()
        .with_dispatch_loops(args.dispatch_loops)
        .with_cooldown(Duration::from_millis(args.cooldown_ms))
        .with_request_timeout(Duration::from_secs(args.request_timeout_secs))
        .with_max_attempts(args.max_attempts)
        .with_max_jobs(args.max_jobs)
        .with_result_retention(Duration::from_secs(args.result_retention_secs));

    let config = SupervisorConfig::new(listen_addr)
        .with_intake_capacity(args.intake_capacity)
        .with_dispatch(dispatch);

    tracing::info!(
        listen_addr = %config.listen_addr,
        dispatch_loops = config.dispatch.dispatch_loops,
        cooldown_ms = args.cooldown_ms,
        max_attempts = ?config.dispatch.max_attempts,
        "Starting supervisor"
    );

    let node = Node::new(config)?;
    let cancel = install_shutdown_handler();
    node.run(cancel).await
}

// =============================================================================
// Client Command Handlers
// =============================================================================

async fn read_payload(
    file: &Path,
    args: Vec<String>,
) -> Result<Payload, Box<dyn std::error::Error>> {
    let code = tokio::fs::read(file).await?;
    let file_name = file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = file
        .extension()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(Payload {
        file_name,
        extension,
        code,
        args,
    })
}

async fn error_message(response: reqwest::Response) -> String {
    let status = response.status();
    match response.json::<ErrorOutput>().await {
        Ok(body) => body.error,
        Err(_) => status.to_string(),
    }
}

async fn handle_submit(args: SubmitArgs) -> Result<(), Box<dyn std::error::Error>> {
    let payload = read_payload(&args.file, args.args).await?;
    let mut job = match (args.start, args.end) {
        (Some(start), Some(end)) => Job::parameterized(payload, start, end),
        _ => Job::replicated(payload, args.repeat),
    };
    job.machines = args.machines;

    let mode = if args.no_wait { "async" } else { "sync" };
    let url = format!("{}/job?mode={}", args.client.addr.trim_end_matches('/'), mode);
    let response = reqwest::Client::new().post(&url).json(&job).send().await?;

    if !response.status().is_success() {
        eprintln!("Error: Job submission failed: {}", error_message(response).await);
        std::process::exit(1);
    }

    if args.no_wait {
        let accepted: AcceptedOutput = response.json().await?;
        match args.client.output {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&accepted)?),
            OutputFormat::Table => {
                println!("Job submitted successfully!");
                println!("Job ID: {}", accepted.job_id);
            }
        }
        return Ok(());
    }

    let results: JobResults = response.json().await?;
    match args.client.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&results)?),
        OutputFormat::Table => {
            println!("Job ID:  {}", results.job_id);
            println!("Results: {}", results.results.len());
            for (index, result) in results.results.iter().enumerate() {
                println!("[{}]", index);
                for line in result.lines() {
                    println!("  {}", line);
                }
            }
        }
    }
    Ok(())
}

async fn handle_register(args: RegisterArgs) -> Result<(), Box<dyn std::error::Error>> {
    let registration = Registration {
        hostname: args.hostname,
        cores: args.cores,
        model_name: args.model_name,
        cpu_speed: args.cpu_speed,
        mem_available: args.mem_available,
    };
    let url = format!("{}/register", args.client.addr.trim_end_matches('/'));
    let response = reqwest::Client::new()
        .post(&url)
        .json(&registration)
        .send()
        .await?;

    if !response.status().is_success() {
        eprintln!("Error: Registration failed: {}", error_message(response).await);
        std::process::exit(1);
    }

    let worker: Worker = response.json().await?;
    match args.client.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&worker)?),
        OutputFormat::Table => {
            println!("Worker ID: {}", worker.id);
            println!("Hostname:  {}", worker.hostname);
            println!("Priority:  {}", worker.priority);
        }
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Server(server_args) => run_server(server_args).await?,
        Commands::Submit(submit_args) => handle_submit(submit_args).await?,
        Commands::Register(register_args) => handle_register(register_args).await?,
    }

    Ok(())
}
