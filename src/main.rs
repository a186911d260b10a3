use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use fleet_scheduler::config::{SchedulerConfig, WorkloadWeights};
use fleet_scheduler::node::SchedulerNode;
use fleet_scheduler::seed::{PlannedStream, Seed};
use fleet_scheduler::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "fleet-scheduler")]
#[command(version)]
#[command(about = "Schedules lecture recording work onto a fleet of runners")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run the scheduler
    Server(ServerArgs),

    /// Validate a seed file and show what would be scheduled now
    CheckSeed {
        /// Path to the seed file (JSON)
        file: PathBuf,

        /// Output format
        #[arg(long, short = 'o', default_value = "table")]
        output: OutputFormat,
    },
}

// =============================================================================
// Server Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Port for the runner callback gRPC service
    #[arg(long, default_value = "50051")]
    port: u16,

    /// Port for the read-only status API (optional)
    #[arg(long)]
    dashboard_port: Option<u16>,

    /// Seed file with ingest endpoints, courses, lecture halls and streams
    #[arg(long)]
    seed: Option<PathBuf>,

    /// Snapshot file; state is restored from it at startup if it exists
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Seconds between stream discovery passes
    #[arg(long, default_value = "120")]
    discovery_interval: u64,

    /// Seconds between assignment passes
    #[arg(long, default_value = "15")]
    assignment_interval: u64,

    /// Seconds without heartbeat after which a runner counts as dead
    #[arg(long, default_value = "360")]
    liveness_window: u64,

    /// Timeout in seconds for calls to runners
    #[arg(long, default_value = "10")]
    rpc_timeout: u64,

    /// Give up on an action after this many runner assignments (default: never)
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Workload weight of a stream action
    #[arg(long, default_value = "2")]
    stream_weight: u32,

    /// Workload weight of a transcode action
    #[arg(long, default_value = "1")]
    transcode_weight: u32,

    /// Workload weight of an upload action
    #[arg(long, default_value = "1")]
    upload_weight: u32,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Serialize)]
struct SeedCheckOutput {
    endpoints: usize,
    slots: usize,
    courses: usize,
    lecture_halls: usize,
    streams: usize,
    due: Vec<PlannedStream>,
}

// =============================================================================
// Server Implementation
// =============================================================================

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let listen_addr: SocketAddr = format!("0.0.0.0:{}", args.port).parse()?;
    let mut config = SchedulerConfig::new(listen_addr).with_intervals(
        Duration::from_secs(args.discovery_interval),
        Duration::from_secs(args.assignment_interval),
    );
    if let Some(port) = args.dashboard_port {
        config = config.with_dashboard(format!("0.0.0.0:{}", port).parse()?);
    }
    if let Some(path) = args.seed {
        config = config.with_seed(path);
    }
    if let Some(path) = args.state_file {
        config = config.with_state_file(path);
    }
    if let Some(max) = args.max_attempts {
        if max == 0 {
            return Err("--max-attempts must be at least 1".into());
        }
        config = config.with_max_attempts(max);
    }
    config.liveness_window = Duration::from_secs(args.liveness_window);
    config.rpc_timeout = Duration::from_secs(args.rpc_timeout);
    config.weights = WorkloadWeights {
        stream: args.stream_weight,
        transcode: args.transcode_weight,
        upload: args.upload_weight,
    };

    tracing::info!(
        listen_addr = %config.listen_addr,
        dashboard_addr = ?config.dashboard_addr,
        seed = ?config.seed_path,
        state_file = ?config.state_path,
        max_attempts = ?config.retry.max_attempts,
        "Starting fleet scheduler"
    );

    let shutdown = install_shutdown_handler()?;
    let node = SchedulerNode::bootstrap(config).await?;
    node.run(shutdown).await?;

    Ok(())
}

// =============================================================================
// Seed Check
// =============================================================================

async fn handle_check_seed(
    file: PathBuf,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let seed = Seed::load(&file).await?;
    seed.validate()?;
    let due = seed.plan_at(chrono::Utc::now());

    match output_format {
        OutputFormat::Json => {
            let output = SeedCheckOutput {
                endpoints: seed.ingest_endpoints.len(),
                slots: seed.ingest_endpoints.iter().map(|e| e.slots.len()).sum(),
                courses: seed.courses.len(),
                lecture_halls: seed.lecture_halls.len(),
                streams: seed.streams.len(),
                due,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            println!("Seed {}", file.display());
            println!("{}", "=".repeat(40));
            println!("Endpoints:     {}", seed.ingest_endpoints.len());
            println!("Courses:       {}", seed.courses.len());
            println!("Lecture halls: {}", seed.lecture_halls.len());
            println!("Streams:       {}", seed.streams.len());
            println!();

            if due.is_empty() {
                println!("No streams due now.");
            } else {
                println!("{:<10} {:<20} {:<12} VERSIONS", "STREAM", "COURSE", "HALL");
                println!("{}", "-".repeat(60));
                for planned in &due {
                    let versions: Vec<String> =
                        planned.versions.iter().map(|v| v.to_string()).collect();
                    println!(
                        "{:<10} {:<20} {:<12} {}",
                        planned.stream_id,
                        planned.course,
                        planned.lecture_hall,
                        versions.join(",")
                    );
                }
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
        Commands::Server(server_args) => {
            run_server(server_args).await?;
        }
        Commands::CheckSeed { file, output } => {
            handle_check_seed(file, &output).await?;
        }
    }

    Ok(())
}
