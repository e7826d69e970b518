use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use apply_pilot::config::{DriverConfig, PilotConfig, DEFAULT_APP_NAME};
use apply_pilot::driver;
use apply_pilot::node::Node;
use apply_pilot::shutdown::install_shutdown_handler;
use apply_pilot::state::{FileStore, PilotState};

#[derive(Parser, Debug)]
#[command(name = "apply-pilot")]
#[command(version)]
#[command(about = "Sequential job-application scheduler")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run the schedulers and the HTTP command surface
    Serve(ServeArgs),

    /// Print the stored state document
    State {
        #[command(flatten)]
        store: StoreArgs,

        /// Output format
        #[arg(long, short = 'o', default_value = "table")]
        output: OutputFormat,
    },
}

// =============================================================================
// Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct StoreArgs {
    /// Application name (selects the platform data directory)
    #[arg(long, default_value = DEFAULT_APP_NAME)]
    app_name: String,

    /// Use this directory for state.json instead of the platform location
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct ServeArgs {
    #[command(flatten)]
    store: StoreArgs,

    /// Port for the HTTP command surface (disabled when omitted)
    #[arg(long)]
    port: Option<u16>,

    /// Pause after each driven job, in milliseconds
    #[arg(long, default_value = "1000")]
    settle_ms: u64,

    /// Upper bound for one page-driver call, in milliseconds
    #[arg(long, default_value = "120000")]
    driver_timeout_ms: u64,

    /// External program that performs page automation.
    /// Without it navigations are only logged.
    #[arg(long)]
    driver_program: Option<PathBuf>,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

struct StateSummary<'a> {
    path: String,
    queued: usize,
    applied: usize,
    skipped: usize,
    completed: usize,
    active_job: Option<&'a str>,
    is_app_running: bool,
    is_list_running: bool,
}

fn base_config(args: &StoreArgs) -> PilotConfig {
    let mut config = PilotConfig::new(args.app_name.clone());
    config.data_dir = args.data_dir.clone();
    config
}

// =============================================================================
// Handlers
// =============================================================================

async fn run_serve(args: ServeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let listen_addr: Option<SocketAddr> = match args.port {
        Some(p) => Some(format!("127.0.0.1:{}", p).parse()?),
        None => None,
    };

    let mut config = base_config(&args.store)
        .with_settle_delay_ms(args.settle_ms)
        .with_driver_timeout_ms(args.driver_timeout_ms);
    config.listen_addr = listen_addr;
    config.driver = match args.driver_program {
        Some(program) => DriverConfig::Command { program },
        None => DriverConfig::Log,
    };

    tracing::info!(
        app_name = %config.app_name,
        data_dir = %config.resolve_data_dir()?.display(),
        listen_addr = ?config.listen_addr,
        driver = ?config.driver,
        "Starting apply-pilot"
    );

    let shutdown = install_shutdown_handler();
    let page_driver = driver::from_config(&config.driver);
    let node = Node::start(config, page_driver, shutdown).await?;
    node.run().await;

    Ok(())
}

async fn handle_state(
    args: StoreArgs,
    output: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = FileStore::new(base_config(&args).resolve_data_dir()?);
    let state: PilotState = store.load().await;

    match output {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&state)?);
        }
        OutputFormat::Table => {
            let summary = StateSummary {
                path: store.path().display().to_string(),
                queued: state.jobs.len(),
                applied: state.applied.len(),
                skipped: state.skipped_apps.len(),
                completed: state.completed_apps.len(),
                active_job: state.active_job.as_ref().map(|j| j.id.as_str()),
                is_app_running: state.is_app_running,
                is_list_running: state.is_list_running,
            };
            println!("State file:   {}", summary.path);
            println!("Queued:       {}", summary.queued);
            println!("Applied:      {}", summary.applied);
            println!("Skipped:      {}", summary.skipped);
            println!("Completed:    {}", summary.completed);
            println!("Active job:   {}", summary.active_job.unwrap_or("-"));
            println!("App running:  {}", summary.is_app_running);
            println!("List running: {}", summary.is_list_running);

            if !state.jobs.is_empty() {
                println!();
                println!("{:<16} {:<24} {:<6} TITLE", "JOB ID", "COMPANY", "EASY");
                println!("{}", "-".repeat(70));
                for job in &state.jobs {
                    let company = if job.company.chars().count() > 22 {
                        format!("{}...", job.company.chars().take(19).collect::<String>())
                    } else {
                        job.company.clone()
                    };
                    println!(
                        "{:<16} {:<24} {:<6} {}",
                        job.id,
                        company,
                        if job.easy_apply { "yes" } else { "no" },
                        job.title
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
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Serve(serve_args) => {
            run_serve(serve_args).await?;
        }
        Commands::State { store, output } => {
            handle_state(store, output).await?;
        }
    }

    Ok(())
}
