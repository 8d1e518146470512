//! mssql-bulk-transfer CLI - paginated bulk table transfer between SQL Server databases.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use mssql_bulk_transfer::{
    Config, MssqlPool, TableDescriptor, TransferEngine, TransferError, TransferReport,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "mssql-bulk-transfer")]
#[command(about = "Paginated, type-coercing bulk table transfer between SQL Server databases")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    /// Seconds to wait for in-flight batches after a shutdown signal (default: 60)
    #[arg(long, default_value = "60")]
    shutdown_timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy every row of one table into another
    Transfer {
        /// Source table, as schema.table or table (schema defaults to dbo)
        #[arg(long)]
        source_table: String,

        /// Destination table, as schema.table or table [default: the source table name]
        #[arg(long)]
        destination_table: Option<String>,

        /// Override rows per fetched window
        #[arg(long)]
        window_size: Option<usize>,

        /// Override rows per insert batch
        #[arg(long)]
        batch_size: Option<usize>,

        /// Override rank ordering columns (comma-separated)
        #[arg(long, value_delimiter = ',')]
        order_by: Option<Vec<String>>,

        /// Override number of parallel writers
        #[arg(long)]
        writers: Option<usize>,
    },

    /// Test database connections
    HealthCheck,

    /// Print the effective configuration after auto-tuning
    ShowConfig,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), TransferError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let mut config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Transfer {
            source_table,
            destination_table,
            window_size,
            batch_size,
            order_by,
            writers,
        } => {
            if let Some(size) = window_size {
                config.transfer.window_size = size;
            }
            if let Some(size) = batch_size {
                config.transfer.batch_size = size;
            }
            if let Some(columns) = order_by {
                config.transfer.order_by = columns;
            }
            if let Some(w) = writers {
                config.transfer.parallel_writers = Some(w);
            }
            config.validate()?;
            let config = config.with_auto_tuning();

            let source_table = TableDescriptor::parse(&source_table)?;
            let destination_table = match destination_table {
                Some(name) => TableDescriptor::parse(&name)?,
                None => source_table.clone(),
            };

            let cancel_token = setup_signal_handler();
            let report = transfer(
                &config,
                &source_table,
                &destination_table,
                cancel_token,
                Duration::from_secs(cli.shutdown_timeout),
            )
            .await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
        }

        Commands::HealthCheck => {
            let healthy = health_check(&config, cli.output_json).await?;
            if !healthy {
                return Err(TransferError::connection(
                    "health check",
                    "one or more databases are unreachable",
                ));
            }
        }

        Commands::ShowConfig => {
            let config = config.with_auto_tuning();
            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                print!("{}", serde_yaml::to_string(&config)?);
            }
        }
    }

    Ok(())
}

async fn transfer(
    config: &Config,
    source_table: &TableDescriptor,
    destination_table: &TableDescriptor,
    cancel_token: CancellationToken,
    shutdown_timeout: Duration,
) -> Result<TransferReport, TransferError> {
    let settings = &config.transfer;
    let source = MssqlPool::connect(&config.source, "source", settings.source_pool_size()).await?;
    let destination = MssqlPool::connect(
        &config.destination,
        "destination",
        settings.destination_pool_size(),
    )
    .await?;

    let engine = TransferEngine::new(Arc::new(source), Arc::new(destination), settings.to_options())
        .with_type_mapper(settings.type_mapper())
        .with_cancellation(cancel_token.clone());

    let run = engine.run(source_table, destination_table);
    tokio::pin!(run);

    tokio::select! {
        result = &mut run => result,
        _ = cancel_token.cancelled() => {
            // Give in-flight batches a chance to finish or roll back.
            match tokio::time::timeout(shutdown_timeout, &mut run).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        "Transfer did not stop within {}s of the shutdown signal",
                        shutdown_timeout.as_secs()
                    );
                    Err(TransferError::Cancelled)
                }
            }
        }
    }
}

fn print_report(report: &TransferReport) {
    println!("\nTransfer completed!");
    println!("  Source: {}", report.source_table);
    println!("  Destination: {}", report.destination_table);
    println!("  Duration: {:.2}s", report.stats.elapsed.as_secs_f64());
    println!("  Rows: {}", report.result.rows_transferred);
    println!("  Windows: {}", report.stats.windows);
    println!("  Batches: {}", report.stats.batches);
    println!("  Throughput: {} rows/sec", report.rows_per_second());
    if !report.stats.coercion_failures.is_empty() {
        println!("  Columns kept as raw text:");
        for failure in &report.stats.coercion_failures {
            println!(
                "    {} in window {} (declared {}, {} values, e.g. {:?})",
                failure.column,
                failure.window,
                failure.declared,
                failure.failed_values,
                failure.sample
            );
        }
    }
}

/// Connect to both databases and report per side. Returns overall health.
async fn health_check(config: &Config, output_json: bool) -> Result<bool, TransferError> {
    let source = check_side(&config.source, "source").await;
    let destination = check_side(&config.destination, "destination").await;
    let healthy = source.0.is_none() && destination.0.is_none();

    if output_json {
        let side = |(error, latency): &(Option<String>, u128)| {
            serde_json::json!({
                "connected": error.is_none(),
                "latency_ms": latency,
                "error": error,
            })
        };
        let result = serde_json::json!({
            "source": side(&source),
            "destination": side(&destination),
            "healthy": healthy,
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("Health Check Results:");
        for (label, (error, latency)) in [("Source", &source), ("Destination", &destination)] {
            println!(
                "  {}: {} ({}ms)",
                label,
                if error.is_none() { "OK" } else { "FAILED" },
                latency
            );
            if let Some(err) = error {
                println!("    Error: {}", err);
            }
        }
        println!(
            "\n  Overall: {}",
            if healthy { "HEALTHY" } else { "UNHEALTHY" }
        );
    }

    Ok(healthy)
}

async fn check_side(
    conn: &mssql_bulk_transfer::ConnectionConfig,
    role: &'static str,
) -> (Option<String>, u128) {
    let started = Instant::now();
    let outcome = match MssqlPool::connect(conn, role, 1).await {
        Ok(pool) => pool.health_check().await,
        Err(e) => Err(e),
    };
    (outcome.err().map(|e| e.to_string()), started.elapsed().as_millis())
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(std::io::stderr)
        .with_target(false);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Setup signal handlers for graceful shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM.
/// Returns a CancellationToken that will be cancelled when a signal is received.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();

    for (kind, name) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        let token = cancel_token.clone();
        tokio::spawn(async move {
            let mut stream = match signal(kind) {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Failed to set up {} handler: {}", name, e);
                    return;
                }
            };
            stream.recv().await;
            eprintln!("\nReceived {}. Shutting down gracefully...", name);
            token.cancel();
        });
    }

    cancel_token
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to set up Ctrl-C handler: {}", e);
            return;
        }
        eprintln!("\nReceived Ctrl-C. Shutting down gracefully...");
        token.cancel();
    });

    cancel_token
}
