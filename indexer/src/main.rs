use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process;
use ticker_core::config::SinkKind;
use ticker_core::{telemetry, Config};
use ticker_indexer::app::App;
use tracing::{error, info};

#[derive(Parser)]
#[clap(name = "ticker-indexer")]
#[clap(about = "Reference ticker catalog ingestion", version)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the full catalog once and load it
    Once {
        /// Override the configured sink
        #[clap(long, value_enum, env = "TICKERS_SINK")]
        sink: Option<SinkArg>,

        /// Override the snapshot file path
        #[clap(long)]
        output: Option<PathBuf>,
    },

    /// Run on the configured schedule until interrupted
    Run {
        /// Trigger one run before waiting for the first scheduled slot
        #[clap(long)]
        now: bool,
    },

    /// Create the warehouse schema and table
    Migrate,
}

#[derive(Clone, Copy, ValueEnum)]
enum SinkArg {
    Snapshot,
    Warehouse,
}

impl From<SinkArg> for SinkKind {
    fn from(arg: SinkArg) -> Self {
        match arg {
            SinkArg::Snapshot => SinkKind::Snapshot,
            SinkArg::Warehouse => SinkKind::Warehouse,
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!(error = %e, "Fatal error");
        eprintln!("ticker-indexer: {:#}", e);
        process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = Config::load()
        .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;

    // Initialize telemetry
    telemetry::init(&config.telemetry)?;

    match cli.command {
        Commands::Once { sink, output } => {
            // Override config with CLI args
            if let Some(sink) = sink {
                config.sink.kind = sink.into();
            }
            if let Some(output) = output {
                config.sink.snapshot.path = output;
            }

            let app = App::new(config)?;
            let report = app.run_once().await;

            if let Some(failure) = &report.failure {
                anyhow::bail!(
                    "run {} failed during {} ({}): {}",
                    report.run_id,
                    failure.stage,
                    failure.kind,
                    failure.reason
                );
            }

            info!(
                run_id = %report.run_id,
                records = report.records_fetched,
                rows_written = report.rows_written(),
                "Run succeeded"
            );
        }

        Commands::Run { now } => {
            let app = App::new(config)?;
            app.run_scheduled(now).await?;
        }

        Commands::Migrate => {
            info!("Creating warehouse table");
            App::migrate(&config).await?;
            info!("Warehouse table ready");
        }
    }

    telemetry::shutdown();
    Ok(())
}
