use crate::accumulator::CatalogAccumulator;
use crate::ingest::{HttpPageFetcher, PageFetcher};
use crate::model::RunReport;
use crate::pipeline::IngestionJob;
use crate::scheduler::Scheduler;
use crate::sink::warehouse::WarehouseTarget;
use crate::sink::{SinkWriter, SnapshotFileSink, WarehouseSink};
use crate::store::PgConnector;
use std::sync::Arc;
use ticker_core::config::SinkKind;
use ticker_core::{Config, Result};
use tracing::{error, info, instrument};

pub struct App {
    config: Config,
    job: IngestionJob,
}

impl App {
    #[instrument(skip(config))]
    pub fn new(config: Config) -> Result<Self> {
        info!("Initializing application");

        let fetcher = Arc::new(HttpPageFetcher::new(&config.source)?);
        info!(source = fetcher.source_id(), "Catalog source configured");

        let accumulator = CatalogAccumulator::new(fetcher, config.source.page_delay());

        let sink: Arc<dyn SinkWriter> = match config.sink.kind {
            SinkKind::Snapshot => Arc::new(SnapshotFileSink::new(&config.sink.snapshot)),
            SinkKind::Warehouse => Arc::new(WarehouseSink::new(
                Arc::new(PgConnector::new(&config.sink.warehouse)),
                config.sink.warehouse.clone(),
            )),
        };
        info!(sink = %sink.identity(), "Sink configured");

        let job = IngestionJob::new(accumulator, sink, config.sink.flush_partial);

        Ok(Self { config, job })
    }

    pub async fn run_once(&self) -> RunReport {
        self.job.run_once().await
    }

    /// Run on the configured cadence until Ctrl-C.
    pub async fn run_scheduled(&self, run_immediately: bool) -> Result<()> {
        let scheduler = Scheduler::from_config(&self.config.schedule)?;

        if run_immediately {
            self.job.run_once().await;
        }

        let shutdown = async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Shutdown signal received, finishing"),
                Err(e) => {
                    error!(error = %e, "Failed to listen for shutdown signal");
                    std::future::pending::<()>().await
                }
            }
        };

        let runs = scheduler
            .run(
                move |_trigger| async move {
                    self.job.run_once().await;
                },
                shutdown,
            )
            .await;

        info!(runs, "Scheduler stopped");
        Ok(())
    }

    /// Create the warehouse schema and table for the configured coordinates.
    ///
    /// Needs only the warehouse settings, so no source credentials.
    pub async fn migrate(config: &Config) -> Result<()> {
        let target = WarehouseTarget::resolve(&config.sink.warehouse)?;
        PgConnector::new(&config.sink.warehouse)
            .ensure_table(&target)
            .await
    }
}
