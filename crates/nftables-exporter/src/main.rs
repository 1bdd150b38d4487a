//! nftables-exporter daemon entry point.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};

use nftables_exporter::error::{ExporterError, Result};
use nftables_exporter::geoip::{self, GeoIpDatabase};
use nftables_exporter::logging::init_logging;
use nftables_exporter::metrics_server::{bind_metrics_listener, serve};
use nftables_exporter::{Args, Collector, CountryLookup, ExporterMetrics, NftCommand, RetryPolicy};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_logging(&args.loglevel) {
        eprintln!("nftables-exporter: {e}");
        return ExitCode::FAILURE;
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?args,
        "nftables-exporter starting"
    );

    match run(args).await {
        Ok(()) => {
            info!("nftables-exporter: exiting normally");
            ExitCode::SUCCESS
        }
        Err(e) => {
            report(&e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let metrics = Arc::new(ExporterMetrics::new(&args.namespace)?);
    let listener = bind_metrics_listener(&args.metrics_server_config()).await?;
    let mut server = tokio::spawn(serve(listener, Arc::clone(&metrics)));

    let lookup: Option<Arc<dyn CountryLookup>> = match args.geoip_config() {
        Some(config) => {
            info!(edition = %config.edition, "Preparing maxmind geoip database");
            let path = tokio::select! {
                result = geoip::prepare_database(&config, RetryPolicy::default()) => result?,
                _ = &mut shutdown => return Ok(()),
            };
            let database: Arc<dyn CountryLookup> = Arc::new(GeoIpDatabase::open(&path)?);
            Some(database)
        }
        None => {
            info!("Country enrichment disabled");
            None
        }
    };

    let collector = Collector::new(
        NftCommand::new(args.nft.clone()),
        metrics,
        lookup,
        args.collector_config(),
    );

    tokio::select! {
        result = collector.run(&mut shutdown) => {
            server.abort();
            result
        }
        joined = &mut server => match joined {
            Ok(result) => {
                result?;
                Err(ExporterError::Config("metrics server stopped".to_string()))
            }
            Err(e) => Err(ExporterError::Config(format!("metrics server task failed: {e}"))),
        },
    }
}

/// Resolves on the first interrupt.
async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received interrupt, shutting down"),
        Err(e) => {
            warn!(error = %e, "Failed to listen for interrupt");
            std::future::pending::<()>().await;
        }
    }
}

fn report(e: &ExporterError) {
    match e {
        ExporterError::CommandFailed {
            command,
            exit_code,
            output,
        } => error!(command = %command, exit_code, output = %output, "Command execution failed"),
        _ => match e.command() {
            Some(command) => error!(command = %command, error = %e, "Command execution failed"),
            None => error!(error = %e, "nftables-exporter failed"),
        },
    }
}
