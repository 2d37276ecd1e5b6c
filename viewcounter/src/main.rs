mod config;

use clap::{Args, Parser};
use config::{Config, LoggingConfig, MetricsConfig};
use metrics_exporter_statsd::StatsdBuilder;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "viewcounter")]
enum CliCommand {
    /// Serve the sync webhook and the count endpoints
    Serve(CliArgs),
    /// Run one sync and print the outcome as JSON
    Sync(CliArgs),
}

#[derive(Args)]
struct CliArgs {
    #[arg(long)]
    config_file_path: PathBuf,
}

fn init_logging(config: &LoggingConfig) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level)))
        .with(tracing_subscriber::fmt::layer())
        .with(sentry::integrations::tracing::layer())
        .init();
}

fn init_metrics(config: &MetricsConfig) -> Result<(), String> {
    let recorder = StatsdBuilder::from(config.statsd_host.as_str(), config.statsd_port)
        .build(Some("viewcounter"))
        .map_err(|e| e.to_string())?;
    metrics::set_global_recorder(recorder).map_err(|e| e.to_string())?;
    shared::metrics_defs::describe_metrics(cms_sync::ALL_METRICS);
    Ok(())
}

fn main() -> ExitCode {
    let cli = CliCommand::parse();
    let args = match &cli {
        CliCommand::Serve(args) | CliCommand::Sync(args) => args,
    };

    let config = match Config::from_file(&args.config_file_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    // Sentry has to be up before the runtime starts its threads
    let _sentry = config.logging.sentry_dsn.as_deref().map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });
    init_logging(&config.logging);

    if let Some(metrics_config) = &config.metrics
        && let Err(e) = init_metrics(metrics_config)
    {
        tracing::error!(error = %e, "Failed to set up metrics");
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "Failed to start runtime");
            return ExitCode::FAILURE;
        }
    };

    match cli {
        CliCommand::Serve(_) => {
            tracing::info!("Starting viewcounter");
            match runtime.block_on(cms_sync::run(config.viewcounter)) {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    tracing::error!(error = %e, "Server stopped");
                    ExitCode::FAILURE
                }
            }
        }
        CliCommand::Sync(_) => match runtime.block_on(cms_sync::sync_once(config.viewcounter)) {
            Ok(Ok(report)) => match serde_json::to_string_pretty(&report) {
                Ok(json) => {
                    println!("{json}");
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize report");
                    ExitCode::FAILURE
                }
            },
            Ok(Err(e)) => {
                let outcome = serde_json::json!({
                    "success": false,
                    "error": "Sync failed",
                    "details": e.to_string(),
                });
                println!("{outcome}");
                ExitCode::FAILURE
            }
            Err(e) => {
                tracing::error!(error = %e, "Sync could not start");
                ExitCode::FAILURE
            }
        },
    }
}
