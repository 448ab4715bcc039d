use std::error::Error;
use std::path::Path;
use std::sync::Arc;

use clap::ArgMatches;
use conveyor_core::config::Config;
use conveyor_core::config::components::consumer::ConsumerSettings;
use conveyor_core::consumer::Consumer;
use conveyor_core::forwarder::ForwardCallback;
use conveyor_core::producer::Producer;
use conveyor_core::sink::SinkContext;
use conveyor_core::source::build_source;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

mod cmdline;
mod setup_tracing;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    setup_tracing::register();

    let matches = cmdline::root_cli().get_matches();
    let result = match matches.subcommand() {
        Some(("run", args)) => run(args).await,
        _ => Err("unknown subcommand".into()),
    };

    if let Err(e) = result {
        error!("{e}");
        return Err(e);
    }
    info!("Exiting...");

    Ok(())
}

async fn run(args: &ArgMatches) -> Result<(), Box<dyn Error>> {
    let consumer_name = required(args, cmdline::ARG_CONSUMER)?;
    let producer_name = required(args, cmdline::ARG_PRODUCER)?;

    let config = match args.get_one::<String>(cmdline::ARG_CONFIG) {
        Some(path) => Config::from_file(Path::new(path))?,
        None => Config::from_env()?,
    };

    let settings = ConsumerSettings::from_config(&config, consumer_name)?;
    let source = build_source(&config, &settings.input)?;
    let producer = Producer::from_config(&SinkContext::default(), &config, producer_name)?;
    let consumer = Consumer::new(
        consumer_name,
        settings,
        Arc::clone(&source),
        ForwardCallback::new(producer),
    )?;

    let cln_token = CancellationToken::new();
    let shutdown_token = cln_token.clone();
    let shutdown_handle = tokio::spawn(async move {
        shutdown_signal().await;
        shutdown_token.cancel();
    });

    info!(consumer = consumer_name, producer = producer_name, "starting");
    let result = consumer.run(cln_token).await;

    if !shutdown_handle.is_finished() {
        shutdown_handle.abort();
    }
    result?;

    info!("Gracefully Exiting...");
    Ok(())
}

fn required<'a>(args: &'a ArgMatches, name: &str) -> Result<&'a str, Box<dyn Error>> {
    args.get_one::<String>(name)
        .map(String::as_str)
        .ok_or_else(|| format!("--{name} is required").into())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C signal"),
            Err(e) => {
                error!(?e, "failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
                info!("Received terminate signal");
            }
            Err(e) => {
                error!(?e, "failed to install terminate signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
