use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{filter::filter_fn, fmt, prelude::*, EnvFilter};

use casechain_node::{
    api::{serve, ApiState},
    cli::Args,
    Config, LedgerService,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let mut config = Config::load_from_file(&args.config)?;
    args.apply(&mut config);

    // 1. Logging: protocol events to the audit file, everything else to stdout.
    std::fs::create_dir_all("logs")?;
    let file_appender = tracing_appender::rolling::never(".", format!("logs/audit-{}.log", config.node_name));
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let consensus_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_filter(filter_fn(|metadata| metadata.target() == "consensus"));

    let stdout_layer = fmt::layer()
        .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,casechain_node=debug".into()))
        .with_filter(filter_fn(|metadata| metadata.target() != "consensus"));

    tracing_subscriber::registry()
        .with(consensus_layer)
        .with(stdout_layer)
        .init();

    info!("starting {} ({:?}) with {} peers", config.node_name, config.mode, config.peers.len());

    // 2. Service and sweeps
    let service = match LedgerService::from_config(&config).await {
        Ok(service) => service,
        Err(e) => {
            error!("could not build node: {}", e);
            return Err(e.into());
        }
    };
    service.start().await;

    // 3. API until Ctrl+C
    let listener = TcpListener::bind(&config.listen_address).await?;
    let state = ApiState::new(service.clone(), config.tokens.clone());
    serve(listener, state, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("ctrl-c handler failed: {}", e);
        }
        info!("shutdown requested");
    })
    .await?;

    service.stop().await?;
    info!("node {} stopped", config.node_name);
    Ok(())
}
