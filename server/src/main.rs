use anyhow::Result;
use clap::Parser;
use gls_server::{fs, Config, MutualTlsListener, Registry, Server};
use tracing::info;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let config = Config::parse();

    tracing_subscriber::fmt()
        .with_max_level(if config.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .init();

    info!("Starting glsd..");

    let mut registry = Registry::new();
    fs::register(&mut registry);
    info!(procedures = ?registry.names(), "procedures registered");

    let listener = MutualTlsListener::bind(&config).await?;
    Server::new(listener, registry, config.policy()).run().await;
    Ok(())
}
