//! # File Server - Main Entry Point
//!
//! Serves `LIST`, `UPLOAD` and `GET` over sentinel-framed TCP from a bounded
//! pool of connection slots. Stops on Ctrl-C after letting in-flight sessions
//! finish.

use anyhow::{Context, Result};
use clap::Parser;
use file_stress::{
    cli::ServerArgs,
    logging::init_server_logging,
    server::{FileProtocol, FileServer, ServerConfig},
};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let args = ServerArgs::parse();
    init_server_logging(args.debug)?;

    let config = ServerConfig::from_args(&args)?;
    let processor = FileProtocol::new(&args.storage_dir)
        .with_context(|| format!("Failed to create storage directory {:?}", args.storage_dir))?;
    info!("Storing files in {:?}", processor.storage_dir());

    let server = FileServer::bind(config, Arc::new(processor)).await?;
    server.run().await?;

    info!("Server stopped");
    Ok(())
}
