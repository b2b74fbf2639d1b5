//! OBD-II Scanner - Main Entry Point

use clap::Parser;
use obd_scan::{init_logging, run, Options};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging()?;

    info!("=== OBD-II Scanner v{} ===", env!("CARGO_PKG_VERSION"));

    let options = Options::parse();
    run(options).await?;

    Ok(())
}
