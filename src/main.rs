use std::io::{self, Write};

use tracing::info;
use tracing_subscriber::EnvFilter;

use matchstore::{MatchDao, Result, Settings};

/// Opens the configured match database and prints the collection listing.
fn main() -> Result<()> {
    let config_path = std::env::args().nth(1);
    let settings = Settings::load(config_path.as_deref())?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    info!(database = %settings.database_path, "opening match database");
    let dao = MatchDao::open(&settings)?;
    let metadata = dao.collection_metadata()?;
    info!(collections = metadata.len(), "listing match collections");

    let stdout = io::stdout();
    let mut out = stdout.lock();
    serde_json::to_writer_pretty(&mut out, &metadata)?;
    writeln!(out)?;
    Ok(())
}
