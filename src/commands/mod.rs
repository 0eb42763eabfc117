pub mod download;
pub mod status;
pub mod sync;
pub mod worker;

use crate::error::Result;
use crate::models::{ProviderConfig, SyncConfig, Timeframe};
use crate::services::{PolygonClient, SqliteStore, SyncEngine};
use std::path::PathBuf;
use std::sync::Arc;

/// Config from the environment with an optional database override
pub(crate) fn load_config(database: Option<PathBuf>) -> Result<SyncConfig> {
    let mut config = SyncConfig::from_env()?;
    if let Some(path) = database {
        config.database_path = path;
    }
    Ok(config)
}

/// SQLite store plus provider client wired into an engine
pub(crate) async fn open_engine(database: Option<PathBuf>) -> Result<(SyncEngine, SqliteStore)> {
    let config = load_config(database)?;
    let provider = PolygonClient::new(ProviderConfig::from_env()?)?;
    let store = SqliteStore::new(&config.database_path).await?;

    let engine = SyncEngine::new(Arc::new(store.clone()), Arc::new(provider), config)?;
    Ok((engine, store))
}

pub(crate) fn parse_timeframes(arg: &str) -> Vec<Timeframe> {
    match Timeframe::parse_list(arg) {
        Ok(timeframes) => timeframes,
        Err(e) => {
            eprintln!("❌ Error parsing timeframes: {}", e);
            eprintln!("   Valid options: all, 1m, 5m, 15m, 30m, 1h, 1d or comma-separated (e.g., 1d,1h)");
            std::process::exit(1);
        }
    }
}

pub(crate) fn normalize_symbols(symbols: Vec<String>) -> Vec<String> {
    symbols
        .into_iter()
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}
