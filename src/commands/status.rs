use crate::commands::{load_config, normalize_symbols, parse_timeframes};
use crate::services::{BarStore, Calendar, SqliteStore, StalenessDetector};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;

pub async fn run(database: Option<PathBuf>, symbols: Vec<String>, timeframes: String) {
    println!("📊 Market Data Status\n");

    if let Err(e) = show_status(database, normalize_symbols(symbols), &timeframes).await {
        eprintln!("❌ Error: {}", e);
        std::process::exit(1);
    }
}

async fn show_status(
    database: Option<PathBuf>,
    symbols: Vec<String>,
    timeframes: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let timeframes = parse_timeframes(timeframes);
    let config = load_config(database)?;
    let calendar = Calendar::new(&config.exchange_timezone)?;
    let store = SqliteStore::new(&config.database_path).await?;
    let detector = StalenessDetector::new(Arc::new(store.clone()), calendar);

    let now = Utc::now();
    println!(
        "🕒 Session open: {}, last close: {}\n",
        calendar.is_session_open(now),
        calendar.most_recent_session_close(now)
    );

    for symbol in &symbols {
        println!("{}", symbol);
        for &timeframe in &timeframes {
            let count = store.count(symbol, timeframe).await?;
            let latest = store.latest_timestamp(symbol, timeframe).await?;
            let stale = detector.needs_sync(symbol, timeframe, now).await?;

            match latest {
                Some(ts) => println!(
                    "   {:>3}: {:>8} bars, latest {} {}",
                    timeframe.as_str(),
                    count,
                    ts,
                    if stale { "(stale)" } else { "(fresh)" }
                ),
                None => println!("   {:>3}: not onboarded", timeframe.as_str()),
            }
        }
    }

    store.close().await;
    Ok(())
}
