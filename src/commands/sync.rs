use crate::commands::{normalize_symbols, open_engine, parse_timeframes};
use crate::error::AppError;
use std::path::PathBuf;

pub async fn run(database: Option<PathBuf>, symbols: Vec<String>, timeframes: String) {
    let timeframes = parse_timeframes(&timeframes);
    let symbols = normalize_symbols(symbols);

    let (engine, store) = match open_engine(database).await {
        Ok(opened) => opened,
        Err(e) => {
            eprintln!("❌ Error: {}", e);
            std::process::exit(1);
        }
    };

    let mut failures = 0;
    for symbol in &symbols {
        for &timeframe in &timeframes {
            match engine.sync_if_stale(symbol, timeframe).await {
                Ok(report) => match report.range {
                    Some(range) => println!(
                        "✅ {} {}: wrote {} of {} fetched bars ({})",
                        symbol, timeframe, report.written, report.fetched, range
                    ),
                    None => println!("✓  {} {}: up to date", symbol, timeframe),
                },
                Err(AppError::NotOnboarded(_)) => {
                    println!("⚠️  {} {}: no stored bars, run 'download' first", symbol, timeframe);
                }
                Err(e) => {
                    failures += 1;
                    eprintln!("❌ {} {}: {}", symbol, timeframe, e);
                }
            }
        }
    }

    store.close().await;
    if failures > 0 {
        std::process::exit(1);
    }
}
