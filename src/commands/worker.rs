use crate::commands::{normalize_symbols, open_engine, parse_timeframes};
use crate::models::Period;
use crate::worker::{run_stale_sync_worker, WorkerSettings};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub async fn run(database: Option<PathBuf>, symbols: Vec<String>, timeframes: String, onboard: Option<String>) {
    let mut settings = WorkerSettings::new(normalize_symbols(symbols), parse_timeframes(&timeframes));

    if let Some(raw) = onboard {
        match raw.parse::<Period>() {
            Ok(period) => settings.onboard_period = Some(period),
            Err(e) => {
                eprintln!("❌ {}", e);
                std::process::exit(1);
            }
        }
    }

    let (engine, store) = match open_engine(database).await {
        Ok(opened) => opened,
        Err(e) => {
            eprintln!("❌ Error: {}", e);
            std::process::exit(1);
        }
    };

    println!(
        "🚀 Keeping {} symbols x {} timeframes fresh (Ctrl-C to stop)",
        settings.symbols.len(),
        settings.timeframes.len()
    );

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, stopping worker");
            signal.cancel();
        }
    });

    run_stale_sync_worker(engine.clone(), settings, shutdown).await;

    for job_id in engine.running_jobs().await {
        if let Err(e) = engine.cancel_job(job_id).await {
            eprintln!("⚠️  Could not cancel job {}: {}", job_id, e);
        }
    }
    store.close().await;
}
