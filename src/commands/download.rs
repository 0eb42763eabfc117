use crate::commands::open_engine;
use crate::models::{JobStatus, Period, Timeframe};
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::sleep;

const POLL_INTERVAL: Duration = Duration::from_secs(1);

pub async fn run(database: Option<PathBuf>, symbol: String, timeframe: String, period: String) {
    let timeframe: Timeframe = match timeframe.parse() {
        Ok(tf) => tf,
        Err(e) => {
            eprintln!("❌ {}", e);
            std::process::exit(1);
        }
    };
    let period: Period = match period.parse() {
        Ok(p) => p,
        Err(e) => {
            eprintln!("❌ {}", e);
            std::process::exit(1);
        }
    };

    let (engine, store) = match open_engine(database).await {
        Ok(opened) => opened,
        Err(e) => {
            eprintln!("❌ Error: {}", e);
            std::process::exit(1);
        }
    };

    let handle = match engine
        .start_bulk_download_with_progress(&symbol, timeframe, period, chrono::Utc::now(), |percent, label| {
            println!("   - {} done ({:.0}% of chunks)", label, percent);
        })
        .await
    {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("❌ Could not start download: {}", e);
            std::process::exit(1);
        }
    };

    if handle.attached {
        println!("🔗 Attached to running job {}", handle.job_id);
    } else {
        println!("🚀 Started job {} ({} {} {})", handle.job_id, symbol, timeframe, period);
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                match engine.cancel_job(handle.job_id).await {
                    Ok(progress) => println!("🛑 Cancelled with {} bars stored", progress.current_records),
                    Err(e) => eprintln!("❌ Cancel failed: {}", e),
                }
                break;
            }
            _ = sleep(POLL_INTERVAL) => {}
        }

        let progress = match engine.get_job_progress(handle.job_id).await {
            Ok(progress) => progress,
            Err(e) => {
                eprintln!("❌ {}", e);
                break;
            }
        };

        match progress.status {
            JobStatus::InProgress => {}
            JobStatus::Completed if progress.current_records < progress.expected_records => {
                println!(
                    "⚠️  Completed with partial data: {} of ~{} expected bars",
                    progress.current_records, progress.expected_records
                );
                break;
            }
            JobStatus::Completed => {
                println!("✅ Completed: {} bars", progress.current_records);
                break;
            }
            JobStatus::Failed => {
                eprintln!(
                    "❌ Failed: {}",
                    progress.error_message.unwrap_or_else(|| "unknown error".to_string())
                );
                break;
            }
        }
    }

    // Let the background task observe cancellation and record its final state
    while !engine.running_jobs().await.is_empty() {
        sleep(Duration::from_millis(100)).await;
    }
    store.close().await;
}
