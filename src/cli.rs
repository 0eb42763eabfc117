use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::commands;

#[derive(Parser)]
#[command(name = "barsync")]
#[command(about = "Historical market bar synchronization", long_about = None)]
pub struct Cli {
    /// SQLite database file (overrides BARSYNC_DATABASE_PATH)
    #[arg(short, long, global = true)]
    pub database: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Keep symbols fresh in the background until Ctrl-C
    Worker {
        /// Comma-separated symbols, e.g. AAPL,MSFT
        #[arg(short, long, value_delimiter = ',', required = true)]
        symbols: Vec<String>,
        /// Comma-separated timeframes (1m,5m,15m,30m,1h,1d) or "all"
        #[arg(short, long, default_value = "1d")]
        timeframes: String,
        /// Bulk-download this period for symbols with no stored bars
        #[arg(long)]
        onboard: Option<String>,
    },
    /// Fetch whatever is missing since the newest stored bar
    Sync {
        #[arg(short, long, value_delimiter = ',', required = true)]
        symbols: Vec<String>,
        #[arg(short, long, default_value = "1d")]
        timeframes: String,
    },
    /// Download a full period and follow its progress
    Download {
        symbol: String,
        #[arg(short, long, default_value = "1d")]
        timeframe: String,
        /// 1M, 3M, 6M, 1Y, 2Y, 5Y, 10Y or max
        #[arg(short, long, default_value = "1Y")]
        period: String,
    },
    /// Show stored bar counts and freshness
    Status {
        #[arg(short, long, value_delimiter = ',', required = true)]
        symbols: Vec<String>,
        #[arg(short, long, default_value = "all")]
        timeframes: String,
    },
}

pub async fn run() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Worker { symbols, timeframes, onboard } => {
            commands::worker::run(cli.database, symbols, timeframes, onboard).await;
        }
        Commands::Sync { symbols, timeframes } => {
            commands::sync::run(cli.database, symbols, timeframes).await;
        }
        Commands::Download { symbol, timeframe, period } => {
            commands::download::run(cli.database, symbol, timeframe, period).await;
        }
        Commands::Status { symbols, timeframes } => {
            commands::status::run(cli.database, symbols, timeframes).await;
        }
    }
}
