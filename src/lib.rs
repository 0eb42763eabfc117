//! Historical market bar synchronization.
//!
//! Decides when stored bars are stale against a trading calendar, fetches the
//! missing range from a paginated provider, writes it without duplicates and
//! tracks long downloads as pollable, cancellable jobs.
//!
//! [`services::SyncEngine`] is the entry point.

pub mod cli;
pub mod commands;
pub mod constants;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;
pub mod worker;

pub use error::{AppError, Result};
pub use models::{Bar, JobHandle, JobId, JobProgress, JobStatus, Period, SyncJob, Timeframe};
pub use services::SyncEngine;
