//! Cron scheduler for periodic refresh tasks.
//!
//! Runs jobs like:
//! - Refreshing the latest bucket of every loaded pool series
//! - Re-selecting the best stable reference pool for fiat pricing

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use log::{error, info};
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;

use crate::{config::RefreshSettings, history::HistoryEngine};

/// Cron scheduler that manages periodic background jobs.
pub struct CronScheduler {
    engine: Arc<HistoryEngine>,
    settings: RefreshSettings,
}

impl CronScheduler {
    pub fn new(engine: Arc<HistoryEngine>, settings: RefreshSettings) -> Self {
        Self { engine, settings }
    }

    /// Starts the cron scheduler and runs until cancellation.
    pub async fn run(&self, cancellation_token: CancellationToken) -> Result<()> {
        let mut scheduler = JobScheduler::new().await?;

        self.register_refresh_latest_job(&scheduler).await?;
        let mut jobs = 1;
        if !self.engine.stable_candidates().is_empty() {
            self.register_best_stable_job(&scheduler).await?;
            jobs += 1;
        }

        scheduler.start().await?;
        info!("Cron scheduler started with {} jobs", jobs);

        cancellation_token.cancelled().await;
        info!("Cron scheduler shutting down...");

        scheduler.shutdown().await?;
        Ok(())
    }

    async fn register_refresh_latest_job(&self, scheduler: &JobScheduler) -> Result<()> {
        let engine = self.engine.clone();
        let interval = self.settings.interval_secs.max(1);

        let job = Job::new_repeated_async(Duration::from_secs(interval), move |_uuid, _lock| {
            let engine = engine.clone();
            Box::pin(async move {
                let pools = engine.store().pools().len();
                let refreshed = engine.refresh_all().await;
                if refreshed < pools {
                    error!("Refreshed {}/{} pool series", refreshed, pools);
                } else {
                    info!("Refreshed {} pool series", refreshed);
                }
            })
        })?;

        scheduler.add(job).await?;
        info!("Registered refresh_latest job (every {}s)", interval);
        Ok(())
    }

    async fn register_best_stable_job(&self, scheduler: &JobScheduler) -> Result<()> {
        let engine = self.engine.clone();
        let interval = self.settings.stable_interval_secs.max(1);

        let job = Job::new_repeated_async(Duration::from_secs(interval), move |_uuid, _lock| {
            let engine = engine.clone();
            Box::pin(async move {
                if let Err(e) = engine.refresh_best_stable().await {
                    error!("Failed to refresh best stable anchor: {}", e);
                }
            })
        })?;

        scheduler.add(job).await?;
        info!("Registered best_stable job (every {}s)", interval);
        Ok(())
    }
}
