use std::{str::FromStr, sync::Arc, time::Duration};

use alloy::primitives::Address;
use anyhow::Context;
use jemallocator::Jemalloc;
use log::{error, info, warn, LevelFilter};
use simple_logger::SimpleLogger;
use tokio_util::sync::CancellationToken;

#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use rewind::{api::AppState, CronScheduler, HistoryEngine, RpcLogSource, Settings};

#[tokio::main()]
async fn main() -> anyhow::Result<()> {
    SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .init()
        .context("Failed to initialize logger")?;

    // Load configuration
    let settings = Arc::new(
        Settings::new()
            .context("Failed to load config.yaml. Please ensure it exists and is valid")?,
    );

    let source = RpcLogSource::new(
        &settings.rpc.urls,
        Duration::from_secs(settings.rpc.request_timeout_secs),
    )
    .context("Failed to initialize RPC source")?;

    let engine = Arc::new(
        HistoryEngine::new(Arc::new(source), &settings).context("Failed to initialize engine")?,
    );

    let cancellation_token = CancellationToken::new();

    run_service(settings, engine, cancellation_token).await
}

async fn run_service(
    settings: Arc<Settings>,
    engine: Arc<HistoryEngine>,
    cancellation_token: CancellationToken,
) -> anyhow::Result<()> {
    // Initial loads run in the background so the API is up immediately
    let pools = settings
        .pools
        .iter()
        .filter_map(|raw| match Address::from_str(raw.trim()) {
            Ok(address) => Some(address),
            Err(e) => {
                warn!("Skipping invalid pool address {:?}: {}", raw, e);
                None
            },
        })
        .collect::<Vec<_>>();

    let loader_engine = engine.clone();
    let loader_token = cancellation_token.child_token();
    let loader_handle = tokio::spawn(async move {
        for pool in pools {
            tokio::select! {
                _ = loader_token.cancelled() => break,
                result = loader_engine.load_history(pool, None) => match result {
                    Ok(count) => info!("Pool {}: loaded {} observations", pool, count),
                    Err(e) => error!("Pool {}: initial load failed: {}", pool, e),
                },
            }
        }

        if !loader_engine.stable_candidates().is_empty() {
            if let Err(e) = loader_engine.refresh_best_stable().await {
                error!("Initial stable anchor selection failed: {}", e);
            }
        }
    });

    info!("Initial history loads started for {} pools", settings.pools.len());

    // Periodic latest-bucket and stable anchor refresh
    let cron_scheduler = CronScheduler::new(engine.clone(), settings.refresh.clone());

    let cron_token = cancellation_token.child_token();
    let cron_handle = tokio::spawn(async move {
        if let Err(e) = cron_scheduler.run(cron_token).await {
            error!("Cron scheduler failed: {:#}", e);
        }
    });

    info!("Cron scheduler started - series will refresh periodically");

    let api_handle = if settings.api.enabled {
        let state = Arc::new(AppState {
            engine: engine.clone(),
        });
        let bind = settings.api.bind.clone();
        let api_token = cancellation_token.child_token();
        Some(tokio::spawn(async move {
            if let Err(e) = rewind::api::serve(&bind, state, api_token).await {
                error!("API server failed: {:#}", e);
            }
        }))
    } else {
        info!("API disabled");
        None
    };

    #[cfg(unix)]
    let mut sigterm_stream = {
        use tokio::signal::unix::{signal, SignalKind};
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?
    };

    info!("Service running. Press Ctrl+C to stop.");

    #[cfg(unix)]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal (Ctrl+C), exiting gracefully...");
            },
            _ = sigterm_stream.recv() => {
                info!("Received SIGTERM, exiting gracefully...");
            },
        };
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal (Ctrl+C), exiting gracefully...");
            },
        };
    }

    info!("Finishing all tasks...");

    cancellation_token.cancel();

    info!("Waiting for initial loads to stop...");
    let _ = loader_handle.await;

    info!("Waiting for cron scheduler to stop...");
    let _ = cron_handle.await;

    if let Some(handle) = api_handle {
        info!("Waiting for API server to stop...");
        let _ = handle.await;
    }

    info!(
        "Stopped with {} pool series in memory, {} reserve clamps recorded",
        engine.store().pools().len(),
        engine.clamp_count()
    );
    Ok(())
}
