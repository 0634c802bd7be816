use anyhow::Context;
use petra_conditions::{AlarmEngine, Config};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    petra_conditions::init()?;

    info!("PETRA Conditions v{} starting", petra_conditions::VERSION);

    let Some(config_path) = std::env::args().nth(1) else {
        error!("Usage: petra-conditions <config.yaml>");
        std::process::exit(1);
    };

    let config = Config::from_file(&config_path)
        .with_context(|| format!("loading configuration from {}", config_path))?;
    info!("Loaded {} conditions", config.conditions.len());

    let engine = Arc::new(
        AlarmEngine::new(config.clone())
            .await
            .context("starting alarm engine")?,
    );

    #[cfg(feature = "metrics")]
    if let Some(bind_address) = config.metrics.prometheus_address {
        let server = petra_conditions::MetricsServer::new(
            petra_conditions::MetricsServerConfig { bind_address },
            engine.metrics_aggregator(),
        )?;
        tokio::spawn(async move {
            if let Err(e) = server.start().await {
                error!("Metrics server error: {}", e);
            }
        });
    }

    let runner = engine.clone();
    let mut run = tokio::spawn(async move { runner.run().await });

    let interrupted = tokio::select! {
        _ = signal::ctrl_c() => true,
        res = &mut run => {
            if let Ok(Err(e)) = res {
                error!("Engine error: {}", e);
                std::process::exit(1);
            }
            false
        }
    };

    if interrupted {
        info!("Received shutdown signal");
        engine.stop();
        match run.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Engine error during stop: {}", e),
            Err(e) => error!("Engine task failed: {}", e),
        }
    }

    engine.shutdown().await;
    info!("Engine stopped normally");

    let stats = engine.stats();
    info!(
        "Final stats: {} scans, {} errors, {} conditions, uptime: {}s",
        stats.scan_count, stats.error_count, stats.condition_count, stats.uptime_secs
    );

    Ok(())
}
