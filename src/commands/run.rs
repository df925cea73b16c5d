use anyhow::Result;
use std::sync::Arc;
use tokio::signal;

use ratecast::metrics;
use ratecast::scheduler::Scheduler;

use super::Services;

/// Scheduler, drain loop and store heartbeat until Ctrl-C
pub async fn run(services: &Services) -> Result<()> {
    let scheduler = Arc::new(Scheduler::new(
        Arc::new(services.producer()?),
        &services.config.scheduler,
    ));
    let processor = services.processor()?;

    if let Err(e) = services.manager.ensure_connection().await {
        // The loops keep retrying on their own; start anyway
        tracing::error!(error = %e, "Document store unreachable at startup");
    }
    let heartbeat = services.manager.spawn_heartbeat();

    let scheduler_task = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.start().await })
    };
    let drain_task = {
        let processor = processor.clone();
        tokio::spawn(async move { processor.run().await })
    };

    tracing::info!(
        pairs = scheduler.pairs().len(),
        environment = %services.config.store.environment,
        "ratecast started"
    );

    signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");

    scheduler.stop().await;
    processor.stop().await;
    let (scheduler_result, drain_result) = tokio::join!(scheduler_task, drain_task);
    scheduler_result?;
    drain_result?;

    heartbeat.abort();
    services.manager.close().await;
    metrics::log_snapshot();
    Ok(())
}
