use anyhow::Result;
use tokio::signal;

use ratecast::metrics;
use ratecast::processor::DrainOutcome;

use super::Services;

/// Drain one item, or poll until Ctrl-C
pub async fn drain(services: &Services, once: bool) -> Result<()> {
    let processor = services.processor()?;

    if once {
        let outcome = processor.drain_one().await;
        services.manager.close().await;
        let outcome = outcome?;
        if outcome == DrainOutcome::Empty {
            println!("Queue is empty");
        } else {
            println!("Drained one item: {}", outcome.as_str());
        }
        return Ok(());
    }

    let heartbeat = services.manager.spawn_heartbeat();
    let runner = processor.clone();
    let handle = tokio::spawn(async move { runner.run().await });

    signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");

    processor.stop().await;
    handle.await?;
    heartbeat.abort();
    services.manager.close().await;
    metrics::log_snapshot();
    Ok(())
}

pub async fn queue_depth(services: &Services) -> Result<()> {
    let depth = services.queue.depth().await;
    services.manager.close().await;
    println!("{}", depth?);
    Ok(())
}

/// Remove one queued item of a subscription, in either id form
pub async fn queue_remove(services: &Services, subscription_id: &str) -> Result<()> {
    let removed = services.queue.delete_by_subscription_id(subscription_id).await;
    services.manager.close().await;
    println!("Removed {} item(s)", removed?);
    Ok(())
}
