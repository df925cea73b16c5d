use anyhow::{Context, Result};
use chrono::NaiveDateTime;

use ratecast::error::ErrorCategory;
use ratecast::scheduler::{ProduceRequest, ProducerOutcome};
use ratecast::storage::ObjectId;

use super::Services;

/// Arguments of `ratecast produce`
#[derive(Debug, Clone)]
pub struct ProduceArgs {
    pub country: String,
    pub collection: String,
    pub time: Option<String>,
    pub template: Option<String>,
    pub id: Option<String>,
    pub datetime: Option<NaiveDateTime>,
}

/// Accepts `2024-03-05T12:00:00`, `2024-03-05 12:00:00` or `2024-03-05 12:00`
pub fn parse_datetime(value: &str) -> Result<NaiveDateTime, String> {
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .ok_or_else(|| format!("invalid date time '{value}', expected YYYY-MM-DD HH:MM[:SS]"))
}

/// Run one producer and report; connectivity errors are returned for exit code 1
pub async fn produce(services: &Services, args: ProduceArgs) -> Result<()> {
    let subscription_id = args
        .id
        .as_deref()
        .map(ObjectId::parse)
        .transpose()
        .context("Invalid subscription id")?;

    let request = ProduceRequest {
        country: args.country,
        collection: args.collection,
        time: args.time,
        template: args.template,
        subscription_id,
        datetime: args.datetime,
    };

    let producer = services.producer()?;
    let result = producer.run(&request).await;
    services.manager.close().await;

    match result {
        Ok(report) => {
            match &report.outcome {
                ProducerOutcome::Failed(reason) => {
                    tracing::warn!(report = %report, reason = %reason, "Producer run failed")
                }
                _ => tracing::info!(report = %report, "Producer run finished"),
            }
            Ok(())
        }
        Err(e) if e.category() == ErrorCategory::Connectivity => {
            Err(anyhow::Error::new(e).context("Document store unreachable"))
        }
        Err(e) => Err(anyhow::Error::new(e)),
    }
}
