//! # Simple Work Queue
//!
//! Provisions a work queue, posts one work item from the sink service and
//! drains the queue, ending each conversation once its item is handled.
//!
//! The store comes from `BrokerConfig`: a config file path may be passed as the
//! first argument, otherwise `BROKER_*` environment variables are used.

use anyhow::{Context, Result};
use service_broker::logging::{init_structured_logging, log_error, log_queue_operation};
use service_broker::{BrokerConfig, ServiceBroker};

#[tokio::main]
async fn main() -> Result<()> {
    init_structured_logging();

    let config = match std::env::args().nth(1) {
        Some(path) => BrokerConfig::load(&path)
            .with_context(|| format!("Failed to load configuration from {path}"))?,
        None => BrokerConfig::from_env().context("Invalid BROKER_* environment")?,
    };

    let broker = ServiceBroker::from_config(&config)
        .await
        .context("Failed to open the queue store")?;

    broker.enable_broker().await?;
    let work_item = broker.create_message_type("WorkItem").await?;
    let work_queue = broker.create_queue("WorkQueue").await?;

    let contract = broker
        .create_contract("WorkQueueItems", std::slice::from_ref(&work_item), &[])
        .await?;

    let sink_service = broker.create_sink_service().await?;
    let worker_service = work_queue
        .create_service("WorkerService", contract.name())
        .await?;

    let mut conversation = broker
        .begin_conversation(&sink_service, &worker_service, contract.name())
        .await?;
    conversation.send(&work_item, "Hello Service Broker World!");
    broker.flush(&mut conversation).await?;

    loop {
        let received = work_queue
            .try_receive(config.receive_timeout(), None, |conversation, message_type, body| {
                println!("{}: {}", message_type, String::from_utf8_lossy(body));
                log_queue_operation(
                    "receive",
                    work_queue.name(),
                    Some(&conversation.handle().to_string()),
                    Some(message_type.name()),
                    "handled",
                    None,
                );
                conversation.end_conversation();
                Ok(())
            })
            .await;

        match received {
            Ok(true) => continue,
            Ok(false) => break,
            Err(e) => {
                log_error("simple_work_queue", "receive", &e.to_string(), Some(work_queue.name()));
                return Err(e.into());
            }
        }
    }

    let remaining = work_queue.statistics().await?;
    println!("{} message(s) left on {}", remaining.message_count(), work_queue.name());
    Ok(())
}
