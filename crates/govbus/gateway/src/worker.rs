//! Ingress worker pool.
//!
//! Pulls messages off the [`MessageQueue`] and submits them to the gateway
//! with bounded concurrency. Acknowledgement follows the gateway's verdict:
//! a transient failure is nacked for redelivery, anything else (including
//! integrity and authorization rejections) is acked so it is not retried.

use std::sync::Arc;

use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::error::GatewayResult;
use crate::gateway::MessageGateway;
use crate::queue::{MessageQueue, QueuedMessage};

/// How a leased message was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerOutcome {
    Acked,
    Nacked,
}

/// Drains the ingress queue into the gateway with bounded concurrency.
pub struct WorkerPool {
    config: WorkerConfig,
    gateway: Arc<MessageGateway>,
    queue: Arc<dyn MessageQueue>,
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(
        config: WorkerConfig,
        gateway: Arc<MessageGateway>,
        queue: Arc<dyn MessageQueue>,
    ) -> GatewayResult<Self> {
        config.validate()?;
        let permits = Arc::new(Semaphore::new(config.concurrency));
        Ok(Self {
            config,
            gateway,
            queue,
            permits,
        })
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Process one leased message and settle it.
    pub async fn handle(&self, job: QueuedMessage) -> WorkerOutcome {
        let receipt = job.receipt;
        let message_id = job.message.message_id.clone();

        let outcome = match self.gateway.submit(job.message, job.context).await {
            Ok(_) => WorkerOutcome::Acked,
            Err(e) if e.is_transient() => {
                warn!(
                    message_id = %message_id,
                    deliveries = job.deliveries,
                    error = %e,
                    "Transient failure, message will be redelivered"
                );
                WorkerOutcome::Nacked
            }
            Err(e) => {
                warn!(message_id = %message_id, error = %e, "Message rejected");
                WorkerOutcome::Acked
            }
        };

        let settled = match outcome {
            WorkerOutcome::Acked => self.queue.ack(receipt).await,
            WorkerOutcome::Nacked => self.queue.nack(receipt).await,
        };
        if let Err(e) = settled {
            error!(receipt, error = %e, "Failed to settle queued message");
        }
        outcome
    }

    /// Poll the queue until `shutdown` flips to `true`, then wait for
    /// in-flight messages to settle.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(concurrency = self.config.concurrency, "Worker pool started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let permit = tokio::select! {
                permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            };

            match self.queue.receive().await {
                Ok(Some(job)) => {
                    debug!(receipt = job.receipt, message_id = %job.message.message_id, "Leased message");
                    let pool = Arc::clone(&self);
                    tokio::spawn(async move {
                        pool.handle(job).await;
                        drop(permit);
                    });
                }
                Ok(None) => {
                    drop(permit);
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    drop(permit);
                    error!(error = %e, "Queue receive failed");
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
        }

        // Every permit back means every spawned handler has settled.
        let total = u32::try_from(self.config.concurrency).unwrap_or(u32::MAX);
        match self.permits.acquire_many(total).await {
            Ok(_) => info!("Worker pool drained"),
            Err(e) => warn!(error = %e, "Worker pool closed before draining"),
        }
    }
}

