//! Webhook Retry Engine
//!
//! Drives one webhook event through processing attempts:
//! `pending -> processing -> {completed | retrying -> processing | failed}`.
//! Failed attempts back off exponentially; the delay is awaited through a
//! [`RetryScheduler`] so tests run without wall-clock sleeps.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use legalrelay_database::WebhookEventStore;
use legalrelay_models::{ProcessingStatus, WebhookEvent, MAX_RETRIES};
use legalrelay_utils::RelayConfig;

use crate::metrics::RelayMetrics;

/// Processing step retried by the engine.
#[async_trait]
pub trait WebhookEventHandler: Send + Sync {
    async fn handle(&self, event: &WebhookEvent) -> Result<()>;
}

/// Waits out a backoff delay.
#[async_trait]
pub trait RetryScheduler: Send + Sync {
    async fn sleep(&self, delay: Duration);
}

pub struct TokioScheduler;

#[async_trait]
impl RetryScheduler for TokioScheduler {
    async fn sleep(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base: Duration,
    pub max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            base: Duration::from_millis(500),
            max: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Policy from configuration.
    ///
    /// `max_retries` never exceeds the record's retry bound, and the cap is
    /// raised to `base * 2^(max_retries - 1)` when configured lower, so every
    /// delay a run can reach is longer than the one before it.
    pub fn from_config(config: &RelayConfig) -> Self {
        let max_retries = config.max_retries.clamp(1, MAX_RETRIES);
        let base = Duration::from_millis(config.backoff_base_ms.max(1));
        let floor = base.saturating_mul(2u32.saturating_pow(max_retries - 1));

        Self {
            max_retries,
            base,
            max: Duration::from_millis(config.backoff_max_ms).max(floor),
        }
    }

    /// Delay after failed attempt `attempt` (1-based): `base * 2^(attempt - 1)`, capped at `max`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base.saturating_mul(factor).min(self.max)
    }
}

pub struct WebhookRetryEngine {
    store: Arc<dyn WebhookEventStore>,
    handler: Arc<dyn WebhookEventHandler>,
    scheduler: Arc<dyn RetryScheduler>,
    policy: RetryPolicy,
    metrics: RelayMetrics,
}

impl WebhookRetryEngine {
    pub fn new(
        store: Arc<dyn WebhookEventStore>,
        handler: Arc<dyn WebhookEventHandler>,
        scheduler: Arc<dyn RetryScheduler>,
        policy: RetryPolicy,
        metrics: RelayMetrics,
    ) -> Self {
        Self { store, handler, scheduler, policy, metrics }
    }

    /// Records the event and processes it on a background task.
    pub async fn submit(self: &Arc<Self>, event: WebhookEvent) -> Result<()> {
        self.store.insert(event.clone()).await?;

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            engine.run(event).await;
        });
        Ok(())
    }

    /// Processes `event` to a terminal status and returns the final record.
    pub async fn run(&self, mut event: WebhookEvent) -> WebhookEvent {
        let mut attempt: u32 = 0;

        loop {
            if !self.transition(&mut event, ProcessingStatus::Processing).await {
                return event;
            }
            attempt += 1;

            match self.handler.handle(&event).await {
                Ok(()) => {
                    event.error = None;
                    self.transition(&mut event, ProcessingStatus::Completed).await;
                    tracing::info!(
                        event_id = %event.id,
                        event_type = %event.event_type,
                        attempts = attempt,
                        "Webhook event processed"
                    );
                    break;
                }
                Err(err) => {
                    event.retry_count = attempt;
                    event.error = Some(format!("{:#}", err));

                    if attempt < self.policy.max_retries {
                        let delay = self.policy.backoff(attempt);
                        tracing::warn!(
                            event_id = %event.id,
                            attempt = attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "Webhook processing failed, retrying"
                        );
                        self.transition(&mut event, ProcessingStatus::Retrying).await;
                        self.scheduler.sleep(delay).await;
                    } else {
                        tracing::error!(
                            event_id = %event.id,
                            attempts = attempt,
                            error = %err,
                            "Webhook processing failed permanently"
                        );
                        self.transition(&mut event, ProcessingStatus::Failed).await;
                        break;
                    }
                }
            }
        }

        self.metrics
            .webhook_events
            .with_label_values(&[&event.processing_status.to_string()])
            .inc();
        event
    }

    async fn transition(&self, event: &mut WebhookEvent, target: ProcessingStatus) -> bool {
        if !event.processing_status.can_transition_to(target) {
            tracing::error!(
                event_id = %event.id,
                from = %event.processing_status,
                to = %target,
                "Invalid webhook status transition"
            );
            return false;
        }

        event.processing_status = target;
        if let Err(err) = self.store.update(event).await {
            tracing::warn!(event_id = %event.id, error = %err, "Failed to persist webhook event");
        }
        true
    }
}
