use prometheus::{IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Counters for the relay, registered on a private registry.
#[derive(Clone)]
pub struct RelayMetrics {
    registry: Registry,
    pub webhook_events: IntCounterVec,
    pub emails_sent: IntCounter,
    pub recipients_skipped: IntCounter,
    pub replies_relayed: IntCounter,
    pub reply_failures: IntCounter,
}

impl RelayMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("legalrelay".to_string()), None)?;

        let webhook_events = IntCounterVec::new(
            Opts::new("webhook_events_total", "Webhook events by final processing status"),
            &["status"],
        )?;
        let emails_sent = IntCounter::new("notification_emails_sent_total", "Notification emails dispatched")?;
        let recipients_skipped = IntCounter::new(
            "recipients_skipped_total",
            "Channel members skipped for lack of a deliverable address",
        )?;
        let replies_relayed = IntCounter::new("email_replies_relayed_total", "Email replies posted to chat")?;
        let reply_failures = IntCounter::new("email_reply_failures_total", "Email replies that failed to relay")?;

        registry.register(Box::new(webhook_events.clone()))?;
        registry.register(Box::new(emails_sent.clone()))?;
        registry.register(Box::new(recipients_skipped.clone()))?;
        registry.register(Box::new(replies_relayed.clone()))?;
        registry.register(Box::new(reply_failures.clone()))?;

        Ok(Self {
            registry,
            webhook_events,
            emails_sent,
            recipients_skipped,
            replies_relayed,
            reply_failures,
        })
    }

    /// Text exposition format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        TextEncoder::new().encode_to_string(&self.registry.gather())
    }
}
