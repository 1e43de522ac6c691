//! # LegalRelay Notification Relay
//!
//! Bridges a chat platform and a mailbox:
//!
//! - signed chat webhooks become notification emails for the other channel
//!   members, threaded per channel and retried with exponential backoff
//! - replies to those emails are polled from the inbox, stripped of quoted
//!   history and posted back into the originating channel

pub mod composer;
pub mod dispatcher;
pub mod metrics;
pub mod middleware;
pub mod poller;
pub mod providers;
pub mod recipients;
pub mod reply_router;
pub mod retry;
pub mod routes;
pub mod sanitizer;
pub mod signature;
pub mod threading;
pub mod tracking;

#[cfg(test)]
mod fakes;

pub use dispatcher::RelayEventHandler;
pub use reply_router::{EmailReplyRouter, PollSummary};
pub use retry::{RetryPolicy, TokioScheduler, WebhookRetryEngine};
pub use routes::{create_app, AppState};
