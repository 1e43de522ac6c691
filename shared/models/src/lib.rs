//! # LegalRelay Core Domain Models
//!
//! Types shared by the notification relay and its persistence layer.
//!
//! ## Key Models
//!
//! - **WebhookEvent**: a received chat webhook and its processing record
//! - **WebhookPayload**: the webhook body as a closed union over known categories
//! - **ThreadCorrelationEntry**: chat context behind an outbound email thread
//! - **ResolvedRecipient**: a channel member with a deliverable email address
//! - **EmailMessage**: an inbound email reply as fetched from the mail provider

pub mod chat;
pub mod correlation;
pub mod email;
pub mod identity;
pub mod tracking;
pub mod webhook;

pub use chat::*;
pub use correlation::*;
pub use email::*;
pub use identity::*;
pub use tracking::*;
pub use webhook::*;
