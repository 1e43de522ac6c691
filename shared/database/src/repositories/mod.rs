//! Store capabilities consumed by the relay.
//!
//! Each store is a trait so the relay can run against in-memory maps in tests
//! and against Redis, MongoDB or PostgreSQL in production without changing call sites.

pub mod cases;
pub mod correlation;
pub mod events;
pub mod identity;

pub use cases::{CaseDirectory, InMemoryCaseDirectory, PostgresCaseDirectory};
pub use correlation::{InMemoryCorrelationStore, RedisCorrelationStore, ThreadCorrelationStore};
pub use events::{InMemoryWebhookEventStore, MongoWebhookEventStore, WebhookEventStore};
pub use identity::{IdentityStore, InMemoryIdentityStore, PostgresIdentityStore};
