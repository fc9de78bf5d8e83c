//! Canonical domain model for the palaver worker.
//!
//! Provider adapters normalize webhook payloads into the [`event::CanonicalEvent`]
//! union; everything downstream (resolvers, ingest, dispatch, campaigns, AI
//! enrichment) speaks the entity and job types defined here.

pub mod broadcast;
pub mod event;
pub mod jobs;
pub mod types;

pub use {
    broadcast::{BroadcastEvent, EventBus},
    event::{CanonicalEvent, ConnectionState, InboundMessage},
    types::*,
};

/// Current unix timestamp in seconds.
pub fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Generate a fresh entity id.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
