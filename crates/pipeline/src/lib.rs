//! The ingestion, normalization, and delivery pipeline.
//!
//! Inbound: webhook payload → provider adapter → channel resolver →
//! contact/conversation resolver → message ingest → broadcast. Outbound:
//! send jobs → dispatcher → provider API → receipt reconciliation.

pub mod dispatch;
pub mod error;
pub mod ingest;
pub mod process_incoming;
pub mod resolver;
pub mod status;

pub use {
    dispatch::{OutboundDispatcher, SendMessageHandler, send_job, send_retry_policy},
    error::{Error, Result},
    ingest::Ingestor,
    process_incoming::{
        EventProcessor, ProcessIncomingHandler, ProcessOutcome, incoming_job, webhook_retry_policy,
    },
    resolver::Resolver,
    status::StatusReconciler,
};
