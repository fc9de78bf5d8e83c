//! AI enrichment: transcription, reply suggestions, sentiment, and the
//! chatbot auto-reply, all best-effort with deterministic fallbacks.

pub mod client;
pub mod error;
pub mod sentiment;
pub mod service;
pub mod suggest;

pub use {
    client::{HttpModelClient, ModelClient},
    error::{Error, Result},
    sentiment::{Sentiment, SentimentLabel, keyword_sentiment},
    service::{
        ChatbotHandler, EnrichmentService, SentimentHandler, SuggestHandler, TranscribeHandler,
        ai_retry_policy, chatbot_job, sentiment_job, suggest_job, transcribe_job,
    },
};
