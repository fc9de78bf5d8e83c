//! Worker configuration from flags and environment.

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "palaver-worker", about = "Conversation pipeline worker", version)]
pub struct Config {
    /// SQLite database URL shared by the pipeline and the job queue.
    #[arg(
        long,
        env = "PALAVER_DATABASE_URL",
        default_value = "sqlite://palaver.db?mode=rwc"
    )]
    pub database_url: String,

    /// Meta Graph API base (WhatsApp Cloud, Instagram, Messenger sends).
    #[arg(
        long,
        env = "PALAVER_GRAPH_API_BASE",
        default_value = "https://graph.facebook.com/v19.0"
    )]
    pub graph_api_base: String,

    /// Unofficial bridge server base URL.
    #[arg(long, env = "PALAVER_BRIDGE_API_BASE", default_value = "http://localhost:8080")]
    pub bridge_api_base: String,

    /// API key for the bridge server.
    #[arg(long, env = "PALAVER_BRIDGE_API_KEY", default_value = "")]
    pub bridge_api_key: String,

    /// Model provider base URL (chat completions + transcription).
    #[arg(
        long,
        env = "PALAVER_MODEL_API_BASE",
        default_value = "https://api.openai.com/v1"
    )]
    pub model_api_base: String,

    /// Model provider API key.
    #[arg(long, env = "PALAVER_MODEL_API_KEY", default_value = "")]
    pub model_api_key: String,

    /// Model used for completions.
    #[arg(long, env = "PALAVER_MODEL", default_value = "gpt-4o-mini")]
    pub model: String,

    /// Worker-pool concurrency per queue. The defaults respect provider
    /// rate limits and database connection pressure.
    #[arg(long, env = "PALAVER_WEBHOOK_CONCURRENCY", default_value_t = 20)]
    pub webhook_concurrency: usize,

    #[arg(long, env = "PALAVER_MESSAGE_CONCURRENCY", default_value_t = 10)]
    pub message_concurrency: usize,

    #[arg(long, env = "PALAVER_CAMPAIGN_CONCURRENCY", default_value_t = 5)]
    pub campaign_concurrency: usize,

    #[arg(long, env = "PALAVER_AI_CONCURRENCY", default_value_t = 3)]
    pub ai_concurrency: usize,
}
