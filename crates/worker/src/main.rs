//! The palaver worker process: wires the store, event bus, provider clients,
//! and queue worker pools together, then runs until a termination signal.

mod config;

use std::sync::Arc;

use {
    anyhow::Result,
    clap::Parser,
    tracing::info,
    tracing_subscriber::EnvFilter,
};

use {
    palaver_adapters::{BridgeSender, GraphSender},
    palaver_ai::{
        ChatbotHandler, EnrichmentService, HttpModelClient, SentimentHandler, SuggestHandler,
        TranscribeHandler,
    },
    palaver_campaigns::{CampaignOrchestrator, CampaignSendHandler, CampaignStartHandler},
    palaver_core::{
        EventBus,
        jobs::{
            JOB_AI_CHATBOT, JOB_AI_SENTIMENT, JOB_AI_SUGGEST, JOB_AI_TRANSCRIBE,
            JOB_CAMPAIGN_SEND, JOB_CAMPAIGN_START, JOB_PROCESS_INCOMING, JOB_SEND_MESSAGE,
            QUEUE_AI, QUEUE_CAMPAIGNS, QUEUE_MESSAGES, QUEUE_WEBHOOKS,
        },
    },
    palaver_pipeline::{
        EventProcessor, Ingestor, OutboundDispatcher, ProcessIncomingHandler, Resolver,
        SendMessageHandler, StatusReconciler,
    },
    palaver_queue::{JobStore, QueueRuntime, SqliteStore},
    palaver_store::Store,
};

use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("palaver=info")),
        )
        .init();

    let config = Config::parse();
    info!(database_url = %config.database_url, "palaver worker starting");

    // Process-scoped resources, acquired once and injected everywhere.
    let store = Store::connect(&config.database_url).await?;
    palaver_queue::run_migrations(store.pool()).await?;
    let job_store: Arc<dyn JobStore> = Arc::new(SqliteStore::with_pool(store.pool().clone()));
    let bus = EventBus::new(1024);
    let http = reqwest::Client::new();

    let graph = Arc::new(GraphSender::new(http.clone(), config.graph_api_base.clone()));
    let bridge = Arc::new(BridgeSender::new(
        http.clone(),
        config.bridge_api_base.clone(),
        config.bridge_api_key.clone(),
    ));
    let model = Arc::new(HttpModelClient::new(
        http,
        config.model_api_base.clone(),
        config.model_api_key.clone(),
        config.model.clone(),
    ));

    let resolver = Resolver::new(store.clone());
    let ingestor = Ingestor::new(store.clone(), resolver.clone(), bus.clone());
    let reconciler = StatusReconciler::new(store.clone(), bus.clone());
    let processor = Arc::new(EventProcessor::new(
        store.clone(),
        resolver.clone(),
        ingestor.clone(),
        reconciler,
    ));
    let dispatcher = Arc::new(OutboundDispatcher::new(store.clone(), graph, bridge));

    let mut runtime = QueueRuntime::new(job_store);
    runtime.add_pool(QUEUE_WEBHOOKS, config.webhook_concurrency);
    runtime.add_pool(QUEUE_MESSAGES, config.message_concurrency);
    runtime.add_pool(QUEUE_CAMPAIGNS, config.campaign_concurrency);
    runtime.add_pool(QUEUE_AI, config.ai_concurrency);
    let producer = runtime.producer();

    let orchestrator = Arc::new(CampaignOrchestrator::new(
        store.clone(),
        producer.clone(),
        resolver,
        ingestor.clone(),
    ));
    let enrichment = Arc::new(EnrichmentService::new(
        store.clone(),
        bus.clone(),
        model,
        ingestor,
        producer,
    ));

    runtime.register(
        QUEUE_WEBHOOKS,
        JOB_PROCESS_INCOMING,
        Arc::new(ProcessIncomingHandler::new(processor)),
    )?;
    runtime.register(
        QUEUE_MESSAGES,
        JOB_SEND_MESSAGE,
        Arc::new(SendMessageHandler::new(dispatcher, store.clone())),
    )?;
    runtime.register(
        QUEUE_CAMPAIGNS,
        JOB_CAMPAIGN_START,
        Arc::new(CampaignStartHandler::new(Arc::clone(&orchestrator))),
    )?;
    runtime.register(
        QUEUE_CAMPAIGNS,
        JOB_CAMPAIGN_SEND,
        Arc::new(CampaignSendHandler::new(orchestrator)),
    )?;
    runtime.register(QUEUE_AI, JOB_AI_TRANSCRIBE, Arc::new(TranscribeHandler(Arc::clone(&enrichment))))?;
    runtime.register(QUEUE_AI, JOB_AI_SUGGEST, Arc::new(SuggestHandler(Arc::clone(&enrichment))))?;
    runtime.register(QUEUE_AI, JOB_AI_SENTIMENT, Arc::new(SentimentHandler(Arc::clone(&enrichment))))?;
    runtime.register(QUEUE_AI, JOB_AI_CHATBOT, Arc::new(ChatbotHandler(enrichment)))?;

    runtime.start().await?;
    info!("worker pools running");

    shutdown_signal().await;

    // Drain: stop accepting, finish in-flight jobs, then release the store.
    runtime.shutdown().await;
    store.pool().close().await;
    info!("palaver worker stopped");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }
}
