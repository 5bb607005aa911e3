use std::sync::Arc;

use leadflow::adapters::http::{HttpAdapterConfig, create_http_adapters};
use leadflow::adapters::llm::{LlmBackend, LlmConfig, create_llm_capability};
use leadflow::config::OrchestratorConfig;
use leadflow::jobs::submission::{SubmissionApi, spawn_reconciliation_sweep};
use leadflow::memory::{MemoryManager, spawn_cache_sweep};
use leadflow::notify::{AppState, NotificationHub, build_router};
use leadflow::queue::{TaskBroker, spawn_redelivery_sweep};
use leadflow::router::IntentRouter;
use leadflow::store::{LibSqlStore, Store};
use leadflow::worker::WorkerPool;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing; LEADFLOW_LOG_DIR switches output to daily files.
    let env_filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };
    let _log_guard = match std::env::var("LEADFLOW_LOG_DIR") {
        Ok(dir) => {
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "leadflow.log"));
            tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false)
                .init();
            Some(guard)
        }
        Err(_) => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_target(false)
                .init();
            None
        }
    };

    let config = OrchestratorConfig::from_env()?;

    let port: u16 = std::env::var("LEADFLOW_PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse()
        .unwrap_or(8080);

    eprintln!("📡 Leadflow v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Events WS: ws://0.0.0.0:{}/ws/{{owner}}", port);
    eprintln!("   Jobs API: http://0.0.0.0:{}/api/owners/{{owner}}/jobs", port);

    // ── Database ─────────────────────────────────────────────────────────
    let db_path =
        std::env::var("LEADFLOW_DB_PATH").unwrap_or_else(|_| "./data/leadflow.db".to_string());
    let store: Arc<dyn Store> = Arc::new(
        LibSqlStore::new_local(std::path::Path::new(&db_path))
            .await
            .unwrap_or_else(|e| {
                eprintln!("Error: Failed to open database at {}: {}", db_path, e);
                std::process::exit(1);
            }),
    );
    eprintln!("   Database: {}", db_path);

    // ── LLM capability (optional) ────────────────────────────────────────
    let (classifier, summarizer) = match std::env::var("ANTHROPIC_API_KEY")
        .ok()
        .filter(|key| !key.is_empty())
    {
        Some(api_key) => {
            let model = std::env::var("LEADFLOW_MODEL")
                .unwrap_or_else(|_| "claude-sonnet-4-20250514".to_string());
            eprintln!("   LLM: anthropic ({})", model);
            let llm_config = LlmConfig {
                backend: LlmBackend::Anthropic,
                api_key: secrecy::SecretString::from(api_key),
                model,
                classify_timeout: config.router.classify_timeout,
                summarize_timeout: config.memory.summarize_timeout,
            };
            let (classifier, summarizer) = create_llm_capability(&llm_config)?;
            (Some(classifier), Some(summarizer))
        }
        None => {
            eprintln!("   LLM: disabled (keyword routing, no summarization)");
            (None, None)
        }
    };

    // ── External service adapters ────────────────────────────────────────
    let services_url = std::env::var("LEADFLOW_SERVICES_URL")
        .unwrap_or_else(|_| "http://localhost:9090".to_string());
    let adapters = create_http_adapters(&HttpAdapterConfig {
        base_url: services_url.clone(),
        api_key: std::env::var("LEADFLOW_SERVICES_KEY")
            .ok()
            .map(secrecy::SecretString::from),
        timeout: config.worker.step_timeout,
    });
    eprintln!("   Services: {}", services_url);

    // ── Core components ──────────────────────────────────────────────────
    let hub = NotificationHub::new();
    let broker = TaskBroker::new(config.broker.clone());
    let memory = MemoryManager::new(store.clone(), summarizer, config.memory.clone());
    let router = IntentRouter::new(config.router.clone(), classifier, memory.clone());
    let submission = SubmissionApi::new(
        store.clone(),
        broker.clone(),
        hub.clone(),
        config.broker.max_attempts,
    );

    let pool = WorkerPool::spawn(
        broker.clone(),
        store.clone(),
        hub.clone(),
        adapters,
        config.worker.clone(),
    );
    eprintln!("   Workers: {} running\n", pool.len());

    // ── Background sweeps ────────────────────────────────────────────────
    let _redelivery = spawn_redelivery_sweep(
        broker.clone(),
        store.clone(),
        hub.clone(),
        config.broker.redelivery_interval,
    );
    let _reconcile =
        spawn_reconciliation_sweep(store.clone(), broker.clone(), config.submission.clone());
    let _cache_sweep = spawn_cache_sweep(store.clone(), config.memory.cache_sweep_interval);

    // ── HTTP / WS server ─────────────────────────────────────────────────
    let app = build_router(Arc::new(AppState {
        store,
        hub,
        submission,
        router,
        memory,
    }));
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    tracing::info!(port, "Leadflow server started");
    axum::serve(listener, app).await?;

    Ok(())
}
