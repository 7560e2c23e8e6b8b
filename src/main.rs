use std::sync::Arc;

use agent_colab::config::ColabConfig;
use agent_colab::dispatch::{DEFAULT_HANDLER, EchoHandler, HandlerRegistry, Poller, ProcessOutcome};
use agent_colab::session::Session;
use agent_colab::store::{RestStore, StoreClient};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = ColabConfig::from_env()?;
    let url = config.require_url()?;

    eprintln!("🤝 Agent Colab v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Backend: {}", url);
    eprintln!("   Poll interval: {}s", config.poll_interval.as_secs());

    // ── Store + session ─────────────────────────────────────────────────
    let backend = Arc::new(RestStore::new(url, &config.anon_key, config.request_timeout)?);
    let mut session = Session::new(StoreClient::new(backend), &config);

    if !session.connect_named(None, Some(&config.author)).await {
        eprintln!("   No valid API key, running unvalidated as {}", config.author);
        session.connect_as(config.author.clone());
    }
    let identity = session.identity()?;
    eprintln!(
        "   Worker: {} (project {})",
        identity.name(),
        session.scope()
    );

    // ── Handlers ────────────────────────────────────────────────────────
    let registry = Arc::new(HandlerRegistry::new());
    registry.register(DEFAULT_HANDLER, Arc::new(EchoHandler)).await;
    registry.register("echo", Arc::new(EchoHandler)).await;

    let poller = Poller::new(session.tasks()?, Arc::clone(&registry));

    // Stop between cycles on Ctrl-C; a running handler is allowed to finish
    let shutdown = poller.shutdown();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested");
            shutdown.trigger();
        }
    });

    let outcomes = poller
        .poll_with(config.poll_interval, config.max_iterations, |outcome| {
            if let ProcessOutcome::Failed(task) = outcome {
                tracing::warn!(
                    task_id = %task.id,
                    error = task.error.as_deref().unwrap_or(""),
                    "Task failed"
                );
            }
        })
        .await;

    if config.max_iterations.is_some() {
        eprintln!("   Processed {} tasks", outcomes.len());
    }
    Ok(())
}
