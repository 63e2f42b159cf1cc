//! aula CLI — the server entry point.
//!
//! Commands:
//! - `serve`        — Start the HTTP server
//! - `check-config` — Validate a configuration file and exit

use anyhow::Context;
use aula_config::PipelineConfig;
use aula_context::ContextPruner;
use aula_core::provider::Provider;
use aula_core::store::{CacheStore, ConversationStore, UsageStore};
use aula_gateway::{AppState, SharedState};
use aula_ledger::UsageLedger;
use aula_pipeline::orchestrator::GatewaySummarizer;
use aula_pipeline::{ChatTurnOrchestrator, IntentRouter, ResponseCache, SessionGuard};
use aula_providers::gateway::ModelGateway;
use aula_providers::build_provider;
use aula_retrieval::{InMemoryCorpus, KnowledgeRetriever};
use aula_store::{InMemoryStore, SqliteStore};
use aula_tools::{FixtureReads, default_registry};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(
    name = "aula",
    about = "aula — multi-tenant chat-turn orchestration for enrollment CRMs",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Configuration file
        #[arg(short, long, default_value = "aula.toml")]
        config: PathBuf,

        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,

        /// Tenant the fixture read-services answer for
        #[arg(long, default_value = "demo")]
        demo_tenant: String,
    },

    /// Validate a configuration file and exit
    CheckConfig {
        #[arg(short, long, default_value = "aula.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Serve {
            config,
            port,
            demo_tenant,
        } => serve(config, port, demo_tenant).await,
        Commands::CheckConfig { config } => {
            PipelineConfig::load(&config)
                .with_context(|| format!("config at {}", config.display()))?;
            println!("config ok: {}", config.display());
            Ok(())
        }
    }
}

fn load_config(path: &Path) -> anyhow::Result<PipelineConfig> {
    if path.exists() {
        Ok(PipelineConfig::load(path)
            .with_context(|| format!("config at {}", path.display()))?)
    } else {
        warn!(path = %path.display(), "Config file not found, using defaults");
        let mut config = PipelineConfig::default();
        config.apply_env_overrides();
        Ok(config)
    }
}

async fn serve(config_path: PathBuf, port: Option<u16>, demo_tenant: String) -> anyhow::Result<()> {
    let mut config = load_config(&config_path)?;
    if let Some(port) = port {
        config.server.port = port;
    }

    if config.providers.is_empty() {
        warn!("No providers configured: only router and cache shortcuts will answer");
    }

    let state = match config.store.backend.as_str() {
        "sqlite" => {
            let store = Arc::new(SqliteStore::new(&config.store.path).await?);
            build_state(config.clone(), store, &demo_tenant)
        }
        _ => build_state(config.clone(), Arc::new(InMemoryStore::new()), &demo_tenant),
    };

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(addr = %addr, "aula listening");

    axum_serve(listener, state).await
}

async fn axum_serve(
    listener: tokio::net::TcpListener,
    state: SharedState,
) -> anyhow::Result<()> {
    axum::serve(listener, aula_gateway::router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await
        .context("http server")
}

fn build_state<S>(config: PipelineConfig, store: Arc<S>, demo_tenant: &str) -> SharedState
where
    S: ConversationStore + CacheStore + UsageStore + 'static,
{
    let adapters: Vec<(String, Arc<dyn Provider>)> = config
        .providers
        .iter()
        .map(|p| (p.kind.clone(), build_provider(p)))
        .collect();

    let mut gateway = ModelGateway::new(config.model.max_output_tokens);
    for (entry, (_, adapter)) in config.providers.iter().zip(adapters.iter()) {
        gateway = gateway.add(
            adapter.clone(),
            &entry.model,
            Duration::from_secs(entry.timeout_secs),
        );
    }
    let gateway = Arc::new(gateway);

    // Embeddings go to the first OpenAI-compatible adapter; without one the
    // retriever degrades to no extra context.
    let embedder: Arc<dyn Provider> = adapters
        .iter()
        .find(|(kind, _)| kind == "openai")
        .or_else(|| adapters.first())
        .map(|(_, a)| a.clone())
        .unwrap_or_else(|| Arc::new(GatewaySummarizer::new(gateway.clone())));

    let ledger = Arc::new(UsageLedger::new(store.clone()));
    let orchestrator = ChatTurnOrchestrator::new(
        config.clone(),
        SessionGuard::new(config.guard.clone()),
        IntentRouter::new(),
        ResponseCache::new(config.cache.clone(), store.clone()),
        ContextPruner::new(
            config.context.clone(),
            Arc::new(GatewaySummarizer::new(gateway.clone())),
            "auto",
        ),
        KnowledgeRetriever::new(
            config.retrieval.clone(),
            Arc::new(InMemoryCorpus::new()),
            embedder,
        ),
        Arc::new(default_registry(Arc::new(FixtureReads::demo(demo_tenant)))),
        gateway,
        store,
        ledger.clone(),
    );

    Arc::new(AppState {
        orchestrator: Arc::new(orchestrator),
        ledger,
    })
}
