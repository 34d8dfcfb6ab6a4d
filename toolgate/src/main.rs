// Copyright 2026 The Toolgate Project
// SPDX-License-Identifier: Apache-2.0

use clap::Parser;
use toolgate::config::{self, GatewayConfig};
use toolgate::engine::{LoopDeps, LoopEngine};
use toolgate::proxy::{self, AppState};
use toolgate::rules::{RuleSet, RuleStore};
use toolgate::sink::{DispatcherNoteWriter, NoteWriter, TracingToolLog};
use toolgate::tools::{ToolDispatcher, ToolRegistry, WebhookTool};
use toolgate::upstream::ReqwestCompletionClient;

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "toolgate", about = "LLM gateway with an inline tool-call loop")]
struct Cli {
    /// Path to the toolgate.yaml config file
    #[arg(long, default_value = "toolgate.yaml", env = "TOOLGATE_CONFIG")]
    config: String,

    /// Port to listen on (overrides server.port)
    #[arg(long, env = "TOOLGATE_PORT")]
    port: Option<u16>,

    /// Address to bind
    #[arg(long, default_value = "127.0.0.1", env = "TOOLGATE_HOST")]
    host: IpAddr,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .json()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let source = config::FileSource {
        path: std::path::PathBuf::from(&cli.config),
    };
    let config = match config::load_config(&source) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("failed to load config: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        version = %config.version,
        environment = %config.environment,
        upstream = %config.upstream.base_url,
        tools = config.tools.len(),
        config_hash = %config.config_hash,
        "config loaded"
    );

    let rules = match load_rules(&config) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::error!("failed to load rules: {e}");
            std::process::exit(1);
        }
    };
    watch_reload_signal(Arc::clone(&rules));

    let http = reqwest::Client::new();
    let dispatcher: Arc<dyn ToolDispatcher> = Arc::new(build_registry(&http, &config));
    let notes = config.diary.as_ref().map(|diary| {
        Arc::new(DispatcherNoteWriter::new(Arc::clone(&dispatcher), &diary.tool))
            as Arc<dyn NoteWriter>
    });

    let engine = LoopEngine::new(LoopDeps {
        client: Arc::new(ReqwestCompletionClient::new(http, &config.upstream)),
        dispatcher,
        rules,
        tool_log: Arc::new(TracingToolLog),
        notes,
        config: config.loop_config,
    });

    let app = proxy::build_router(AppState {
        engine,
        server_key: config.server.key.clone(),
    });

    let addr = SocketAddr::new(cli.host, cli.port.unwrap_or(config.server.port));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(%addr, "failed to bind: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(%addr, "toolgate listening");

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("server error: {e}");
        std::process::exit(1);
    }
}

fn load_rules(config: &GatewayConfig) -> Result<RuleStore, config::ConfigError> {
    match &config.rules_path {
        Some(path) => RuleStore::from_source(Box::new(config::FileSource { path: path.clone() })),
        None => Ok(RuleStore::new(RuleSet::empty())),
    }
}

fn build_registry(http: &reqwest::Client, config: &GatewayConfig) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    for tool in &config.tools {
        registry.register(tool.name.clone(), Arc::new(WebhookTool::new(http.clone(), tool)));
    }
    tracing::info!(tools = ?registry.names(), "tools registered");
    registry
}

/// Reload the rule file on SIGHUP.
#[cfg(unix)]
fn watch_reload_signal(rules: Arc<RuleStore>) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!("SIGHUP handler unavailable, rule reload disabled: {e}");
            return;
        }
    };
    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            match rules.reload() {
                Ok(status) => tracing::info!(
                    structured = status.structured,
                    simple = status.simple,
                    fingerprint = %status.fingerprint,
                    "rules reloaded"
                ),
                Err(e) => tracing::warn!("rule reload failed, keeping current rules: {e}"),
            }
        }
    });
}

#[cfg(not(unix))]
fn watch_reload_signal(_rules: Arc<RuleStore>) {}
