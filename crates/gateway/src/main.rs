use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderValue, Method, StatusCode};
use axum::Json;
use clap::Parser;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::EnvFilter;

use sg_domain::config::{
    self, Config, ConfigSeverity, CorsConfig,
};
use sg_gateway::api;
use sg_gateway::cli::{Cli, Command, ConfigCommand, TokenCommand};
use sg_gateway::dispatch::Dispatcher;
use sg_gateway::limiter::FixedWindowLimiter;
use sg_gateway::mcp::session::SessionRegistry;
use sg_gateway::pool::KeyPool;
use sg_gateway::settings::SettingsCache;
use sg_gateway::state::AppState;
use sg_gateway::usage::UsageRecorder;
use sg_store::{FileStore, Store};
use sg_upstream::{BraveClient, TavilyClient};
use sg_vault::Vault;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            init_tracing();
            let config = sg_gateway::cli::load_config(&cli)?;
            run_server(Arc::new(config)).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let config = sg_gateway::cli::load_config(&cli)?;
            if !sg_gateway::cli::config::validate(&config) {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let config = sg_gateway::cli::load_config(&cli)?;
            sg_gateway::cli::config::show(&config);
            Ok(())
        }
        Some(Command::Token(TokenCommand::Generate {
            description,
            allowed_tools,
            rate_limit,
        })) => {
            let config = sg_gateway::cli::load_config(&cli)?;
            sg_gateway::cli::token::generate(
                &config,
                description.clone(),
                allowed_tools.clone(),
                *rate_limit,
            )
            .await?;
            Ok(())
        }
    }
}

/// Initialize structured JSON tracing (only for the `serve` command).
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,sg_gateway=debug")),
        )
        .json()
        .init();
}

/// Start the gateway server with the given configuration.
async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("searchgate starting");
    let addr = format!("{}:{}", config.server.host, config.server.port);

    // ── Config validation ────────────────────────────────────────────
    let mut issues = config.validate();
    issues.extend(config::check_required_env());
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    let errors: Vec<String> = issues
        .iter()
        .filter(|i| i.severity == ConfigSeverity::Error)
        .map(|i| i.to_string())
        .collect();
    if !errors.is_empty() {
        // Stay up so probes and clients see WHY requests fail, but serve
        // nothing else.
        return run_degraded(&addr, errors).await;
    }

    // ── Crypto vault (key material from env) ─────────────────────────
    let encryption_secret =
        std::env::var(config::ENCRYPTION_SECRET_ENV).unwrap_or_default();
    let vault = match Vault::from_secret(&encryption_secret) {
        Ok(vault) => Arc::new(vault),
        Err(e) => {
            return run_degraded(
                &addr,
                vec![format!("{}: {e}", config::ENCRYPTION_SECRET_ENV)],
            )
            .await
        }
    };
    tracing::info!("credential vault ready");

    // ── Admin token (read once, hash for constant-time comparison) ───
    let admin_token = std::env::var(config::ADMIN_TOKEN_ENV).unwrap_or_default();
    let admin_token_hash = Arc::new(sg_vault::sha256(admin_token.as_bytes()));

    // ── Usage-log HMAC key ───────────────────────────────────────────
    let usage_hmac_key = match std::env::var(config::USAGE_HASH_SECRET_ENV) {
        Ok(v) if !v.is_empty() => v.into_bytes(),
        // Derive from the encryption secret so query hashes stay stable
        // across restarts without another mandatory variable.
        _ => sg_vault::sha256(encryption_secret.as_bytes()).to_vec(),
    };

    // ── Store ────────────────────────────────────────────────────────
    let store: Arc<dyn Store> = Arc::new(
        FileStore::open(&config.data_dir)
            .with_context(|| format!("opening data dir {}", config.data_dir.display()))?,
    );

    // ── Upstream clients ─────────────────────────────────────────────
    let tavily = Arc::new(
        TavilyClient::new(&config.tavily.base_url, config.tavily.http_timeout_ms)
            .context("building tavily client")?,
    );
    let brave = Arc::new(
        BraveClient::new(&config.brave.base_url, config.brave.http_timeout_ms)
            .context("building brave client")?,
    );
    tracing::info!(
        tavily = %config.tavily.base_url,
        brave = %config.brave.base_url,
        "upstream clients ready"
    );

    // ── Key pool, settings cache, dispatcher ─────────────────────────
    let pool = Arc::new(KeyPool::new(
        store.clone(),
        vault.clone(),
        tavily.clone(),
        config.tavily.clone(),
    ));
    let settings = Arc::new(SettingsCache::new(store.clone(), &config));
    let dispatcher = Arc::new(Dispatcher::new(
        pool.clone(),
        settings.clone(),
        tavily,
        brave,
        config.tavily.clone(),
        config.brave.clone(),
    ));
    tracing::info!(
        brave_min_interval_ms = config.brave.min_interval_ms(),
        max_retries = config.tavily.max_retries,
        "dispatcher ready"
    );

    // ── Sessions & limiters ──────────────────────────────────────────
    let sessions = Arc::new(SessionRegistry::new(config.mcp.session_idle_ms));
    let global_limiter = Arc::new(FixedWindowLimiter::new(
        config.limits.global_per_minute,
        60_000,
    ));
    let token_limiter = Arc::new(FixedWindowLimiter::new(
        config.limits.per_token_per_minute,
        60_000,
    ));
    let usage = Arc::new(UsageRecorder::new(store.clone(), usage_hmac_key));
    tracing::info!(
        session_idle_ms = config.mcp.session_idle_ms,
        per_token_per_minute = config.limits.per_token_per_minute,
        global_per_minute = config.limits.global_per_minute,
        "session registry + limiters ready"
    );

    let state = AppState {
        config: config.clone(),
        store: store.clone(),
        vault,
        pool,
        settings,
        dispatcher,
        usage,
        sessions: sessions.clone(),
        global_limiter: global_limiter.clone(),
        token_limiter: token_limiter.clone(),
        admin_token_hash,
    };

    // ── Periodic GC: idle sessions + lapsed limiter windows ──────────
    {
        let sessions = sessions.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                interval.tick().await;
                sessions.prune_idle();
                global_limiter.prune();
                token_limiter.prune();
            }
        });
    }

    // ── CORS layer (config-aware) ────────────────────────────────────
    let cors_layer = build_cors_layer(&config.server.cors);

    // ── Concurrency limit (backpressure protection) ──────────────────
    let max_concurrent = std::env::var("SEARCHGATE_MAX_CONCURRENT_REQUESTS")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(256);
    tracing::info!(max_concurrent, "concurrency limit set");

    // ── Router ───────────────────────────────────────────────────────
    let app = api::router()
        .layer(cors_layer)
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_concurrent))
        .with_state(state.clone());

    // ── Bind ─────────────────────────────────────────────────────────
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    tracing::info!(addr = %addr, "searchgate listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("axum server error")?;

    // Orderly shutdown: persist the in-memory tables.
    state.store.flush().await.context("flushing store")?;
    tracing::info!("searchgate stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}

/// Serve `{error, detail}` with HTTP 500 on every route, `/health`
/// included, when the configuration is unusable.
async fn run_degraded(addr: &str, errors: Vec<String>) -> anyhow::Result<()> {
    let detail = errors.join("; ");
    tracing::error!(detail = %detail, "configuration invalid — serving error responses only");

    let app = axum::Router::new().fallback(move || {
        let detail = detail.clone();
        async move {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({
                    "error": "configuration error",
                    "detail": detail,
                })),
            )
        }
    });

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    axum::serve(listener, app)
        .await
        .context("axum server error")?;
    Ok(())
}

/// Build a [`CorsLayer`] from the configured allowed origins.
///
/// A literal `"*"` allows all origins. Origins may end in `:*` to match
/// any port on that host; the remainder after the prefix must be digits
/// only so `http://localhost:3000.evil.com` cannot sneak through.
fn build_cors_layer(cors: &CorsConfig) -> CorsLayer {
    use axum::http::header;

    let methods = [
        Method::GET,
        Method::POST,
        Method::PATCH,
        Method::DELETE,
        Method::OPTIONS,
    ];
    let headers = [header::CONTENT_TYPE, header::AUTHORIZATION];

    if cors.allowed_origins.len() == 1 && cors.allowed_origins[0] == "*" {
        tracing::warn!("CORS configured with wildcard \"*\" — all origins allowed");
        return CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods(methods)
            .allow_headers(headers);
    }

    let mut exact: Vec<HeaderValue> = Vec::new();
    let mut port_wildcards: Vec<String> = Vec::new();
    for origin in &cors.allowed_origins {
        if let Some(prefix) = origin.strip_suffix('*') {
            port_wildcards.push(prefix.to_owned());
        } else if let Ok(value) = origin.parse::<HeaderValue>() {
            exact.push(value);
        } else {
            tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
        }
    }

    let allow_origin = if port_wildcards.is_empty() {
        AllowOrigin::list(exact)
    } else {
        AllowOrigin::predicate(move |origin, _| {
            if exact.iter().any(|e| e.as_bytes() == origin.as_bytes()) {
                return true;
            }
            let origin = origin.to_str().unwrap_or("");
            port_wildcards.iter().any(|prefix| {
                origin
                    .strip_prefix(prefix.as_str())
                    .map(|port| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()))
                    .unwrap_or(false)
            })
        })
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(methods)
        .allow_headers(headers)
}
