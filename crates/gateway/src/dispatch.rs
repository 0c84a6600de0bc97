//! Tool-call dispatcher: source-mode routing, key retry, parallel
//! combined fanout, and the interleaved deduplicating merge.
//!
//! Tool-level failures come back as `Err(String)` payloads that the MCP
//! layer renders as `isError` results; only internal faults (store
//! breakage) escape as hard errors.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use sg_domain::config::{BraveConfig, OverflowPolicy, TavilyConfig};
use sg_domain::error::{Error, Result, UpstreamErrorKind};
use sg_domain::model::{CallOutcome, Provider, SourceMode};
use sg_upstream::{BraveClient, TavilyClient};

use crate::pool::KeyPool;
use crate::rate_gate::RateGate;
use crate::settings::SettingsCache;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool calls
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One logical tool invocation, tagged by tool.
#[derive(Debug, Clone)]
pub enum ToolCall {
    Search(Value),
    Extract(Value),
    Crawl(Value),
    Map(Value),
    Research(Value),
    BraveWeb(Value),
    BraveLocal(Value),
}

impl ToolCall {
    pub fn parse(tool: &str, args: Value) -> Option<Self> {
        match tool {
            "tavily_search" => Some(ToolCall::Search(args)),
            "tavily_extract" => Some(ToolCall::Extract(args)),
            "tavily_crawl" => Some(ToolCall::Crawl(args)),
            "tavily_map" => Some(ToolCall::Map(args)),
            "tavily_research" => Some(ToolCall::Research(args)),
            "brave_web_search" => Some(ToolCall::BraveWeb(args)),
            "brave_local_search" => Some(ToolCall::BraveLocal(args)),
            _ => None,
        }
    }

    pub fn tool_name(&self) -> &'static str {
        match self {
            ToolCall::Search(_) => "tavily_search",
            ToolCall::Extract(_) => "tavily_extract",
            ToolCall::Crawl(_) => "tavily_crawl",
            ToolCall::Map(_) => "tavily_map",
            ToolCall::Research(_) => "tavily_research",
            ToolCall::BraveWeb(_) => "brave_web_search",
            ToolCall::BraveLocal(_) => "brave_local_search",
        }
    }

    pub fn args(&self) -> &Value {
        match self {
            ToolCall::Search(a)
            | ToolCall::Extract(a)
            | ToolCall::Crawl(a)
            | ToolCall::Map(a)
            | ToolCall::Research(a)
            | ToolCall::BraveWeb(a)
            | ToolCall::BraveLocal(a) => a,
        }
    }

    /// The query text, under whichever name the tool's schema uses.
    pub fn query(&self) -> Option<&str> {
        let args = self.args();
        args.get("query")
            .or_else(|| args.get("q"))
            .and_then(Value::as_str)
    }

    /// Whether the call is routed by the search source mode. Extract,
    /// crawl, map, and research are Tavily-only capabilities.
    fn is_search_shaped(&self) -> bool {
        matches!(
            self,
            ToolCall::Search(_) | ToolCall::BraveWeb(_) | ToolCall::BraveLocal(_)
        )
    }

    fn offset(&self) -> u64 {
        self.args()
            .get("offset")
            .and_then(Value::as_u64)
            .unwrap_or(0)
    }

    fn count(&self) -> usize {
        self.args()
            .get("count")
            .or_else(|| self.args().get("max_results"))
            .and_then(Value::as_u64)
            .unwrap_or(10) as usize
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outcome
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One provider touch during a dispatch, for usage accounting.
#[derive(Debug, Clone)]
pub struct ProviderUse {
    pub provider: Provider,
    pub key_id: Option<String>,
    pub outcome: CallOutcome,
    pub error: Option<String>,
}

impl ProviderUse {
    fn success(provider: Provider, key_id: &str) -> Self {
        Self {
            provider,
            key_id: Some(key_id.to_string()),
            outcome: CallOutcome::Success,
            error: None,
        }
    }

    fn failure(provider: Provider, key_id: Option<&str>, error: &Error) -> Self {
        Self {
            provider,
            key_id: key_id.map(str::to_string),
            outcome: CallOutcome::Error,
            error: Some(error.to_string()),
        }
    }
}

/// Dispatch result: the tool payload (or tool-level error text) plus the
/// provider touches to account for.
pub struct Dispatched {
    pub payload: std::result::Result<Value, String>,
    pub uses: Vec<ProviderUse>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dispatcher
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Dispatcher {
    pool: Arc<KeyPool>,
    settings: Arc<SettingsCache>,
    tavily: Arc<TavilyClient>,
    brave: Arc<BraveClient>,
    brave_gate: RateGate,
    tavily_cfg: TavilyConfig,
    brave_cfg: BraveConfig,
}

impl Dispatcher {
    pub fn new(
        pool: Arc<KeyPool>,
        settings: Arc<SettingsCache>,
        tavily: Arc<TavilyClient>,
        brave: Arc<BraveClient>,
        tavily_cfg: TavilyConfig,
        brave_cfg: BraveConfig,
    ) -> Self {
        Self {
            pool,
            settings,
            tavily,
            brave,
            brave_gate: RateGate::new(brave_cfg.min_interval_ms()),
            tavily_cfg,
            brave_cfg,
        }
    }

    /// Route one tool call per the current source mode.
    pub async fn dispatch(&self, call: &ToolCall) -> Result<Dispatched> {
        if !call.is_search_shaped() {
            let (result, uses) = self.call_tavily(call).await;
            return Ok(Dispatched {
                payload: result.map_err(|e| e.to_string()),
                uses,
            });
        }

        let mode = self.settings.source_mode().await;
        match mode {
            SourceMode::TavilyOnly => {
                let (result, uses) = self.call_tavily(call).await;
                Ok(Dispatched {
                    payload: result.map_err(|e| e.to_string()),
                    uses,
                })
            }
            SourceMode::BraveOnly => {
                if !self.pool.has_active_brave_key().await? {
                    return Ok(Dispatched {
                        payload: Err("source_unavailable: no active brave keys".into()),
                        uses: Vec::new(),
                    });
                }
                let (result, uses) = self.call_brave(call).await;
                Ok(Dispatched {
                    payload: result.map_err(|e| e.to_string()),
                    uses,
                })
            }
            SourceMode::Combined => Ok(self.call_combined(call).await),
            SourceMode::BravePreferTavilyFallback => Ok(self.call_brave_with_fallback(call).await),
        }
    }

    // ── Tavily path with key retry ──────────────────────────────────

    /// Call Tavily, rotating to another key on auth or rate-limit
    /// failures, bounded by the retry budget. Each iteration classifies
    /// the failure and mutates key state before deciding to continue.
    async fn call_tavily(&self, call: &ToolCall) -> (Result<Value>, Vec<ProviderUse>) {
        let strategy = self.settings.selection_strategy().await;
        let mut uses = Vec::new();
        let mut retries = 0;

        loop {
            let key = match self.pool.select_tavily(strategy).await {
                Ok(key) => key,
                Err(e) => {
                    uses.push(ProviderUse::failure(Provider::Tavily, None, &e));
                    return (Err(e), uses);
                }
            };

            match self.exec_tavily(call, &key.secret).await {
                Ok(value) => {
                    self.pool.record_tavily_success(&key.id).await;
                    uses.push(ProviderUse::success(Provider::Tavily, &key.id));
                    return (Ok(value), uses);
                }
                Err(e) => {
                    let kind = e.upstream_kind().unwrap_or(UpstreamErrorKind::ProviderError);
                    self.pool.record_tavily_failure(&key.id, kind).await;
                    uses.push(ProviderUse::failure(Provider::Tavily, Some(&key.id), &e));

                    let retryable = matches!(
                        kind,
                        UpstreamErrorKind::AuthFailed | UpstreamErrorKind::RateLimited
                    );
                    if retryable && retries < self.tavily_cfg.max_retries {
                        retries += 1;
                        tracing::info!(
                            key_id = %key.id,
                            attempt = retries,
                            kind = %kind,
                            "rotating to another tavily key"
                        );
                        continue;
                    }
                    return (Err(e), uses);
                }
            }
        }
    }

    /// Execute a call against Tavily. Brave-shaped calls are translated
    /// to Tavily search and the response mapped back to the Brave result
    /// shape.
    async fn exec_tavily(&self, call: &ToolCall, secret: &str) -> Result<Value> {
        match call {
            ToolCall::Search(args) => self.tavily.search(secret, args).await,
            ToolCall::Extract(args) => self.tavily.extract(secret, args).await,
            ToolCall::Crawl(args) => self.tavily.crawl(secret, args).await,
            ToolCall::Map(args) => self.tavily.map(secret, args).await,
            ToolCall::Research(args) => self.tavily.research(secret, args).await,
            ToolCall::BraveWeb(args) | ToolCall::BraveLocal(args) => {
                let body = brave_args_to_tavily(args);
                let value = self.tavily.search(secret, &body).await?;
                Ok(to_brave_shape(&tavily_hits(&value)))
            }
        }
    }

    // ── Brave path through the rate gate ────────────────────────────

    async fn call_brave(&self, call: &ToolCall) -> (Result<Value>, Vec<ProviderUse>) {
        let mut uses = Vec::new();
        let mut retries = 0;

        loop {
            let key = match self.pool.select_brave().await {
                Ok(key) => key,
                Err(e) => {
                    uses.push(ProviderUse::failure(Provider::Brave, None, &e));
                    return (Err(e), uses);
                }
            };

            let max_wait = Some(Duration::from_millis(self.brave_cfg.max_queue_ms));
            let result = self
                .brave_gate
                .run(max_wait, || self.exec_brave(call, &key.secret))
                .await;

            match result {
                Ok(value) => {
                    self.pool.record_brave_success(&key.id).await;
                    uses.push(ProviderUse::success(Provider::Brave, &key.id));
                    return (Ok(value), uses);
                }
                Err(e @ Error::RateGateTimeout { .. }) => {
                    // Queue overflow is a gate condition, not a key fault:
                    // no state transition, no rotation.
                    uses.push(ProviderUse::failure(Provider::Brave, Some(&key.id), &e));
                    return (Err(e), uses);
                }
                Err(e) => {
                    let kind = e.upstream_kind().unwrap_or(UpstreamErrorKind::ProviderError);
                    self.pool.record_brave_failure(&key.id, kind).await;
                    uses.push(ProviderUse::failure(Provider::Brave, Some(&key.id), &e));

                    if kind == UpstreamErrorKind::AuthFailed && retries < self.tavily_cfg.max_retries
                    {
                        retries += 1;
                        continue;
                    }
                    return (Err(e), uses);
                }
            }
        }
    }

    /// Execute a call against Brave. `tavily_search` routed here is
    /// translated to the Brave parameter names and the response mapped to
    /// the Tavily result shape.
    async fn exec_brave(&self, call: &ToolCall, secret: &str) -> Result<Value> {
        match call {
            ToolCall::BraveWeb(args) => self.brave.web_search(secret, args).await,
            ToolCall::BraveLocal(args) => self.brave.local_search(secret, args).await,
            ToolCall::Search(args) => {
                let params = tavily_args_to_brave(args);
                let value = self.brave.web_search(secret, &params).await?;
                Ok(to_tavily_shape(&brave_hits(&value)))
            }
            // Tavily-only capabilities never route here.
            other => Err(Error::Other(format!(
                "{} cannot be served by brave",
                other.tool_name()
            ))),
        }
    }

    // ── Combined fanout ─────────────────────────────────────────────

    /// Call both providers in parallel and interleave the merged results.
    /// With `offset > 0` only Brave runs (Tavily has no offset paging).
    async fn call_combined(&self, call: &ToolCall) -> Dispatched {
        if call.offset() > 0 {
            let (result, uses) = self.call_brave(call).await;
            return Dispatched {
                payload: result.map_err(|e| e.to_string()),
                uses,
            };
        }

        // Settle semantics: each side resolves to ok|err independently;
        // neither cancels the other.
        let (tavily_side, brave_side) =
            tokio::join!(self.call_tavily_for_merge(call), self.call_brave(call));
        let (tavily_result, mut uses) = tavily_side;
        let (brave_result, brave_uses) = brave_side;
        uses.extend(brave_uses);

        let tavily_ok = tavily_result.as_ref().ok().map(|v| tavily_hits_any(v));
        let brave_ok = brave_result.as_ref().ok().map(|v| brave_hits(v));

        let payload = match (tavily_ok, brave_ok) {
            (None, None) => Err("both sources failed".to_string()),
            (a, b) => {
                let merged = merge_interleaved(
                    a.unwrap_or_default(),
                    b.unwrap_or_default(),
                    call.count(),
                );
                Ok(json!({ "results": merged }))
            }
        };
        Dispatched { payload, uses }
    }

    /// Tavily side of a combined call: always a plain search, whatever
    /// shape the requested tool was.
    async fn call_tavily_for_merge(&self, call: &ToolCall) -> (Result<Value>, Vec<ProviderUse>) {
        let search = match call {
            ToolCall::Search(args) => ToolCall::Search(args.clone()),
            other => ToolCall::Search(brave_args_to_tavily(other.args())),
        };
        self.call_tavily(&search).await
    }

    // ── Brave-first with Tavily fallback ────────────────────────────

    async fn call_brave_with_fallback(&self, call: &ToolCall) -> Dispatched {
        let (brave_result, mut uses) = self.call_brave(call).await;
        match brave_result {
            Ok(value) => Dispatched {
                payload: Ok(value),
                uses,
            },
            Err(e) => {
                let fallback_allowed = match &e {
                    Error::RateGateTimeout { .. } => {
                        self.brave_cfg.overflow == OverflowPolicy::FallbackToTavily
                    }
                    // Key exhaustion and upstream failures always fall back.
                    Error::NoActiveKeys { .. } | Error::Upstream { .. } => true,
                    Error::Timeout(_) | Error::Http(_) => true,
                    _ => false,
                };
                if !fallback_allowed {
                    return Dispatched {
                        payload: Err(e.to_string()),
                        uses,
                    };
                }
                tracing::info!(error = %e, tool = call.tool_name(), "brave failed, falling back to tavily");
                let (tavily_result, tavily_uses) = self.call_tavily(call).await;
                uses.extend(tavily_uses);
                Dispatched {
                    payload: tavily_result.map_err(|e| e.to_string()),
                    uses,
                }
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Result shaping & merge
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Translate Brave search arguments (`q`, `count`) into a Tavily search
/// body. Brave's `offset` has no Tavily equivalent and is dropped.
fn brave_args_to_tavily(args: &Value) -> Value {
    let query = args
        .get("q")
        .or_else(|| args.get("query"))
        .cloned()
        .unwrap_or(Value::String(String::new()));
    let max_results = args.get("count").cloned().unwrap_or(json!(10));
    json!({ "query": query, "max_results": max_results })
}

/// Translate Tavily search arguments (`query`, `max_results`) into Brave
/// query parameters.
fn tavily_args_to_brave(args: &Value) -> Value {
    let q = args
        .get("query")
        .or_else(|| args.get("q"))
        .cloned()
        .unwrap_or(Value::String(String::new()));
    let count = args.get("max_results").cloned().unwrap_or(json!(10));
    json!({ "q": q, "count": count })
}

/// A normalised search hit used for cross-provider merging.
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    pub title: String,
    pub url: String,
    pub description: String,
}

fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Hits from a native Tavily search response (`results[].content` maps to
/// `description`).
pub fn tavily_hits(value: &Value) -> Vec<Hit> {
    let Some(results) = value.get("results").and_then(Value::as_array) else {
        return Vec::new();
    };
    results
        .iter()
        .map(|r| Hit {
            title: str_field(r, "title"),
            url: str_field(r, "url"),
            description: str_field(r, "content"),
        })
        .collect()
}

/// Tavily hits, tolerating a response already mapped to the Brave shape.
fn tavily_hits_any(value: &Value) -> Vec<Hit> {
    let native = tavily_hits(value);
    if native.is_empty() {
        brave_hits(value)
    } else {
        native
    }
}

/// Hits from a Brave response: web results plus location results, which
/// use `name`/`website` and `snippet` fallbacks.
pub fn brave_hits(value: &Value) -> Vec<Hit> {
    let mut hits = Vec::new();

    if let Some(results) = value
        .pointer("/web/results")
        .and_then(Value::as_array)
    {
        for r in results {
            let description = {
                let d = str_field(r, "description");
                if d.is_empty() {
                    str_field(r, "snippet")
                } else {
                    d
                }
            };
            hits.push(Hit {
                title: str_field(r, "title"),
                url: str_field(r, "url"),
                description,
            });
        }
    }

    if let Some(results) = value
        .pointer("/locations/results")
        .and_then(Value::as_array)
    {
        for r in results {
            hits.push(Hit {
                title: str_field(r, "name"),
                url: str_field(r, "website"),
                description: str_field(r, "snippet"),
            });
        }
    }

    hits
}

fn hit_to_json(hit: &Hit) -> Value {
    json!({
        "title": hit.title,
        "url": hit.url,
        "description": hit.description,
    })
}

/// Render hits in the Brave web-search result shape.
pub fn to_brave_shape(hits: &[Hit]) -> Value {
    json!({
        "web": { "results": hits.iter().map(hit_to_json).collect::<Vec<_>>() }
    })
}

/// Render hits in the Tavily search result shape.
pub fn to_tavily_shape(hits: &[Hit]) -> Value {
    let results: Vec<Value> = hits
        .iter()
        .map(|h| {
            json!({
                "title": h.title,
                "url": h.url,
                "content": h.description,
            })
        })
        .collect();
    json!({ "results": results })
}

/// Interleave two hit lists, deduplicating by URL with the first list
/// taking precedence, truncated to `count`.
pub fn merge_interleaved(a: Vec<Hit>, b: Vec<Hit>, count: usize) -> Vec<Value> {
    let mut seen = std::collections::HashSet::new();
    let mut merged = Vec::new();

    for i in 0..a.len().max(b.len()) {
        for side in [a.get(i), b.get(i)] {
            let Some(hit) = side else { continue };
            if hit.url.is_empty() || !seen.insert(hit.url.clone()) {
                continue;
            }
            merged.push(hit_to_json(hit));
        }
    }

    merged.truncate(count);
    merged
}
