use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use axum::body::Body;
use axum::extract::{Query, RawQuery, State};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::{self, TraceLayer};
use tracing::Level;

use crate::authoring::author_batch;
use crate::config::Config;
use crate::error::{ResolverError, ResolverResult};
use crate::merge::upsert_entries;
use crate::metrics::MetricsState;
use crate::middleware::auth::data_entry_auth;
use crate::migrate_v2::{migrate_document, V2Document};
use crate::model::Entry;
use crate::negotiation::clean_header_list;
use crate::path_codec::{id_to_path, path_to_id};
use crate::resolver::{decompress_entry, resolve, resolve_compressed, ResolveContext, ResolveOutcome};
use crate::store::{DocumentStore, MemoryStore, SqliteStore};
use crate::toolkit::{build_toolkit, ToolkitAdapter};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RwLock<Config>>,
    pub metrics: Arc<MetricsState>,
    pub store: Arc<dyn DocumentStore>,
    pub toolkit: Arc<dyn ToolkitAdapter>,
}

pub async fn run_server(path: PathBuf) -> anyhow::Result<()> {
    let config = crate::config::load_config(&path)?;
    let state = build_state(config.clone())?;

    let resolver_app = build_resolver_app(state.clone());
    let data_entry_app = build_data_entry_app(state.clone());

    let resolver_addr: SocketAddr = config.global.listen.parse()?;
    let data_entry_addr: SocketAddr = config.global.data_entry_listen.parse()?;

    tracing::info!(%resolver_addr, "resolver listening");
    tracing::info!(%data_entry_addr, "data-entry listening");

    let resolver_listener = tokio::net::TcpListener::bind(resolver_addr).await?;
    let data_entry_listener = tokio::net::TcpListener::bind(data_entry_addr).await?;

    let resolver_fut = axum::serve(resolver_listener, resolver_app);
    let data_entry_fut = axum::serve(data_entry_listener, data_entry_app);

    tokio::try_join!(resolver_fut, data_entry_fut)?;
    Ok(())
}

pub fn build_state(config: Config) -> anyhow::Result<Arc<AppState>> {
    let store: Arc<dyn DocumentStore> = match config.store.backend {
        crate::config::StoreBackend::Memory => Arc::new(MemoryStore::new()),
        crate::config::StoreBackend::Sqlite => {
            let path = config.store.path.clone().unwrap_or_else(|| "resolver.sqlite3".to_string());
            Arc::new(SqliteStore::open(&path)?)
        }
    };
    let toolkit: Arc<dyn ToolkitAdapter> = Arc::from(build_toolkit(&config.toolkit));

    Ok(Arc::new(AppState {
        config: Arc::new(RwLock::new(config)),
        metrics: Arc::new(MetricsState::new()?),
        store,
        toolkit,
    }))
}

pub fn build_resolver_app(state: Arc<AppState>) -> Router {
    let metrics_config = state.config.read().unwrap().metrics.clone();

    let mut router = Router::new().route("/.well-known/gs1resolver", get(well_known_handler));
    if metrics_config.enabled {
        router = router.route(&metrics_config.path, get(metrics_handler));
    }

    router
        .route("/*path", get(resolve_handler).head(resolve_handler).options(resolve_options_handler))
        .layer(
            tower::ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(|request: &Request<Body>| {
                            let request_id = request
                                .extensions()
                                .get::<tower_http::request_id::RequestId>()
                                .map(|id| id.header_value().to_str().unwrap_or("unknown"))
                                .unwrap_or("unknown");
                            tracing::info_span!(
                                "request",
                                request_id = %request_id,
                                identifier = tracing::field::Empty,
                                document_id = tracing::field::Empty,
                                linktype = tracing::field::Empty,
                                method = %request.method(),
                                uri = %request.uri(),
                            )
                        })
                        .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
                ),
        )
        .with_state(state)
}

pub fn build_data_entry_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/new", post(new_batch_handler))
        .route("/api/new/single", post(new_single_handler))
        .route("/api/index", get(index_handler))
        .route("/api/migrate-v2", post(migrate_v2_handler))
        .route("/api/*path", put(put_handler).get(get_handler).delete(delete_handler))
        .layer(axum::middleware::from_fn_with_state(state.clone(), data_entry_auth))
        .layer(
            tower::ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TraceLayer::new_for_http().on_response(trace::DefaultOnResponse::new().level(Level::INFO))),
        )
        .with_state(state)
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.metrics.render() {
        Ok(body) => (StatusCode::OK, [("content-type", "text/plain; version=0.0.4")], body).into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

async fn well_known_handler(State(state): State<Arc<AppState>>) -> Response {
    let config = state.config.read().unwrap();
    let ids = state.store.list_ids().await.unwrap_or_default();
    let mut ai_codes: Vec<String> = ids
        .iter()
        .filter_map(|id| id.split('_').next().map(|s| s.to_string()))
        .collect();
    ai_codes.sort();
    ai_codes.dedup();
    let body = json!({
        "resolverRoot": format!("https://{}", config.global.fqdn),
        "supportedPrimaryKeys": ai_codes,
        "active": true,
    });
    Json(body).into_response()
}

#[derive(Debug, Deserialize)]
struct ResolveQuery {
    linktype: Option<String>,
    context: Option<String>,
    compress: Option<String>,
}

async fn resolve_options_handler() -> Response {
    Response::builder()
        .status(StatusCode::NO_CONTENT)
        .header("allow", "GET, HEAD, OPTIONS")
        .body(Body::empty())
        .unwrap()
}

async fn resolve_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ResolveQuery>,
    RawQuery(raw_query): RawQuery,
    headers: HeaderMap,
    req: Request<Body>,
) -> Response {
    match resolve_handler_inner(state, query, raw_query, headers, req.uri().path()).await {
        Ok(resp) => resp,
        Err(e) => e.into_response(),
    }
}

async fn resolve_handler_inner(
    state: Arc<AppState>,
    query: ResolveQuery,
    raw_query: Option<String>,
    headers: HeaderMap,
    raw_path: &str,
) -> ResolverResult<Response> {
    let full_path = raw_path.to_string();
    let (config, fqdn) = {
        let config = state.config.read().unwrap();
        (config.resolver.clone(), config.global.fqdn.clone())
    };

    if let Some(compress) = &query.compress {
        if compress.eq_ignore_ascii_case("true") {
            let compressed = match resolve_compressed(state.toolkit.as_ref(), &full_path).await {
                Ok(c) => c,
                Err(e) => {
                    state.metrics.resolver_errors_total.with_label_values(&[error_kind(&e)]).inc();
                    return Err(e);
                }
            };
            state.metrics.resolver_requests_total.with_label_values(&["compress", "200"]).inc();
            return Ok(Json(json!({ "compressedLink": compressed })).into_response());
        }
    }

    let (identifier, qualifier_path) = split_identifier_path(&full_path, state.toolkit.as_ref()).await?;

    let accept_languages = headers
        .get("accept-language")
        .and_then(|v| v.to_str().ok())
        .map(clean_header_list)
        .unwrap_or_default();
    let media_types = headers
        .get("accept")
        .and_then(|v| v.to_str().ok())
        .map(clean_header_list)
        .unwrap_or_default();

    let query_params = parse_query_params(raw_query.as_deref().unwrap_or(""));

    let ctx = ResolveContext {
        linktype: query.linktype.clone(),
        context: query.context.clone(),
        accept_languages,
        media_types,
        linkset_requested: false,
        query_params,
    };

    tracing::Span::current().record("identifier", &identifier.as_str());
    if let Ok(document_id) = path_to_id(&identifier) {
        tracing::Span::current().record("document_id", &document_id.as_str());
    }
    if let Some(lt) = &query.linktype {
        tracing::Span::current().record("linktype", &lt.as_str());
    }

    let outcome = match resolve(
        state.toolkit.as_ref(),
        &state.store,
        &identifier,
        qualifier_path.as_deref(),
        &ctx,
        &config,
        &fqdn,
    )
    .await
    {
        Ok(outcome) => outcome,
        Err(e) => {
            state.metrics.resolver_errors_total.with_label_values(&[error_kind(&e)]).inc();
            state.metrics.resolver_requests_total.with_label_values(&["resolve", &e_status(&e).to_string()]).inc();
            return Err(e);
        }
    };

    Ok(match outcome {
        ResolveOutcome::Redirect { location, link_header, negotiation_rule } => {
            state.metrics.negotiation_rules_hit_total.with_label_values(&[negotiation_rule]).inc();
            state.metrics.resolver_requests_total.with_label_values(&["resolve", "307"]).inc();
            Response::builder()
                .status(StatusCode::TEMPORARY_REDIRECT)
                .header("location", location)
                .header("link", link_header)
                .body(Body::empty())
                .unwrap()
        }
        ResolveOutcome::MultipleChoices { body, link_header, negotiation_rule } => {
            state.metrics.negotiation_rules_hit_total.with_label_values(&[negotiation_rule]).inc();
            state.metrics.resolver_requests_total.with_label_values(&["resolve", "300"]).inc();
            Response::builder()
                .status(StatusCode::MULTIPLE_CHOICES)
                .header("content-type", "application/json")
                .header("link", link_header)
                .body(Body::from(body.to_string()))
                .unwrap()
        }
        ResolveOutcome::Linkset { body, link_header } => {
            state.metrics.resolver_requests_total.with_label_values(&["resolve", "200"]).inc();
            Response::builder()
                .status(StatusCode::OK)
                .header("content-type", "application/linkset+json")
                .header("link", link_header)
                .body(Body::from(body.to_string()))
                .unwrap()
        }
    })
}

fn error_kind(e: &ResolverError) -> &'static str {
    match e {
        ResolverError::Validation(_) => "validation",
        ResolverError::NotFound(_) => "not_found",
        ResolverError::Conflict(_) => "conflict",
        ResolverError::StoreUnavailable(_) => "store_unavailable",
        ResolverError::Internal(_) => "internal",
    }
}

/// A non-conforming leading path (not an even run of 2-4 digit AI codes) is
/// treated as a compressed link (§4.9); otherwise the path is used as-is,
/// split into the primary `/ai/value` anchor and a qualifier-path tail.
async fn split_identifier_path(
    full_path: &str,
    toolkit: &dyn ToolkitAdapter,
) -> ResolverResult<(String, Option<String>)> {
    let segments: Vec<&str> = full_path.split('/').filter(|s| !s.is_empty()).collect();
    let looks_conforming = segments.len() >= 2
        && segments.len() % 2 == 0
        && (2..=4).contains(&segments[0].len())
        && segments[0].chars().all(|c| c.is_ascii_digit());

    if looks_conforming {
        let anchor = format!("/{}/{}", segments[0], segments[1]);
        let qualifier_path = if segments.len() > 2 {
            Some(format!("/{}", segments[2..].join("/")))
        } else {
            None
        };
        return Ok((anchor, qualifier_path));
    }

    decompress_entry(toolkit, full_path).await
}

fn parse_query_params(raw: &str) -> Vec<(String, String)> {
    raw.split('&')
        .filter(|s| !s.is_empty())
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next()?.to_string();
            let value = parts.next().unwrap_or("").to_string();
            Some((key, value))
        })
        .collect()
}

// --- Data-Entry handlers ---

async fn new_batch_handler(State(state): State<Arc<AppState>>, Json(entries): Json<Vec<Entry>>) -> Response {
    upsert_batch(state, entries).await
}

async fn new_single_handler(State(state): State<Arc<AppState>>, Json(entry): Json<Entry>) -> Response {
    upsert_batch(state, vec![entry]).await
}

#[derive(serde::Serialize)]
struct UpsertResult {
    id: String,
    status: u16,
    message: String,
}

async fn upsert_batch(state: Arc<AppState>, entries: Vec<Entry>) -> Response {
    let (authored, errors) = author_batch(&entries);

    let mut results: Vec<UpsertResult> = errors
        .into_iter()
        .map(|(anchor, err)| UpsertResult { id: anchor, status: 400, message: err.to_string() })
        .collect();

    for doc in authored {
        match upsert_entries(&state.store, doc).await {
            Ok((stored, status)) => {
                state.metrics.data_entry_upserts_total.with_label_values(&[&status.to_string()]).inc();
                results.push(UpsertResult { id: stored.id, status, message: "ok".to_string() });
            }
            Err(e) => {
                let status = e_status(&e);
                state.metrics.data_entry_upserts_total.with_label_values(&[&status.to_string()]).inc();
                results.push(UpsertResult { id: "unknown".to_string(), status, message: e.to_string() });
            }
        }
    }

    let overall = if results.iter().any(|r| r.status >= 400) {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::CREATED
    };
    (overall, Json(results)).into_response()
}

fn e_status(e: &ResolverError) -> u16 {
    match e {
        ResolverError::Validation(_) => 400,
        ResolverError::NotFound(_) => 404,
        ResolverError::Conflict(_) => 409,
        ResolverError::StoreUnavailable(_) => 503,
        ResolverError::Internal(_) => 500,
    }
}

async fn put_handler(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
) -> Response {
    let path = req.uri().path().trim_start_matches("/api").to_string();
    match put_inner(state, path, req).await {
        Ok(resp) => resp,
        Err(e) => e.into_response(),
    }
}

async fn put_inner(state: Arc<AppState>, path: String, req: Request<Body>) -> ResolverResult<Response> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.len() < 2 {
        return Err(ResolverError::Validation("path must be /api/{ai}/{value}".into()));
    }
    let prefix = format!("/{}/{}", segments[0], segments[1]);

    let bytes = axum::body::to_bytes(req.into_body(), 10 * 1024 * 1024)
        .await
        .map_err(|e| ResolverError::Validation(e.to_string()))?;
    let entries: Vec<Entry> = serde_json::from_slice(&bytes).map_err(|e| ResolverError::Validation(e.to_string()))?;

    for entry in &entries {
        let normalized_anchor = entry.anchor.trim_end_matches('/');
        if !normalized_anchor.starts_with(&prefix) {
            return Err(ResolverError::Validation(format!(
                "entry anchor {} does not match path {prefix}",
                entry.anchor
            )));
        }
    }

    Ok(upsert_batch(state, entries).await)
}

async fn get_handler(State(state): State<Arc<AppState>>, req: Request<Body>) -> Response {
    let path = req.uri().path().trim_start_matches("/api").to_string();
    match get_inner(state, path).await {
        Ok(resp) => resp,
        Err(e) => e.into_response(),
    }
}

async fn get_inner(state: Arc<AppState>, path: String) -> ResolverResult<Response> {
    let id = path_to_id(&path)?;
    let doc = state
        .store
        .get(&id)
        .await?
        .ok_or_else(|| ResolverError::NotFound(format!("no document for {path}")))?;
    Ok(Json(doc.value).into_response())
}

async fn delete_handler(State(state): State<Arc<AppState>>, req: Request<Body>) -> Response {
    let path = req.uri().path().trim_start_matches("/api").to_string();
    match delete_inner(state, path).await {
        Ok(resp) => resp,
        Err(e) => e.into_response(),
    }
}

async fn delete_inner(state: Arc<AppState>, path: String) -> ResolverResult<Response> {
    let id = path_to_id(&path)?;
    let deleted = state.store.delete(&id).await?;
    if deleted {
        Ok(StatusCode::NO_CONTENT.into_response())
    } else {
        Err(ResolverError::NotFound(format!("no document for {path}")))
    }
}

async fn index_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.store.list_ids().await {
        Ok(ids) => {
            let paths: Vec<String> = ids.iter().map(|id| id_to_path(id)).collect();
            Json(paths).into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// §6: the HTTP migration endpoint transforms only, it never persists.
async fn migrate_v2_handler(Json(docs): Json<Vec<V2Document>>) -> Response {
    let entries: Vec<Entry> = docs.iter().map(migrate_document).collect();
    Json(entries).into_response()
}
