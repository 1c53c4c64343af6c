mod render;

use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use darkmap_search::{parse_query, SearchEngine};

pub struct AppState {
    pub engine: SearchEngine,
    pub page_size: i64,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/search", get(search_redirect))
        .route("/stats", get(stats))
        .route("/domain/:address", get(domain_detail))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until the shutdown signal fires.
pub async fn serve(
    bind: String,
    state: Arc<AppState>,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(bind = %bind, "read api listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;
    Ok(())
}

/// 302 with a Location header.
fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

fn error_redirect(message: &str) -> Response {
    found(&format!("/?error={}", urlencoding::encode(message)))
}

#[derive(Deserialize)]
struct IndexParams {
    q: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
    error: Option<String>,
}

async fn index(
    State(state): State<Arc<AppState>>,
    Query(params): Query<IndexParams>,
) -> Response {
    let q = params.q.unwrap_or_default();
    let limit = params.limit.unwrap_or(state.page_size).clamp(1, 100);
    let offset = params.offset.unwrap_or(0).max(0);

    let query = parse_query(&q);
    let results = if query.is_empty() {
        Vec::new()
    } else {
        match state.engine.search(&query, limit, offset).await {
            Ok(results) => results,
            Err(e) => {
                error!(error = %e, "search failed");
                return (StatusCode::INTERNAL_SERVER_ERROR, "search failed").into_response();
            }
        }
    };

    Html(render::index_page(
        &q,
        &results,
        limit,
        offset,
        params.error.as_deref(),
    ))
    .into_response()
}

#[derive(Deserialize)]
struct SearchParams {
    q: Option<String>,
}

/// Normalizes and bounces to `/` so search results always live at one URL.
async fn search_redirect(Query(params): Query<SearchParams>) -> Response {
    let q = params.q.unwrap_or_default();
    let q = q.trim();
    if q.is_empty() {
        return found("/");
    }
    found(&format!("/?q={}", urlencoding::encode(q)))
}

async fn stats(State(state): State<Arc<AppState>>) -> Response {
    match state.engine.stats().await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => {
            error!(error = %e, "stats query failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "stats unavailable").into_response()
        }
    }
}

#[derive(Deserialize)]
struct DomainParams {
    links_page: Option<i64>,
}

async fn domain_detail(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
    Query(params): Query<DomainParams>,
) -> Response {
    let address = address.trim().to_ascii_lowercase();
    if !address.ends_with(".onion") {
        return error_redirect("domain must end in .onion");
    }

    let domain = match state.engine.get_domain(&address).await {
        Ok(Some(domain)) => domain,
        Ok(None) => return error_redirect("unknown domain"),
        Err(e) => {
            error!(error = %e, "domain lookup failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, "lookup failed").into_response();
        }
    };

    let links_page = params.links_page.unwrap_or(0).max(0);
    let page_size = state.page_size;
    let offset = links_page * page_size;

    let detail = tokio::try_join!(
        state.engine.pages_for_domain(&address, page_size),
        state.engine.open_ports_for_domain(&address),
        state.engine.findings_for_domain(&address),
        state.engine.incoming_links(&address, page_size, offset),
        state.engine.outgoing_links(&address, page_size, offset),
    );

    match detail {
        Ok((pages, open_ports, findings, incoming, outgoing)) => Html(render::domain_page(
            &domain,
            &pages,
            &open_ports,
            &findings,
            &incoming,
            &outgoing,
            links_page,
            page_size,
        ))
        .into_response(),
        Err(e) => {
            error!(error = %e, "domain detail queries failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "lookup failed").into_response()
        }
    }
}
