//! HTTP transport: a Streamable HTTP reverse proxy.
//!
//! Grounded on the teacher's `gateway.rs` (axum `Router` + `TcpListener` +
//! `axum::serve` skeleton), repurposing `reqwest` from the teacher's
//! LLM-provider calls (`provider.rs`) to proxying a single upstream MCP
//! server. SSE relaying follows the `other_examples` Streamable-HTTP
//! pattern of treating the body as a line-oriented stream rather than
//! buffering it whole.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use futures::channel::mpsc;
use futures::{SinkExt, TryStreamExt};
use thiserror::Error;
use tokio::io::AsyncBufReadExt;
use tokio::time::timeout;
use tokio_util::io::StreamReader;

use crate::codec::{self, Kind};
use crate::handler::{MessageHandler, Outcome};

/// Ceiling on the reqwest client itself — spec.md §5's "upstream client
/// 5 min". `read_timeout`/`write_timeout`/`idle_timeout` all operate
/// within this budget.
const UPSTREAM_CLIENT_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct HttpProxyConfig {
    pub upstream_url: String,
    pub listen_addr: String,
    /// Bounds waiting for the upstream response headers, and reading a
    /// non-streaming upstream body in full. Never applied to an SSE body —
    /// that would kill a long-lived stream (spec.md §5/§9).
    pub read_timeout: Duration,
    /// Bounds the total lifetime of a relayed SSE stream (spec.md §5's
    /// "HTTP write 5 min, SSE-friendly").
    pub write_timeout: Duration,
    /// Bounds the gap between consecutive lines within an SSE stream.
    pub idle_timeout: Duration,
}

impl Default for HttpProxyConfig {
    fn default() -> Self {
        Self {
            upstream_url: String::new(),
            listen_addr: "127.0.0.1:0".to_string(),
            read_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(300),
            idle_timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Error)]
pub enum HttpProxyError {
    #[error("failed to build upstream HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
    #[error("failed to bind listen address: {0}")]
    Bind(#[source] std::io::Error),
    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

struct AppState {
    upstream: String,
    client: reqwest::Client,
    handler: Arc<MessageHandler>,
    read_timeout: Duration,
    write_timeout: Duration,
    idle_timeout: Duration,
}

/// Build the router for this proxy without binding a listener — useful for
/// tests that drive the app directly with `tower::ServiceExt::oneshot`.
pub fn router(config: HttpProxyConfig, handler: Arc<MessageHandler>) -> Result<Router, HttpProxyError> {
    let client = reqwest::Client::builder()
        .timeout(UPSTREAM_CLIENT_TIMEOUT)
        .build()
        .map_err(HttpProxyError::ClientBuild)?;
    let state = Arc::new(AppState {
        upstream: config.upstream_url,
        client,
        handler,
        read_timeout: config.read_timeout,
        write_timeout: config.write_timeout,
        idle_timeout: config.idle_timeout,
    });
    Ok(Router::new().fallback(any(dispatch)).with_state(state))
}

pub async fn serve(config: HttpProxyConfig, handler: Arc<MessageHandler>) -> Result<(), HttpProxyError> {
    let listen_addr = config.listen_addr.clone();
    let app = router(config, handler)?;
    let listener = tokio::net::TcpListener::bind(&listen_addr)
        .await
        .map_err(HttpProxyError::Bind)?;
    tracing::info!(
        "[AgentShield MCP-HTTP] listening on {}",
        listener.local_addr().map_err(HttpProxyError::Bind)?
    );
    axum::serve(listener, app).await.map_err(HttpProxyError::Serve)
}

async fn dispatch(
    State(state): State<Arc<AppState>>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match method {
        Method::POST => handle_post(state, headers, body).await,
        Method::GET | Method::DELETE => proxy_passthrough(state, method, headers, body).await,
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}

async fn handle_post(state: Arc<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let text = String::from_utf8_lossy(&body).into_owned();

    if let Ok((message, kind)) = codec::parse(&text) {
        let outcome = match kind {
            Kind::ToolsCall => Some(state.handler.handle_tools_call(&message)),
            Kind::ResourcesRead => Some(state.handler.handle_resources_read(&message)),
            _ => None,
        };
        if let Some(Outcome::Block { response }) = outcome {
            return (
                StatusCode::OK,
                [(axum::http::header::CONTENT_TYPE, "application/json")],
                response,
            )
                .into_response();
        }
    }

    proxy_passthrough(state, Method::POST, headers, body).await
}

async fn proxy_passthrough(state: Arc<AppState>, method: Method, headers: HeaderMap, body: Bytes) -> Response {
    let mut request = state.client.request(method, &state.upstream);
    for (name, value) in headers.iter() {
        if is_forwardable_header(name.as_str()) {
            request = request.header(name, value);
        }
    }
    if !body.is_empty() {
        request = request.body(body);
    }

    // `send()` resolves once the response headers arrive — it does not wait
    // for the body. Bounding it with `read_timeout` (rather than a
    // `RequestBuilder::timeout()`, which covers the whole response
    // including the body) keeps a long-lived SSE body from being killed
    // mid-stream by the same clock that bounds header latency.
    let upstream_response = match timeout(state.read_timeout, request.send()).await {
        Ok(Ok(resp)) => resp,
        Ok(Err(_)) | Err(_) => return StatusCode::BAD_GATEWAY.into_response(),
    };

    build_response(state, upstream_response).await
}

async fn build_response(state: Arc<AppState>, upstream: reqwest::Response) -> Response {
    let status = upstream.status();
    let is_sse = upstream
        .headers()
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("text/event-stream"))
        .unwrap_or(false);

    let mut response_headers = HeaderMap::new();
    for (name, value) in upstream.headers().iter() {
        if is_forwardable_header(name.as_str()) || name == axum::http::header::CONTENT_TYPE {
            response_headers.insert(name.clone(), value.clone());
        }
    }

    if is_sse {
        let body = relay_sse(upstream, Arc::clone(&state.handler), state.write_timeout, state.idle_timeout);
        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = response_headers;
        return response;
    }

    let bytes = match timeout(state.read_timeout, upstream.bytes()).await {
        Ok(Ok(b)) => b,
        Ok(Err(_)) | Err(_) => return StatusCode::BAD_GATEWAY.into_response(),
    };
    let text = String::from_utf8_lossy(&bytes).into_owned();
    let forwarded = state
        .handler
        .filter_tools_list_response(&text)
        .unwrap_or(text);

    let mut response = Response::new(Body::from(forwarded));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    response
}

/// Relay an upstream SSE body line-by-line, filtering `data:` frames that
/// carry a `tools/list` result. Flushes after every line. `idle_timeout`
/// bounds the gap between consecutive lines; `write_timeout` bounds the
/// stream's total lifetime — between them a healthy long-lived SSE session
/// is never killed early, but a stalled or runaway one is.
fn relay_sse(
    upstream: reqwest::Response,
    handler: Arc<MessageHandler>,
    write_timeout: Duration,
    idle_timeout: Duration,
) -> Body {
    let byte_stream = upstream
        .bytes_stream()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
    let mut reader = tokio::io::BufReader::new(StreamReader::new(byte_stream));

    let (mut tx, rx) = mpsc::channel::<Result<axum::body::Bytes, std::io::Error>>(16);

    tokio::spawn(async move {
        let relay = async {
            let mut line = String::new();
            loop {
                line.clear();
                let n = match timeout(idle_timeout, reader.read_line(&mut line)).await {
                    Ok(Ok(n)) => n,
                    Ok(Err(_)) | Err(_) => break,
                };
                if n == 0 {
                    break;
                }
                let out = if let Some(payload) = line.strip_prefix("data: ") {
                    let payload = payload.trim_end_matches(['\n', '\r']);
                    match handler.filter_tools_list_response(payload) {
                        Some(rewritten) => format!("data: {rewritten}\n"),
                        None => line.clone(),
                    }
                } else {
                    line.clone()
                };
                if tx.send(Ok(axum::body::Bytes::from(out))).await.is_err() {
                    break;
                }
            }
        };
        let _ = timeout(write_timeout, relay).await;
    });

    Body::from_stream(rx)
}

fn is_forwardable_header(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.starts_with("mcp-")
        || lower == "authorization"
        || lower == "accept"
        || lower == "content-type"
        || lower.starts_with("x-")
}
