//! Component E: the reverse proxy. Two code paths — non-POST
//! passthrough, and POST capture (spec.md §4.E) — plus the best-effort
//! raw-capture sidecar file (§4.E.1).

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::{Body as AxumBody, Bytes};
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use context_lens_core::{ContextInfo, Timings};
use context_lens_normalize::{classify_request, extract_source, parse_context, parse_raw, resolve_target_url, ApiFormat, Provider};
use context_lens_store::{ProxyResponse, Store, StoreRequestInput};
use http_body_util::BodyExt;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::captures::CaptureWriter;
use crate::config::Config;
use crate::metrics::Metrics;
use crate::upstream::{Body as UpstreamBody, UpstreamClient};

#[derive(Clone)]
pub struct ProxyState {
	pub store: Arc<Store>,
	pub client: UpstreamClient,
	pub config: Arc<Config>,
	pub metrics: Metrics,
	pub captures: Arc<CaptureWriter>,
}

/// Headers never forwarded verbatim: genuine hop-by-hop headers plus the
/// two proxy-internal ones (`host` is recomputed from the target,
/// `x-target-url` is context-lens's own override channel).
const STRIPPED_REQUEST_HEADERS: &[&str] =
	&["connection", "keep-alive", "proxy-authenticate", "proxy-authorization", "te", "trailers", "transfer-encoding", "upgrade", "host", "x-target-url"];

/// Path fragments that identify a utility endpoint forwarded without
/// capture (spec.md §4.E).
const UTILITY_PATH_MARKERS: &[&str] =
	&["/count_tokens", ":countTokens", ":loadCodeAssist", ":retrieveUserQuota", ":listExperiments", ":onboardUser", ":fetchAdminControls", ":recordCodeAssistMetrics"];

static MODEL_FROM_PATH_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"/models/([^/:]+)").unwrap());

fn is_utility_endpoint(path: &str) -> bool {
	UTILITY_PATH_MARKERS.iter().any(|marker| path.contains(marker))
}

fn strip_request_headers(headers: &HeaderMap) -> HeaderMap {
	let mut out = HeaderMap::with_capacity(headers.len());
	for (name, value) in headers {
		if STRIPPED_REQUEST_HEADERS.contains(&name.as_str()) {
			continue;
		}
		out.insert(name.clone(), value.clone());
	}
	out
}

fn captured_headers(headers: &HeaderMap) -> std::collections::BTreeMap<String, String> {
	headers.iter().map(|(k, v)| (k.as_str().to_string(), v.to_str().unwrap_or("").to_string())).collect()
}

/// Entry point registered for every method/path under the proxy router
/// (spec.md §4.E's two code paths share one handler; the method check is
/// the first branch).
pub async fn proxy_handler(
	State(state): State<ProxyState>,
	ConnectInfo(remote): ConnectInfo<std::net::SocketAddr>,
	method: Method,
	uri: Uri,
	headers: HeaderMap,
	body: AxumBody,
) -> Response {
	state.metrics.requests_total.inc();

	let path_and_query = uri.path_and_query().map(|p| p.as_str()).unwrap_or(uri.path()).to_string();

	if method != Method::POST {
		return passthrough(&state, &method, &path_and_query, &headers, body, remote.ip()).await;
	}

	let body_bytes = match collect_capped(body, state.config.max_body_bytes).await {
		Ok(bytes) => bytes,
		Err(_) => return (StatusCode::PAYLOAD_TOO_LARGE, "request body exceeds configured maximum").into_response(),
	};

	// Every POST path forwards to a resolved upstream target, never the
	// bare request path — classify + resolve once, up front, so the
	// non-JSON and utility-endpoint branches dial the same absolute
	// `https://…` target the capturable-JSON branch does (spec.md §4.E).
	let extraction = extract_source(&path_and_query);
	let (provider, api_format) = classify_request(&extraction.clean_path, &headers);
	let target_url = resolve_target_url(&path_and_query, &headers, &state.config.upstreams, Some(remote.ip()), state.config.allow_target_override, provider);

	match serde_json::from_slice::<Value>(&body_bytes) {
		Err(_) => {
			capture_non_json(&state, &target_url, &headers, &body_bytes);
			forward_and_stream(&state, &method, &target_url, &headers, body_bytes, remote.ip(), None).await
		},
		Ok(raw_body) => {
			if is_utility_endpoint(&path_and_query) {
				return forward_and_stream(&state, &method, &target_url, &headers, body_bytes, remote.ip(), None).await;
			}
			handle_capturable_post(&state, &method, provider, api_format, extraction.source, &target_url, &path_and_query, &headers, body_bytes, raw_body, remote.ip()).await
		},
	}
}

async fn collect_capped(body: AxumBody, max_bytes: u64) -> Result<Bytes, ()> {
	let collected = body.into_data_stream();
	use futures_util::StreamExt;
	let mut collected = collected;
	let mut buf = bytes::BytesMut::new();
	while let Some(chunk) = collected.next().await {
		let chunk = chunk.map_err(|_| ())?;
		if buf.len() as u64 + chunk.len() as u64 > max_bytes {
			return Err(());
		}
		buf.extend_from_slice(&chunk);
	}
	Ok(buf.freeze())
}

/// Non-JSON POST body: capture a `raw` [`ContextInfo`] (first 2,000
/// bytes as one message) and move on without waiting on the response
/// (spec.md §4.E). `target_url` is the already-resolved absolute
/// upstream URL, matching the `target_url` recorded by every other
/// capture path.
fn capture_non_json(state: &ProxyState, target_url: &str, headers: &HeaderMap, body_bytes: &Bytes) {
	let text = String::from_utf8_lossy(&body_bytes[..body_bytes.len().min(2_000)]).into_owned();
	let context = parse_raw(&text);
	let store = state.store.clone();
	let captures = state.captures.clone();
	let raw_body = Value::String(text.clone());
	let input = StoreRequestInput {
		context,
		response: ProxyResponse::Raw(String::new()),
		source: None,
		raw_body: raw_body.clone(),
		headers: captured_headers(headers),
		http_status: 0,
		timings: Timings::default(),
		request_bytes: body_bytes.len() as u64,
		response_bytes: 0,
		target_url: target_url.to_string(),
	};
	state.metrics.requests_captured_total.inc();
	tokio::spawn(async move {
		let entry = store.store_request(input).await;
		let meta = serde_json::json!({"source": entry.source, "conversationId": entry.conversation_id, "httpStatus": entry.http_status, "targetUrl": entry.target_url});
		captures.write_best_effort(entry.id, &entry.timestamp, &raw_body, &Value::Null, &meta).await;
	});
}

/// The normalize → forward → capture path for a JSON POST that isn't a
/// utility endpoint (spec.md §4.E). `provider`/`api_format`/`source`/
/// `target_url` are already resolved by the caller, which classifies
/// once for every POST branch.
#[allow(clippy::too_many_arguments)]
async fn handle_capturable_post(
	state: &ProxyState,
	method: &Method,
	provider: Provider,
	api_format: ApiFormat,
	source: Option<String>,
	target_url: &str,
	path_and_query: &str,
	headers: &HeaderMap,
	body_bytes: Bytes,
	raw_body: Value,
	remote: IpAddr,
) -> Response {
	let mut context = parse_context(provider, api_format, &raw_body);
	if context.model.is_empty() {
		if let Some(captures) = MODEL_FROM_PATH_RE.captures(path_and_query) {
			context.model = captures[1].to_string();
		}
	}

	forward_and_stream(state, method, target_url, headers, body_bytes, remote, Some((source, context, raw_body))).await
}

/// Issues the upstream request, tees the response body to the client
/// and to an in-memory accumulator (the "explicit task + channel" idiom,
/// spec.md §9), then — when `capture` is `Some` — builds the compact
/// response object and calls `store.store_request`.
async fn forward_and_stream(
	state: &ProxyState,
	method: &Method,
	target: &str,
	headers: &HeaderMap,
	body_bytes: Bytes,
	remote: IpAddr,
	capture: Option<(Option<String>, ContextInfo, Value)>,
) -> Response {
	let send_start = Instant::now();
	let mut upstream_headers = strip_request_headers(headers);
	let uri: Uri = match target.parse() {
		Ok(u) => u,
		Err(_) => return (StatusCode::BAD_GATEWAY, "invalid upstream target").into_response(),
	};
	if let Some(authority) = uri.authority() {
		if let Ok(value) = HeaderValue::from_str(authority.as_str()) {
			upstream_headers.insert(HeaderName::from_static("host"), value);
		}
	}
	upstream_headers.insert(axum::http::header::CONTENT_LENGTH, HeaderValue::from(body_bytes.len()));

	let mut builder = axum::http::Request::builder().method(method.clone()).uri(uri);
	for (name, value) in &upstream_headers {
		builder = builder.header(name, value);
	}
	let request = match builder.body(UpstreamBody::from(body_bytes.clone())) {
		Ok(req) => req,
		Err(_) => return (StatusCode::BAD_GATEWAY, "failed to build upstream request").into_response(),
	};

	let wait_start = Instant::now();
	let upstream_response = state.client.request(request).await;
	let send_ms = (wait_start - send_start).as_millis() as u64;

	let upstream_response = match upstream_response {
		Ok(resp) => resp,
		Err(err) => {
			state.metrics.upstream_errors_total.inc();
			tracing::warn!(error = %err, target, "upstream request failed");
			return (StatusCode::BAD_GATEWAY, serde_json::json!({"error": "upstream request failed", "details": err.to_string()}).to_string()).into_response();
		},
	};
	let wait_ms = wait_start.elapsed().as_millis() as u64;

	let status = upstream_response.status();
	let response_headers = upstream_response.headers().clone();
	let is_event_stream = response_headers.get(axum::http::header::CONTENT_TYPE).and_then(|v| v.to_str().ok()).is_some_and(|v| v.contains("text/event-stream"));

	let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(32);
	let (acc_tx, acc_rx) = tokio::sync::oneshot::channel::<Bytes>();

	let receive_start = Instant::now();
	tokio::spawn(async move {
		let mut body = upstream_response.into_body();
		let mut accumulated = bytes::BytesMut::new();
		loop {
			match body.frame().await {
				Some(Ok(frame)) => {
					if let Some(data) = frame.data_ref() {
						accumulated.extend_from_slice(data);
						if tx.send(Ok(data.clone())).await.is_err() {
							break;
						}
					}
				},
				Some(Err(err)) => {
					tracing::warn!(error = %err, "upstream body stream error");
					break;
				},
				None => break,
			}
		}
		let _ = acc_tx.send(accumulated.freeze());
	});

	let mut response_builder = Response::builder().status(status);
	for (name, value) in &response_headers {
		if STRIPPED_REQUEST_HEADERS.contains(&name.as_str()) {
			continue;
		}
		response_builder = response_builder.header(name, value);
	}
	let stream = tokio_stream::wrappers::ReceiverStream::new(rx);
	let response = response_builder.body(AxumBody::from_stream(stream)).unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response());

	if let Some((source, context, raw_body)) = capture {
		let store = state.store.clone();
		let captures = state.captures.clone();
		let request_bytes = body_bytes.len() as u64;
		let target_url = target.to_string();
		let headers_map = captured_headers(headers);
		state.metrics.requests_captured_total.inc();
		tokio::spawn(async move {
			let accumulated = acc_rx.await.unwrap_or_default();
			let receive_ms = receive_start.elapsed().as_millis() as u64;
			let response_bytes = accumulated.len() as u64;
			let proxy_response = build_proxy_response(&response_headers, is_event_stream, &accumulated);
			let response_json = match &proxy_response {
				ProxyResponse::Json(value) => value.clone(),
				ProxyResponse::Streaming { chunks } => serde_json::json!({"streaming": true, "chunks": chunks}),
				ProxyResponse::Raw(raw) => serde_json::json!({"raw": raw}),
			};
			let timings = Timings { send_ms, wait_ms, receive_ms, total_ms: send_ms + wait_ms + receive_ms };
			let input = StoreRequestInput {
				context,
				response: proxy_response,
				source,
				raw_body: raw_body.clone(),
				headers: headers_map,
				http_status: status.as_u16(),
				timings,
				request_bytes,
				response_bytes,
				target_url: target_url.clone(),
			};
			let entry = store.store_request(input).await;
			let meta =
				serde_json::json!({"source": entry.source, "conversationId": entry.conversation_id, "httpStatus": entry.http_status, "targetUrl": entry.target_url});
			captures.write_best_effort(entry.id, &entry.timestamp, &raw_body, &response_json, &meta).await;
		});
	}

	response
}

fn build_proxy_response(_headers: &HeaderMap, is_event_stream: bool, body: &Bytes) -> ProxyResponse {
	if is_event_stream {
		return ProxyResponse::Streaming { chunks: String::from_utf8_lossy(body).into_owned() };
	}
	match serde_json::from_slice::<Value>(body) {
		Ok(value) => ProxyResponse::Json(value),
		Err(_) => ProxyResponse::Raw(String::from_utf8_lossy(body).into_owned()),
	}
}

/// Non-POST passthrough: forward unchanged, relay bytes back, never
/// capture (spec.md §4.E).
async fn passthrough(state: &ProxyState, method: &Method, path_and_query: &str, headers: &HeaderMap, body: AxumBody, remote: IpAddr) -> Response {
	let body_bytes = match collect_capped(body, state.config.max_body_bytes).await {
		Ok(b) => b,
		Err(_) => return (StatusCode::PAYLOAD_TOO_LARGE, "request body exceeds configured maximum").into_response(),
	};
	let extraction = extract_source(path_and_query);
	let (provider, _) = classify_request(&extraction.clean_path, headers);
	let target_url = resolve_target_url(path_and_query, headers, &state.config.upstreams, Some(remote), state.config.allow_target_override, provider);
	forward_and_stream(state, method, &target_url, headers, body_bytes, remote, None).await
}
