//! Component I: the ingest + query API, grounded on the teacher's
//! `admin.rs` `App`/`router()` shape (one state struct, routes attached
//! via `.with_state`) and `sse.rs`'s `Sse`/broadcast pattern for
//! `/api/events`.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use context_lens_core::{Conversation, Timings};
use context_lens_normalize::parse_context;
use context_lens_store::{
	build_entries, build_session, export_jsonl, export_wrapped, trace_id_for, CapturedEntry, ChangeEvent, PrivacyLevel, ProxyResponse, Store,
	StoreRequestInput,
};
use futures_util::stream::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_stream::StreamExt as _;

#[derive(Clone)]
pub struct ApiState {
	pub store: Arc<Store>,
}

pub fn router(state: ApiState) -> Router {
	Router::new()
		.route("/api/ingest", post(ingest))
		.route("/api/requests", get(get_requests))
		.route("/api/conversations/{id}", get(get_conversation).delete(delete_conversation))
		.route("/api/conversations/{id}/tags", post(add_tag))
		.route("/api/conversations/{id}/tags/{tag}", delete(remove_tag))
		.route("/api/reset", post(reset_all))
		.route("/api/events", get(events))
		.route("/api/export/lhar", get(export_lhar_jsonl))
		.route("/api/export/lhar.json", get(export_lhar_json))
		.with_state(state)
}

#[derive(Debug, Deserialize)]
struct IngestBody {
	provider: Option<Value>,
	api_format: Option<Value>,
	source: Option<String>,
	body: Option<Value>,
	response: Option<Value>,
}

/// `POST /api/ingest`: runs the normalizer and store path identical to
/// the proxy, bypassing forwarding entirely — the entry point for an
/// external (mitmproxy-style) capture source (spec.md §4.I).
async fn ingest(State(state): State<ApiState>, Json(payload): Json<IngestBody>) -> Response {
	let provider = payload.provider.and_then(|v| serde_json::from_value(v).ok()).unwrap_or_default();
	let api_format = payload.api_format.and_then(|v| serde_json::from_value(v).ok()).unwrap_or_default();
	let raw_body = payload.body.unwrap_or(Value::Null);
	let context = parse_context(provider, api_format, &raw_body);

	let response = match payload.response {
		Some(value) if value.get("streaming").and_then(Value::as_bool) == Some(true) => {
			ProxyResponse::Streaming { chunks: value.get("chunks").and_then(Value::as_str).unwrap_or_default().to_string() }
		},
		Some(value) => match value.get("raw").and_then(Value::as_str) {
			Some(raw) => ProxyResponse::Raw(raw.to_string()),
			None => ProxyResponse::Json(value),
		},
		None => ProxyResponse::Raw(String::new()),
	};

	let input = StoreRequestInput {
		context,
		response,
		source: payload.source,
		raw_body,
		headers: BTreeMap::new(),
		http_status: 200,
		timings: Timings::default(),
		request_bytes: 0,
		response_bytes: 0,
		target_url: String::new(),
	};
	let entry = state.store.store_request(input).await;
	(StatusCode::CREATED, Json(entry)).into_response()
}

#[derive(Debug, Deserialize)]
struct RequestsQuery {
	#[serde(default)]
	summary: bool,
}

#[derive(Debug, Serialize)]
struct ConversationGroupFull {
	conversation: Conversation,
	entries: Vec<CapturedEntry>,
}

#[derive(Debug, Serialize)]
struct ConversationGroupSummary {
	conversation: Conversation,
	entry_count: usize,
	last_seen: Option<String>,
}

/// `GET /api/requests?summary=true|false`: every known conversation with
/// its entries, newest conversation first. Summary mode omits per-entry
/// detail (spec.md §4.I).
async fn get_requests(State(state): State<ApiState>, Query(query): Query<RequestsQuery>) -> Response {
	let conversations = state.store.get_conversations().await;
	let entries = state.store.get_captured_requests().await;

	let mut grouped: BTreeMap<String, Vec<CapturedEntry>> = BTreeMap::new();
	for entry in entries {
		if let Some(id) = &entry.conversation_id {
			grouped.entry(id.clone()).or_default().push(entry);
		}
	}

	let mut ordered: Vec<(&String, &Conversation)> = conversations.iter().collect();
	ordered.sort_by(|a, b| b.1.first_seen.cmp(&a.1.first_seen));

	if query.summary {
		let groups: Vec<ConversationGroupSummary> = ordered
			.into_iter()
			.map(|(id, conversation)| {
				let entries = grouped.get(id).cloned().unwrap_or_default();
				ConversationGroupSummary { conversation: conversation.clone(), entry_count: entries.len(), last_seen: entries.first().map(|e| e.timestamp.clone()) }
			})
			.collect();
		Json(groups).into_response()
	} else {
		let groups: Vec<ConversationGroupFull> = ordered
			.into_iter()
			.map(|(id, conversation)| ConversationGroupFull { conversation: conversation.clone(), entries: grouped.get(id).cloned().unwrap_or_default() })
			.collect();
		Json(groups).into_response()
	}
}

async fn get_conversation(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
	let conversations = state.store.get_conversations().await;
	let Some(conversation) = conversations.get(&id) else { return StatusCode::NOT_FOUND.into_response() };
	let entries = state.store.get_conversation_entries(&id).await;
	Json(ConversationGroupFull { conversation: conversation.clone(), entries }).into_response()
}

async fn delete_conversation(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
	if state.store.delete_conversation(&id).await {
		StatusCode::NO_CONTENT.into_response()
	} else {
		StatusCode::NOT_FOUND.into_response()
	}
}

#[derive(Debug, Deserialize)]
struct TagBody {
	tag: String,
}

async fn add_tag(State(state): State<ApiState>, Path(id): Path<String>, Json(body): Json<TagBody>) -> Response {
	match state.store.add_tag(&id, &body.tag).await {
		Ok(()) => StatusCode::NO_CONTENT.into_response(),
		Err(_) => StatusCode::NOT_FOUND.into_response(),
	}
}

async fn remove_tag(State(state): State<ApiState>, Path((id, tag)): Path<(String, String)>) -> Response {
	match state.store.remove_tag(&id, &tag).await {
		Ok(()) => StatusCode::NO_CONTENT.into_response(),
		Err(_) => StatusCode::NOT_FOUND.into_response(),
	}
}

async fn reset_all(State(state): State<ApiState>) -> Response {
	match state.store.reset_all().await {
		Ok(()) => StatusCode::NO_CONTENT.into_response(),
		Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
	}
}

/// `GET /api/events`: one `connected` event on open, then every
/// subsequent store change event (spec.md §4.I, §6's SSE grammar).
async fn events(State(state): State<ApiState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
	let revision = state.store.revision().await;
	let connected = futures::stream::once(async move {
		Ok(Event::default().data(serde_json::json!({"type": "connected", "revision": revision}).to_string()))
	});

	let rx = state.store.subscribe();
	let changes = tokio_stream::wrappers::BroadcastStream::new(rx).filter_map(|result| result.ok()).map(change_event_to_sse);

	Sse::new(connected.chain(changes)).keep_alive(KeepAlive::default())
}

fn change_event_to_sse(event: ChangeEvent) -> Result<Event, Infallible> {
	Ok(Event::default().data(serde_json::to_string(&event).unwrap_or_default()))
}

#[derive(Debug, Deserialize)]
struct ExportQuery {
	conversation: Option<String>,
	#[serde(default)]
	privacy: PrivacyLevel,
}

async fn collect_export(state: &ApiState, query: &ExportQuery) -> (Vec<context_lens_store::LharSession>, Vec<context_lens_store::LharEntry>) {
	let conversations = state.store.get_conversations().await;
	let ids: Vec<String> = match &query.conversation {
		Some(id) => vec![id.clone()],
		None => conversations.keys().cloned().collect(),
	};

	let mut sessions = Vec::new();
	let mut entries = Vec::new();
	for id in ids {
		let Some(conversation) = conversations.get(&id) else { continue };
		let mut conversation_entries = state.store.get_conversation_entries(&id).await;
		conversation_entries.sort_by(|a, b| (a.timestamp.as_str(), a.id).cmp(&(b.timestamp.as_str(), b.id)));
		let trace_id = trace_id_for(Some(&id));
		sessions.push(build_session(conversation, &trace_id));
		entries.extend(build_entries(&trace_id, &conversation_entries, query.privacy));
	}
	(sessions, entries)
}

async fn export_lhar_jsonl(State(state): State<ApiState>, Query(query): Query<ExportQuery>) -> Response {
	let (sessions, entries) = collect_export(&state, &query).await;
	(StatusCode::OK, [("content-type", "application/x-ndjson")], export_jsonl(&sessions, &entries)).into_response()
}

async fn export_lhar_json(State(state): State<ApiState>, Query(query): Query<ExportQuery>) -> Response {
	let (sessions, entries) = collect_export(&state, &query).await;
	Json(export_wrapped(&sessions, &entries)).into_response()
}

#[allow(dead_code)]
fn unused_keep_alive_interval() -> Duration {
	Duration::from_secs(15)
}
