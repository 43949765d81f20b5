//! The store (component F): the single-writer, in-memory index of
//! conversations and entries, backed by the append-only JSONL state
//! file. `storeRequest` is the 11-step sequence spec.md §4.F describes;
//! everything else is a read or an explicit mutation taken under the
//! same lock.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::path::PathBuf;

use context_lens_audit::{compute_composition, compute_health, normalize_composition, scan_messages};
use context_lens_conversation::{assign, detect_source_tool, FingerprintInputs, ResponseChainCache};
use context_lens_core::{ContentBlock, ContextInfo, Conversation, EntryIdAllocator, ParsedUsage, Timings};
use context_lens_normalize::{parse_non_streaming_usage, parse_streaming_usage, rescale_context_tokens};
use http::HeaderMap;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, Mutex};

use crate::entry::{redact_headers, CapturedEntry, ResponseSummary, DEFAULT_MAX_COMPACTED_MESSAGES};
use crate::error::StoreError;
use crate::jsonl::{load_state_file, replay_tags, JsonlAppender, StateLine, TagAction, TagEvent};

/// Tuning knobs a deployment passes at startup (spec.md §6's env-var
/// surface feeds these).
#[derive(Debug, Clone)]
pub struct StoreConfig {
	pub state_path: PathBuf,
	pub tags_path: PathBuf,
	pub max_sessions: usize,
	pub max_compacted_messages: usize,
}

impl Default for StoreConfig {
	fn default() -> Self {
		Self {
			state_path: PathBuf::from("state.jsonl"),
			tags_path: PathBuf::from("tags.jsonl"),
			max_sessions: 200,
			max_compacted_messages: DEFAULT_MAX_COMPACTED_MESSAGES,
		}
	}
}

/// The captured upstream response, in whichever of the three shapes the
/// proxy (or ingest endpoint) settled on (spec.md §4.E).
#[derive(Debug, Clone)]
pub enum ProxyResponse {
	Json(Value),
	Streaming { chunks: String },
	Raw(String),
}

/// Everything the caller (the proxy path or `/api/ingest`) gathers for
/// one request/response pair.
pub struct StoreRequestInput {
	pub context: ContextInfo,
	pub response: ProxyResponse,
	pub source: Option<String>,
	pub raw_body: Value,
	pub headers: BTreeMap<String, String>,
	pub http_status: u16,
	pub timings: Timings,
	pub request_bytes: u64,
	pub response_bytes: u64,
	pub target_url: String,
}

/// A store mutation, broadcast to every `/api/events` subscriber after
/// it commits (spec.md §6's SSE grammar, minus the `connected` variant
/// which the API layer synthesizes per-subscriber).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ChangeEvent {
	EntryAdded { revision: u64, conversation_id: Option<String> },
	ConversationDeleted { revision: u64, conversation_id: String },
	Reset { revision: u64 },
	TagsUpdated { revision: u64, conversation_id: String },
}

impl ChangeEvent {
	pub fn revision(&self) -> u64 {
		match self {
			ChangeEvent::EntryAdded { revision, .. }
			| ChangeEvent::ConversationDeleted { revision, .. }
			| ChangeEvent::Reset { revision }
			| ChangeEvent::TagsUpdated { revision, .. } => *revision,
		}
	}
}

fn derive_response(response: &ProxyResponse) -> (ParsedUsage, ResponseSummary) {
	match response {
		ProxyResponse::Json(value) => {
			let usage = parse_non_streaming_usage(value);
			let summary = ResponseSummary {
				model: usage.model.clone(),
				stop_reason: usage.finish_reasons.first().cloned(),
				usage: Some(usage.clone()),
				streaming: false,
			};
			(usage, summary)
		},
		ProxyResponse::Streaming { chunks } => {
			let usage = parse_streaming_usage(chunks);
			let summary = ResponseSummary {
				model: usage.model.clone(),
				stop_reason: usage.finish_reasons.first().cloned(),
				usage: Some(usage.clone()),
				streaming: true,
			};
			(usage, summary)
		},
		ProxyResponse::Raw(_) => (ParsedUsage::default(), ResponseSummary { model: None, stop_reason: None, usage: None, streaming: false }),
	}
}

/// An authoritative prompt-side total from usage, when the response
/// reported one — used to rescale the estimator's token counts (spec.md
/// §4.C). Output/thinking tokens aren't part of the *context window*,
/// so only input + cache tokens feed the rescale.
fn authoritative_prompt_total(usage: &ParsedUsage) -> Option<u32> {
	let input = usage.input_tokens?;
	Some(input + usage.cache_read_tokens.unwrap_or(0) + usage.cache_write_tokens.unwrap_or(0))
}

fn collect_tool_names(context: &ContextInfo, names: &mut HashSet<String>) {
	for message in &context.messages {
		let Some(blocks) = &message.content_blocks else { continue };
		collect_from_blocks(blocks, names);
	}
}

fn collect_from_blocks(blocks: &[ContentBlock], names: &mut HashSet<String>) {
	for block in blocks {
		match block {
			ContentBlock::ToolUse { name, .. } => {
				names.insert(name.clone());
			},
			ContentBlock::ToolResult { content, .. } => collect_from_blocks(content, names),
			_ => {},
		}
	}
}

struct StoreInner {
	config: StoreConfig,
	conversations: BTreeMap<String, Conversation>,
	conversation_order: VecDeque<String>,
	entries: VecDeque<CapturedEntry>,
	id_alloc: EntryIdAllocator,
	response_chain: ResponseChainCache,
	revision: u64,
	appender: JsonlAppender,
	tags_appender: JsonlAppender,
}

impl StoreInner {
	fn entries_for<'a>(&'a self, conversation_id: &str) -> impl Iterator<Item = &'a CapturedEntry> {
		self.entries.iter().filter(move |e| e.conversation_id.as_deref() == Some(conversation_id))
	}

	fn bump_revision(&mut self) -> u64 {
		self.revision += 1;
		self.revision
	}

	fn evict_oldest_if_needed(&mut self) -> Option<String> {
		if self.conversation_order.len() <= self.config.max_sessions {
			return None;
		}
		let oldest = self.conversation_order.pop_front()?;
		self.conversations.remove(&oldest);
		self.entries.retain(|e| e.conversation_id.as_deref() != Some(oldest.as_str()));
		Some(oldest)
	}
}

/// The store handle. Explicit and owned by the caller (spec.md §9:
/// "pass it explicitly" rather than a process-wide singleton).
pub struct Store {
	inner: Mutex<StoreInner>,
	change_tx: broadcast::Sender<ChangeEvent>,
}

const CHANGE_CHANNEL_CAPACITY: usize = 256;

impl Store {
	/// Opens (creating if absent) the state file and tags sidecar, replays
	/// them, and runs the legacy-image-token migration pass (spec.md §4.F
	/// `loadState`).
	pub async fn init(config: StoreConfig) -> Result<Self, StoreError> {
		let replayed = load_state_file(&config.state_path).await?;
		if replayed.invalid_lines > 0 {
			tracing::warn!(count = replayed.invalid_lines, "skipped invalid state.jsonl lines on load");
		}

		let mut conversations: BTreeMap<String, Conversation> = BTreeMap::new();
		let mut conversation_order = VecDeque::new();
		for conversation in replayed.conversations {
			if !conversations.contains_key(&conversation.id) {
				conversation_order.push_back(conversation.id.clone());
			}
			conversations.insert(conversation.id.clone(), conversation);
		}

		if let Ok(tags_content) = tokio::fs::read_to_string(&config.tags_path).await {
			replay_tags(&tags_content, &mut conversations);
		}

		let mut entries: VecDeque<CapturedEntry> = replayed.entries.into_iter().map(migrate_legacy_image_tokens).collect();
		entries.make_contiguous().sort_by(|a, b| (a.timestamp.as_str(), a.id).cmp(&(b.timestamp.as_str(), b.id)));

		let id_alloc = EntryIdAllocator::new(0);
		for entry in &entries {
			id_alloc.observe(entry.id);
		}

		let appender = JsonlAppender::open(&config.state_path).await?;
		let tags_appender = JsonlAppender::open(&config.tags_path).await?;
		let (change_tx, _rx) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);

		Ok(Self {
			inner: Mutex::new(StoreInner {
				config,
				conversations,
				conversation_order,
				entries,
				id_alloc,
				response_chain: ResponseChainCache::default(),
				revision: 0,
				appender,
				tags_appender,
			}),
			change_tx,
		})
	}

	pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
		self.change_tx.subscribe()
	}

	pub async fn revision(&self) -> u64 {
		self.inner.lock().await.revision
	}

	/// The full 11-step `storeRequest` sequence (spec.md §4.F).
	pub async fn store_request(&self, input: StoreRequestInput) -> CapturedEntry {
		let StoreRequestInput { mut context, response, source, raw_body, headers, http_status, timings, request_bytes, response_bytes, target_url } =
			input;

		// Step 1.
		let security_alerts = scan_messages(&context.messages);

		let (usage, response_summary) = derive_response(&response);
		if let Some(authoritative_total) = authoritative_prompt_total(&usage) {
			rescale_context_tokens(&mut context, authoritative_total);
		}

		// Step 2.
		let mut composition = compute_composition(&context);
		normalize_composition(&mut composition, context.total_tokens);

		let header_map = headers_to_map(&headers);

		let mut inner = self.inner.lock().await;

		// Step 3.
		let source = source.or_else(|| detect_source_tool(&header_map, &context));

		// Step 4.
		let fingerprint_inputs = FingerprintInputs { context: &context, raw_body: &raw_body, source: source.as_deref() };
		let assignment = assign(&fingerprint_inputs, &inner.response_chain);

		// Step 5.
		let is_new_conversation = match &assignment.conversation_id {
			Some(id) => !inner.conversations.contains_key(id),
			None => false,
		};
		let now = context_lens_core::now_iso8601();
		if let Some(id) = &assignment.conversation_id {
			if is_new_conversation {
				let mut conversation = Conversation::new(id.clone(), assignment.label.clone(), now.clone());
				conversation.source = source.clone();
				conversation.working_directory = assignment.working_directory.clone();
				conversation.session_id = context_lens_conversation::extract_session_id(&raw_body);
				inner.conversations.insert(id.clone(), conversation);
				inner.conversation_order.push_back(id.clone());
			}
		}

		// Step 6.
		let entry_id = inner.id_alloc.next();
		let context_limit = context_lens_tokens::get_context_limit(&context.model);
		let cost_usd = usage.input_tokens.zip(usage.output_tokens).and_then(|(input, output)| {
			context_lens_tokens::estimate_cost(&context.model, context.provider, input, output, usage.cache_read_tokens.unwrap_or(0), usage.cache_write_tokens.unwrap_or(0))
		});

		// Step 7.
		let previous_total_tokens = assignment
			.conversation_id
			.as_deref()
			.and_then(|id| inner.entries_for(id).last())
			.map(|e| e.context.total_tokens);
		let mut tools_used_so_far = HashSet::new();
		if let Some(id) = &assignment.conversation_id {
			for entry in inner.entries_for(id) {
				collect_tool_names(&entry.context, &mut tools_used_so_far);
			}
		}
		let turn_count = assignment.conversation_id.as_deref().map(|id| inner.entries_for(id).count() as u32 + 1).unwrap_or(1);
		let health = compute_health(&context, context_limit, previous_total_tokens, &tools_used_so_far, turn_count);

		let full_entry = CapturedEntry {
			id: entry_id,
			timestamp: now,
			context,
			response: response_summary,
			context_limit,
			source,
			conversation_id: assignment.conversation_id.clone(),
			agent_key: assignment.agent_key,
			agent_label: assignment.label,
			http_status,
			timings,
			request_bytes,
			response_bytes,
			target_url,
			headers: redact_headers(&headers),
			composition,
			cost_usd,
			health,
			security_alerts,
		};

		// Step 9 (full record, ahead of step 8's in-memory compaction).
		if let Err(err) = inner.appender.append(&StateLine::Entry(Box::new(full_entry.clone()))).await {
			tracing::warn!(error = %err, "failed to append entry to state.jsonl");
		}
		if is_new_conversation {
			if let Some(id) = &full_entry.conversation_id {
				if let Some(conversation) = inner.conversations.get(id) {
					if let Err(err) = inner.appender.append(&StateLine::Conversation(conversation.clone())).await {
						tracing::warn!(error = %err, "failed to append conversation to state.jsonl");
					}
				}
			}
		}

		if let Some(response_id) = extract_response_id(&response) {
			if let Some(conversation_id) = &full_entry.conversation_id {
				inner.response_chain.insert(response_id, conversation_id.clone());
			}
		}

		// Step 8.
		let max_messages = inner.config.max_compacted_messages;
		let compacted_entry = full_entry.clone().compact(max_messages);
		inner.entries.push_back(compacted_entry.clone());

		// Step 10.
		inner.evict_oldest_if_needed();

		// Step 11.
		let revision = inner.bump_revision();
		let conversation_id = compacted_entry.conversation_id.clone();
		drop(inner);
		let _ = self.change_tx.send(ChangeEvent::EntryAdded { revision, conversation_id });

		compacted_entry
	}

	/// Newest-first snapshot of all in-memory entries.
	pub async fn get_captured_requests(&self) -> Vec<CapturedEntry> {
		let inner = self.inner.lock().await;
		inner.entries.iter().rev().cloned().collect()
	}

	pub async fn get_conversations(&self) -> BTreeMap<String, Conversation> {
		self.inner.lock().await.conversations.clone()
	}

	pub async fn get_conversation_entries(&self, conversation_id: &str) -> Vec<CapturedEntry> {
		let inner = self.inner.lock().await;
		inner.entries_for(conversation_id).cloned().collect()
	}

	pub async fn delete_conversation(&self, conversation_id: &str) -> bool {
		let mut inner = self.inner.lock().await;
		if inner.conversations.remove(conversation_id).is_none() {
			return false;
		}
		inner.conversation_order.retain(|id| id != conversation_id);
		inner.entries.retain(|e| e.conversation_id.as_deref() != Some(conversation_id));
		let revision = inner.bump_revision();
		drop(inner);
		let _ = self.change_tx.send(ChangeEvent::ConversationDeleted { revision, conversation_id: conversation_id.to_string() });
		true
	}

	pub async fn reset_all(&self) -> Result<(), StoreError> {
		let mut inner = self.inner.lock().await;
		inner.conversations.clear();
		inner.conversation_order.clear();
		inner.entries.clear();
		inner.response_chain = ResponseChainCache::default();
		inner.appender.truncate().await?;
		inner.tags_appender.truncate().await?;
		let revision = inner.bump_revision();
		drop(inner);
		let _ = self.change_tx.send(ChangeEvent::Reset { revision });
		Ok(())
	}

	pub async fn add_tag(&self, conversation_id: &str, tag: &str) -> Result<(), StoreError> {
		self.mutate_tag(conversation_id, tag, TagAction::Add).await
	}

	pub async fn remove_tag(&self, conversation_id: &str, tag: &str) -> Result<(), StoreError> {
		self.mutate_tag(conversation_id, tag, TagAction::Remove).await
	}

	async fn mutate_tag(&self, conversation_id: &str, tag: &str, action: TagAction) -> Result<(), StoreError> {
		let mut inner = self.inner.lock().await;
		let Some(conversation) = inner.conversations.get_mut(conversation_id) else {
			return Err(StoreError::ConversationNotFound(conversation_id.to_string()));
		};
		match action {
			TagAction::Add => {
				conversation.tags.insert(tag.to_string());
			},
			TagAction::Remove => {
				conversation.tags.remove(tag);
			},
		}
		inner.tags_appender.append(&TagEvent { conversation_id: conversation_id.to_string(), tag: tag.to_string(), action }).await?;
		let revision = inner.bump_revision();
		drop(inner);
		let _ = self.change_tx.send(ChangeEvent::TagsUpdated { revision, conversation_id: conversation_id.to_string() });
		Ok(())
	}
}

fn headers_to_map(headers: &BTreeMap<String, String>) -> HeaderMap {
	let mut map = HeaderMap::new();
	for (key, value) in headers {
		if let (Ok(name), Ok(val)) = (http::header::HeaderName::try_from(key.as_str()), http::header::HeaderValue::try_from(value.as_str())) {
			map.insert(name, val);
		}
	}
	map
}

fn extract_response_id(response: &ProxyResponse) -> Option<String> {
	match response {
		ProxyResponse::Json(value) => value.get("id").and_then(Value::as_str).map(str::to_string),
		_ => None,
	}
}

/// Legacy image-token migration (spec.md §4.F `loadState`, scenario 8):
/// a message whose `contentBlocks` (at any nesting depth) contains an
/// image block gets its `tokens` recomputed via the estimator rather
/// than trusting whatever inflated figure was persisted.
fn migrate_legacy_image_tokens(mut entry: CapturedEntry) -> CapturedEntry {
	let mut changed = false;
	for message in &mut entry.context.messages {
		let Some(blocks) = &message.content_blocks else { continue };
		let image_count: usize = blocks.iter().map(ContentBlock::image_count).sum();
		if image_count == 0 {
			continue;
		}
		let text_chars: usize = blocks.iter().map(block_text_chars).sum();
		let recomputed = (text_chars as u32 / 4) + (image_count as u32 * context_lens_tokens::IMAGE_TOKEN_ESTIMATE);
		message.tokens = recomputed;
		changed = true;
	}
	if changed {
		entry.context.recompute_totals();
	}
	entry
}

fn block_text_chars(block: &ContentBlock) -> usize {
	match block {
		ContentBlock::Text { text } | ContentBlock::InputText { text } | ContentBlock::Thinking { text } => text.len(),
		ContentBlock::ToolUse { input, .. } => input.to_string().len(),
		ContentBlock::ToolResult { content, .. } => content.iter().map(block_text_chars).sum(),
		ContentBlock::Image { .. } => 0,
		ContentBlock::Fallback { raw } => raw.to_string().len(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use context_lens_core::{ApiFormat, ParsedMessage, Provider, SystemPrompt};
	use serde_json::json;
	use tempfile::tempdir;

	fn sample_context(user_text: &str) -> ContextInfo {
		let mut context = ContextInfo {
			provider: Provider::Anthropic,
			api_format: ApiFormat::AnthropicMessages,
			model: "claude-sonnet-4-20250514".to_string(),
			system_prompts: vec![SystemPrompt { content: "You are helpful.".to_string() }],
			tools: Vec::new(),
			messages: vec![ParsedMessage { role: "user".to_string(), content: user_text.to_string(), content_blocks: None, tokens: 5 }],
			system_tokens: 3,
			tools_tokens: 0,
			messages_tokens: 5,
			total_tokens: 8,
		};
		context.recompute_totals();
		context
	}

	fn sample_input(user_text: &str) -> StoreRequestInput {
		StoreRequestInput {
			context: sample_context(user_text),
			response: ProxyResponse::Json(json!({"model": "claude-sonnet-4-20250514", "stop_reason": "end_turn", "usage": {"input_tokens": 8, "output_tokens": 3}})),
			source: None,
			raw_body: json!({"model": "claude-sonnet-4-20250514", "messages": [{"role": "user", "content": user_text}]}),
			headers: BTreeMap::new(),
			http_status: 200,
			timings: Timings::default(),
			request_bytes: 100,
			response_bytes: 50,
			target_url: "https://api.anthropic.com/v1/messages".to_string(),
		}
	}

	async fn fresh_store() -> (Store, tempfile::TempDir) {
		let dir = tempdir().unwrap();
		let config = StoreConfig { state_path: dir.path().join("state.jsonl"), tags_path: dir.path().join("tags.jsonl"), max_sessions: 200, max_compacted_messages: 60 };
		(Store::init(config).await.unwrap(), dir)
	}

	#[tokio::test]
	async fn store_request_assigns_strictly_increasing_ids() {
		let (store, _dir) = fresh_store().await;
		let first = store.store_request(sample_input("Fix the login bug")).await;
		let second = store.store_request(sample_input("Totally different request")).await;
		assert!(second.id > first.id);
	}

	#[tokio::test]
	async fn store_request_bumps_revision_and_emits_change_event() {
		let (store, _dir) = fresh_store().await;
		let mut rx = store.subscribe();
		store.store_request(sample_input("Fix the login bug")).await;
		let event = rx.recv().await.unwrap();
		assert_eq!(event.revision(), 1);
		assert!(matches!(event, ChangeEvent::EntryAdded { .. }));
	}

	#[tokio::test]
	async fn same_conversation_groups_repeated_requests() {
		let (store, _dir) = fresh_store().await;
		let first = store.store_request(sample_input("Fix the login bug")).await;
		let second = store.store_request(sample_input("Fix the login bug")).await;
		assert_eq!(first.conversation_id, second.conversation_id);
		assert_eq!(store.get_conversations().await.len(), 1);
	}

	#[tokio::test]
	async fn eviction_keeps_only_the_newest_conversation() {
		let dir = tempdir().unwrap();
		let config = StoreConfig { state_path: dir.path().join("state.jsonl"), tags_path: dir.path().join("tags.jsonl"), max_sessions: 1, max_compacted_messages: 60 };
		let store = Store::init(config).await.unwrap();

		store.store_request(sample_input("First distinct conversation")).await;
		store.store_request(sample_input("Second distinct conversation")).await;

		let conversations = store.get_conversations().await;
		assert_eq!(conversations.len(), 1);
	}

	#[tokio::test]
	async fn reset_all_clears_everything_and_truncates_files() {
		let (store, _dir) = fresh_store().await;
		store.store_request(sample_input("Fix the login bug")).await;
		store.reset_all().await.unwrap();
		assert!(store.get_captured_requests().await.is_empty());
		assert!(store.get_conversations().await.is_empty());
	}

	#[tokio::test]
	async fn delete_conversation_removes_its_entries() {
		let (store, _dir) = fresh_store().await;
		let entry = store.store_request(sample_input("Fix the login bug")).await;
		let conversation_id = entry.conversation_id.unwrap();
		assert!(store.delete_conversation(&conversation_id).await);
		assert!(store.get_captured_requests().await.is_empty());
	}

	#[tokio::test]
	async fn tags_round_trip_through_store() {
		let (store, _dir) = fresh_store().await;
		let entry = store.store_request(sample_input("Fix the login bug")).await;
		let conversation_id = entry.conversation_id.unwrap();
		store.add_tag(&conversation_id, "bug").await.unwrap();
		let conversations = store.get_conversations().await;
		assert!(conversations[&conversation_id].tags.contains("bug"));
	}

	#[test]
	fn migration_shrinks_inflated_image_token_count() {
		let mut entry = {
			let input = sample_input("hi");
			CapturedEntry {
				id: 1,
				timestamp: "2026-01-01T00:00:00.000Z".to_string(),
				context: input.context,
				response: ResponseSummary { model: None, stop_reason: None, usage: None, streaming: false },
				context_limit: None,
				source: None,
				conversation_id: None,
				agent_key: None,
				agent_label: "Unnamed conversation".to_string(),
				http_status: 200,
				timings: Timings::default(),
				request_bytes: 0,
				response_bytes: 0,
				target_url: String::new(),
				headers: BTreeMap::new(),
				composition: Vec::new(),
				cost_usd: None,
				health: context_lens_audit::HealthScore { overall: 100.0, rating: context_lens_audit::Rating::Good, utilization: 100.0, tool_results: 100.0, tool_defs: 100.0, growth: 100.0, thinking: 100.0 },
				security_alerts: Vec::new(),
			}
		};
		entry.context.messages.push(ParsedMessage {
			role: "user".to_string(),
			content: String::new(),
			content_blocks: Some(vec![ContentBlock::Image { media_type: None }]),
			tokens: 750_000,
		});
		entry.context.recompute_totals();

		let migrated = migrate_legacy_image_tokens(entry);
		assert!(migrated.context.messages[1].tokens < 5_000);
		assert!(migrated.context.total_tokens < 10_200);
	}
}
