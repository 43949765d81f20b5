//! [`CapturedEntry`] — the unit the store actually holds: a
//! [`ContextInfo`] plus everything the other components computed about
//! it (spec.md §3).

use std::collections::BTreeMap;

use context_lens_audit::{CompositionEntry, HealthScore, SecurityAlert};
use context_lens_core::{ContextInfo, ParsedUsage, Timings};
use serde::{Deserialize, Serialize};

/// Default cap on how many messages a compacted entry keeps in memory
/// (spec.md §4.F step 8).
pub const DEFAULT_MAX_COMPACTED_MESSAGES: usize = 60;

/// The "keep-set" response shape an entry is compacted down to: full
/// response bodies are never retained in memory (spec.md §4.F step 8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseSummary {
	pub model: Option<String>,
	pub stop_reason: Option<String>,
	pub usage: Option<ParsedUsage>,
	pub streaming: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturedEntry {
	pub id: u64,
	pub timestamp: String,
	pub context: ContextInfo,
	pub response: ResponseSummary,
	pub context_limit: Option<u32>,
	pub source: Option<String>,
	pub conversation_id: Option<String>,
	pub agent_key: Option<String>,
	pub agent_label: String,
	pub http_status: u16,
	pub timings: Timings,
	pub request_bytes: u64,
	pub response_bytes: u64,
	pub target_url: String,
	pub headers: BTreeMap<String, String>,
	pub composition: Vec<CompositionEntry>,
	pub cost_usd: Option<f64>,
	pub health: HealthScore,
	pub security_alerts: Vec<SecurityAlert>,
}

impl CapturedEntry {
	/// Drops `system_prompts`/`tools` and truncates `messages` to
	/// `max_messages`, keeping the most recent ones — memory hygiene for
	/// entries that stay resident for the lifetime of the process
	/// (spec.md §4.F step 8). The full record (this function's input) is
	/// only ever serialized once, by the LHAR builder, before this
	/// compaction runs.
	pub fn compact(mut self, max_messages: usize) -> Self {
		self.context.system_prompts.clear();
		self.context.tools.clear();
		if self.context.messages.len() > max_messages {
			let drop_count = self.context.messages.len() - max_messages;
			self.context.messages.drain(0..drop_count);
		}
		self
	}
}

/// Redacts sensitive headers before they're retained on a
/// [`CapturedEntry`] or emitted in an LHAR record (spec.md §4.G).
pub const REDACTED_HEADER_NAMES: &[&str] =
	&["authorization", "x-api-key", "cookie", "set-cookie", "x-target-url", "x-goog-api-key"];

pub fn redact_headers(headers: &BTreeMap<String, String>) -> BTreeMap<String, String> {
	headers
		.iter()
		.map(|(k, v)| {
			if REDACTED_HEADER_NAMES.contains(&k.to_ascii_lowercase().as_str()) {
				(k.clone(), "[redacted]".to_string())
			} else {
				(k.clone(), v.clone())
			}
		})
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use context_lens_audit::{HealthScore, Rating};
	use context_lens_core::{ApiFormat, ParsedMessage, Provider};

	fn sample_entry(message_count: usize) -> CapturedEntry {
		let messages = (0..message_count)
			.map(|i| ParsedMessage { role: "user".to_string(), content: format!("message {i}"), content_blocks: None, tokens: 1 })
			.collect();
		let mut context = ContextInfo {
			provider: Provider::Anthropic,
			api_format: ApiFormat::AnthropicMessages,
			model: "claude-sonnet-4-5".to_string(),
			system_prompts: vec![context_lens_core::SystemPrompt { content: "sys".to_string() }],
			tools: vec![serde_json::json!({"name": "bash"})],
			messages,
			system_tokens: 1,
			tools_tokens: 1,
			messages_tokens: 0,
			total_tokens: 0,
		};
		context.recompute_totals();
		CapturedEntry {
			id: 1,
			timestamp: "2026-07-27T00:00:00.000Z".to_string(),
			context,
			response: ResponseSummary { model: None, stop_reason: None, usage: None, streaming: false },
			context_limit: None,
			source: None,
			conversation_id: None,
			agent_key: None,
			agent_label: "Unnamed conversation".to_string(),
			http_status: 200,
			timings: Timings { send_ms: 0, wait_ms: 0, receive_ms: 0, total_ms: 0 },
			request_bytes: 0,
			response_bytes: 0,
			target_url: "https://api.anthropic.com/v1/messages".to_string(),
			headers: BTreeMap::new(),
			composition: Vec::new(),
			cost_usd: None,
			health: HealthScore { overall: 100.0, rating: Rating::Good, utilization: 100.0, tool_results: 100.0, tool_defs: 100.0, growth: 100.0, thinking: 100.0 },
			security_alerts: Vec::new(),
		}
	}

	#[test]
	fn compact_drops_system_prompts_and_tools() {
		let compacted = sample_entry(3).compact(60);
		assert!(compacted.context.system_prompts.is_empty());
		assert!(compacted.context.tools.is_empty());
	}

	#[test]
	fn compact_truncates_to_max_keeping_most_recent() {
		let compacted = sample_entry(100).compact(60);
		assert_eq!(compacted.context.messages.len(), 60);
		assert_eq!(compacted.context.messages[0].content, "message 40");
		assert_eq!(compacted.context.messages[59].content, "message 99");
	}

	#[test]
	fn compact_is_a_no_op_under_the_limit() {
		let compacted = sample_entry(10).compact(60);
		assert_eq!(compacted.context.messages.len(), 10);
	}

	#[test]
	fn redact_headers_masks_known_sensitive_names() {
		let mut headers = BTreeMap::new();
		headers.insert("Authorization".to_string(), "Bearer secret".to_string());
		headers.insert("content-type".to_string(), "application/json".to_string());
		let redacted = redact_headers(&headers);
		assert_eq!(redacted.get("Authorization").unwrap(), "[redacted]");
		assert_eq!(redacted.get("content-type").unwrap(), "application/json");
	}
}
