//! Component G: the LHAR (LLM HTTP Archive) export builder. One
//! `session` preamble per conversation plus one `entry` record per
//! captured request, either as JSONL or as a single wrapped JSON
//! document (spec.md §4.G, §6).

use std::collections::BTreeMap;

use context_lens_audit::{CompositionEntry, HealthScore, SecurityAlert};
use context_lens_conversation::{majority_agent_key, role_for, AgentRole};
use context_lens_core::{ApiFormat, Conversation, ParsedMessage, ParsedUsage, Provider};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::entry::CapturedEntry;

pub const LHAR_VERSION: &str = "1.0";
pub const LHAR_CREATOR: &str = "context-lens";

/// Privacy gate applied when exporting (spec.md §4.G).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivacyLevel {
	Minimal,
	Standard,
	Full,
}

impl Default for PrivacyLevel {
	fn default() -> Self {
		PrivacyLevel::Standard
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LharSession {
	#[serde(rename = "type")]
	pub kind: &'static str,
	pub trace_id: String,
	pub conversation_id: Option<String>,
	pub label: String,
	pub source: Option<String>,
	pub working_directory: Option<String>,
	pub first_seen: String,
	pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LharEntry {
	#[serde(rename = "type")]
	pub kind: &'static str,
	pub trace_id: String,
	pub sequence: u32,
	pub id: u64,
	pub timestamp: String,
	pub conversation_id: Option<String>,
	pub agent_key: Option<String>,
	pub agent_role: AgentRole,
	pub source: Option<String>,
	pub model: String,
	pub provider: Provider,
	pub api_format: ApiFormat,
	pub http_status: u16,
	pub stop_reason: Option<String>,
	pub total_ms: u64,
	pub usage: Option<ParsedUsage>,
	pub cumulative_tokens: u32,
	pub tokens_added_this_turn: Option<i64>,
	pub compaction_detected: bool,
	pub system_tokens: u32,
	pub tools_tokens: u32,
	pub messages_tokens: u32,
	pub cost_usd: Option<f64>,
	pub health: HealthScore,
	pub composition: Vec<CompositionEntry>,
	pub security_alerts: Vec<SecurityAlert>,
	pub tokens_per_second: Option<f64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub messages: Option<Vec<ParsedMessage>>,
	pub headers: BTreeMap<String, String>,
}

/// `SHA-256(conversation_id)[0:32]` hex chars, or 32 random hex chars
/// when the entry is unattributed (spec.md §4.G).
pub fn trace_id_for(conversation_id: Option<&str>) -> String {
	match conversation_id {
		Some(id) => {
			let digest = Sha256::digest(id.as_bytes());
			hex::encode(&digest[..16])
		},
		None => {
			let mut bytes = [0u8; 16];
			rand::rng().fill_bytes(&mut bytes);
			hex::encode(bytes)
		},
	}
}

pub fn build_session(conversation: &Conversation, trace_id: &str) -> LharSession {
	LharSession {
		kind: "session",
		trace_id: trace_id.to_string(),
		conversation_id: Some(conversation.id.clone()),
		label: conversation.label.clone(),
		source: conversation.source.clone(),
		working_directory: conversation.working_directory.clone(),
		first_seen: conversation.first_seen.clone(),
		tags: conversation.tags.iter().cloned().collect(),
	}
}

fn redact_for_privacy(headers: &BTreeMap<String, String>, privacy: PrivacyLevel) -> BTreeMap<String, String> {
	match privacy {
		PrivacyLevel::Minimal => BTreeMap::new(),
		// `headers` on a CapturedEntry is already redacted at capture time
		// (spec.md §4.G's redaction list); standard/full both use it as-is.
		PrivacyLevel::Standard | PrivacyLevel::Full => headers.clone(),
	}
}

fn tokens_per_second(entry: &CapturedEntry) -> Option<f64> {
	let output = entry.response.usage.as_ref()?.output_tokens?;
	if entry.timings.receive_ms == 0 {
		return None;
	}
	let raw = output as f64 / entry.timings.receive_ms as f64 * 1000.0;
	Some((raw * 10.0).round() / 10.0)
}

/// Builds the `entry` records for one conversation's entries, already
/// sorted by `(timestamp, id)`. `entries` must all share `trace_id`'s
/// conversation.
pub fn build_entries(trace_id: &str, entries: &[CapturedEntry], privacy: PrivacyLevel) -> Vec<LharEntry> {
	let majority_key = majority_agent_key(entries.iter().filter_map(|e| e.agent_key.as_deref()));

	entries
		.iter()
		.enumerate()
		.map(|(index, entry)| {
			let agent_role = entry.agent_key.as_deref().map(|k| role_for(k, majority_key)).unwrap_or(AgentRole::Main);

			let previous_same_role = entries[..index]
				.iter()
				.rev()
				.find(|candidate| candidate.agent_key.as_deref().map(|k| role_for(k, majority_key)) == entry.agent_key.as_deref().map(|k| role_for(k, majority_key)));
			let tokens_added_this_turn =
				previous_same_role.map(|prev| entry.context.total_tokens as i64 - prev.context.total_tokens as i64);

			let messages = match privacy {
				PrivacyLevel::Minimal => None,
				PrivacyLevel::Standard | PrivacyLevel::Full => Some(entry.context.messages.clone()),
			};

			LharEntry {
				kind: "entry",
				trace_id: trace_id.to_string(),
				sequence: index as u32,
				id: entry.id,
				timestamp: entry.timestamp.clone(),
				conversation_id: entry.conversation_id.clone(),
				agent_key: entry.agent_key.clone(),
				agent_role,
				source: entry.source.clone(),
				model: entry.context.model.clone(),
				provider: entry.context.provider,
				api_format: entry.context.api_format,
				http_status: entry.http_status,
				stop_reason: entry.response.stop_reason.clone(),
				total_ms: entry.timings.total_ms,
				usage: entry.response.usage.clone(),
				cumulative_tokens: entry.context.total_tokens,
				tokens_added_this_turn,
				compaction_detected: tokens_added_this_turn.is_some_and(|delta| delta < 0),
				system_tokens: entry.context.system_tokens,
				tools_tokens: entry.context.tools_tokens,
				messages_tokens: entry.context.messages_tokens,
				cost_usd: entry.cost_usd,
				health: entry.health.clone(),
				composition: entry.composition.clone(),
				security_alerts: entry.security_alerts.clone(),
				tokens_per_second: tokens_per_second(entry),
				messages,
				headers: redact_for_privacy(&entry.headers, privacy),
			}
		})
		.collect()
}

/// Serializes `sessions` and `entries` as JSONL, sessions first.
pub fn export_jsonl(sessions: &[LharSession], entries: &[LharEntry]) -> String {
	let mut out = String::new();
	for session in sessions {
		out.push_str(&serde_json::to_string(session).expect("lhar session always serializes"));
		out.push('\n');
	}
	for entry in entries {
		out.push_str(&serde_json::to_string(entry).expect("lhar entry always serializes"));
		out.push('\n');
	}
	out
}

#[derive(Debug, Clone, Serialize)]
struct LharDocument<'a> {
	version: &'static str,
	creator: &'static str,
	sessions: &'a [LharSession],
	entries: &'a [LharEntry],
}

/// Wraps `sessions`/`entries` into the `{"lhar": {...}}` document shape
/// (spec.md §4.G).
pub fn export_wrapped(sessions: &[LharSession], entries: &[LharEntry]) -> serde_json::Value {
	serde_json::json!({ "lhar": LharDocument { version: LHAR_VERSION, creator: LHAR_CREATOR, sessions, entries } })
}

#[cfg(test)]
mod tests {
	use super::*;
	use context_lens_audit::Rating;
	use context_lens_core::{ApiFormat, ParsedUsage, Timings};

	fn sample_entry(id: u64, conversation_id: &str, agent_key: &str, total_tokens: u32, output_tokens: u32) -> CapturedEntry {
		let mut context = context_lens_core::ContextInfo {
			provider: Provider::Anthropic,
			api_format: ApiFormat::AnthropicMessages,
			model: "claude-sonnet-4-5".to_string(),
			system_prompts: Vec::new(),
			tools: Vec::new(),
			messages: vec![ParsedMessage { role: "user".to_string(), content: "hi".to_string(), content_blocks: None, tokens: total_tokens }],
			system_tokens: 0,
			tools_tokens: 0,
			messages_tokens: total_tokens,
			total_tokens,
		};
		context.recompute_totals();
		context.total_tokens = total_tokens;
		CapturedEntry {
			id,
			timestamp: format!("2026-07-27T00:00:0{id}.000Z"),
			context,
			response: crate::entry::ResponseSummary {
				model: Some("claude-sonnet-4-5".to_string()),
				stop_reason: Some("end_turn".to_string()),
				usage: Some(ParsedUsage { output_tokens: Some(output_tokens), ..Default::default() }),
				streaming: false,
			},
			context_limit: Some(200_000),
			source: Some("claude-code".to_string()),
			conversation_id: Some(conversation_id.to_string()),
			agent_key: Some(agent_key.to_string()),
			agent_label: "Fix the login bug".to_string(),
			http_status: 200,
			timings: Timings { send_ms: 0, wait_ms: 0, receive_ms: 2_000, total_ms: 2_000 },
			request_bytes: 0,
			response_bytes: 0,
			target_url: "https://api.anthropic.com/v1/messages".to_string(),
			headers: BTreeMap::from([("authorization".to_string(), "[redacted]".to_string())]),
			composition: Vec::new(),
			cost_usd: Some(0.01),
			health: HealthScore { overall: 95.0, rating: Rating::Good, utilization: 95.0, tool_results: 95.0, tool_defs: 95.0, growth: 95.0, thinking: 95.0 },
			security_alerts: Vec::new(),
		}
	}

	#[test]
	fn trace_id_is_deterministic_for_same_conversation() {
		let a = trace_id_for(Some("abc123"));
		let b = trace_id_for(Some("abc123"));
		assert_eq!(a, b);
		assert_eq!(a.len(), 32);
	}

	#[test]
	fn tokens_added_this_turn_tracks_same_agent_growth() {
		let entries = vec![sample_entry(1, "abc", "agent1", 1_000, 50), sample_entry(2, "abc", "agent1", 1_500, 80)];
		let built = build_entries("trace", &entries, PrivacyLevel::Standard);
		assert_eq!(built[0].tokens_added_this_turn, None);
		assert_eq!(built[1].tokens_added_this_turn, Some(500));
		assert!(!built[1].compaction_detected);
	}

	#[test]
	fn shrinking_total_tokens_flags_compaction() {
		let entries = vec![sample_entry(1, "abc", "agent1", 5_000, 50), sample_entry(2, "abc", "agent1", 1_000, 30)];
		let built = build_entries("trace", &entries, PrivacyLevel::Standard);
		assert_eq!(built[1].tokens_added_this_turn, Some(-4_000));
		assert!(built[1].compaction_detected);
	}

	#[test]
	fn minimal_privacy_drops_headers_and_messages() {
		let entries = vec![sample_entry(1, "abc", "agent1", 1_000, 50)];
		let built = build_entries("trace", &entries, PrivacyLevel::Minimal);
		assert!(built[0].headers.is_empty());
		assert!(built[0].messages.is_none());
	}

	#[test]
	fn tokens_per_second_computed_from_output_and_receive_ms() {
		let entries = vec![sample_entry(1, "abc", "agent1", 1_000, 100)];
		let built = build_entries("trace", &entries, PrivacyLevel::Standard);
		assert_eq!(built[0].tokens_per_second, Some(50.0));
	}
}
