//! Component J: the offline session analyzer. Takes the `entry` records
//! of one LHAR session (already in sequence order) and derives
//! higher-level structure: compactions, growth blocks, user turns with
//! per-turn action traces, timing aggregates, and cache statistics
//! (spec.md §4.J).

use context_lens_core::{parse_iso8601, ContentBlock};
use serde::Serialize;

use crate::lhar::LharEntry;

#[derive(Debug, Clone, Serialize)]
pub struct Compaction {
	pub sequence: u32,
	pub before_tokens: u32,
	pub after_tokens: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct GrowthBlock {
	pub start_sequence: u32,
	pub end_sequence: u32,
	pub start_tokens: u32,
	pub end_tokens: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserTurn {
	pub start_sequence: u32,
	pub end_sequence: u32,
	pub path: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct TimingAggregates {
	pub wall_ms: i64,
	pub entry_count: usize,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct CacheStats {
	pub input_tokens: u64,
	pub cache_read_tokens: u64,
	pub cache_write_tokens: u64,
	pub hit_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionAnalysis {
	pub compactions: Vec<Compaction>,
	pub growth_blocks: Vec<GrowthBlock>,
	pub user_turns: Vec<UserTurn>,
	pub timing: TimingAggregates,
	pub cache: CacheStats,
}

fn action_label(entry: &LharEntry) -> String {
	if entry.compaction_detected {
		return "compaction".to_string();
	}
	if entry.messages.as_ref().is_some_and(|messages| {
		messages.iter().any(|m| m.content_blocks.as_ref().is_some_and(|blocks| blocks.iter().any(|b| matches!(b, ContentBlock::ToolUse { .. }))))
	}) {
		return "tool_use".to_string();
	}
	match entry.stop_reason.as_deref() {
		Some("end_turn") => "end_turn".to_string(),
		None => "no_response".to_string(),
		Some(other) => other.to_string(),
	}
}

fn find_compaction_before_tokens(entries: &[LharEntry], compaction_index: usize) -> u32 {
	let current = &entries[compaction_index];
	entries[..compaction_index]
		.iter()
		.rev()
		.find(|candidate| candidate.agent_role == current.agent_role && candidate.cumulative_tokens > current.cumulative_tokens)
		.map(|candidate| candidate.cumulative_tokens)
		.unwrap_or(current.cumulative_tokens)
}

fn compactions(entries: &[LharEntry]) -> Vec<Compaction> {
	entries
		.iter()
		.enumerate()
		.filter(|(_, e)| e.compaction_detected)
		.map(|(index, entry)| Compaction { sequence: entry.sequence, before_tokens: find_compaction_before_tokens(entries, index), after_tokens: entry.cumulative_tokens })
		.collect()
}

fn growth_blocks(entries: &[LharEntry], compaction_sequences: &[u32]) -> Vec<GrowthBlock> {
	if entries.is_empty() {
		return Vec::new();
	}
	let mut blocks = Vec::new();
	let mut start = 0usize;
	for (index, entry) in entries.iter().enumerate() {
		if compaction_sequences.contains(&entry.sequence) && index > start {
			blocks.push(GrowthBlock {
				start_sequence: entries[start].sequence,
				end_sequence: entries[index - 1].sequence,
				start_tokens: entries[start].cumulative_tokens,
				end_tokens: entries[index - 1].cumulative_tokens,
			});
			start = index;
		}
	}
	blocks.push(GrowthBlock {
		start_sequence: entries[start].sequence,
		end_sequence: entries[entries.len() - 1].sequence,
		start_tokens: entries[start].cumulative_tokens,
		end_tokens: entries[entries.len() - 1].cumulative_tokens,
	});
	blocks
}

/// Splits `entries` into user turns: a turn closes after an `end_turn`
/// entry is immediately followed by a forward jump in `sequence`
/// (spec.md §4.J) — the signature of a subagent or a fresh top-level
/// prompt starting a new stretch of work.
fn user_turns(entries: &[LharEntry]) -> Vec<UserTurn> {
	if entries.is_empty() {
		return Vec::new();
	}
	let mut turns = Vec::new();
	let mut start = 0usize;
	for index in 0..entries.len() {
		let is_last = index == entries.len() - 1;
		let closes_here = entries[index].stop_reason.as_deref() == Some("end_turn")
			&& !is_last
			&& entries[index + 1].sequence > entries[index].sequence + 1;
		if closes_here || is_last {
			let path = entries[start..=index].iter().map(action_label).collect();
			turns.push(UserTurn { start_sequence: entries[start].sequence, end_sequence: entries[index].sequence, path });
			start = index + 1;
		}
	}
	turns
}

fn timing(entries: &[LharEntry]) -> TimingAggregates {
	let (Some(first), Some(last)) = (entries.first(), entries.last()) else { return TimingAggregates::default() };
	let wall_ms = match (parse_iso8601(&first.timestamp), parse_iso8601(&last.timestamp)) {
		(Some(start), Some(end)) => (end - start).num_milliseconds() + last.total_ms as i64,
		_ => 0,
	};
	TimingAggregates { wall_ms, entry_count: entries.len() }
}

fn cache_stats(entries: &[LharEntry]) -> CacheStats {
	let mut stats = CacheStats::default();
	for entry in entries {
		let Some(usage) = &entry.usage else { continue };
		stats.input_tokens += usage.input_tokens.unwrap_or(0) as u64;
		stats.cache_read_tokens += usage.cache_read_tokens.unwrap_or(0) as u64;
		stats.cache_write_tokens += usage.cache_write_tokens.unwrap_or(0) as u64;
	}
	let denominator = stats.input_tokens + stats.cache_read_tokens + stats.cache_write_tokens;
	stats.hit_rate = if denominator > 0 { stats.cache_read_tokens as f64 / denominator as f64 } else { 0.0 };
	stats
}

/// Analyzes one session's entries, already ordered by `sequence`.
pub fn analyze(entries: &[LharEntry]) -> SessionAnalysis {
	let compactions = compactions(entries);
	let compaction_sequences: Vec<u32> = compactions.iter().map(|c| c.sequence).collect();
	SessionAnalysis {
		growth_blocks: growth_blocks(entries, &compaction_sequences),
		user_turns: user_turns(entries),
		timing: timing(entries),
		cache: cache_stats(entries),
		compactions,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::lhar::{build_entries, PrivacyLevel};
	use crate::entry::{CapturedEntry, ResponseSummary};
	use context_lens_audit::{HealthScore, Rating};
	use context_lens_core::{ApiFormat, ContextInfo, ParsedMessage, ParsedUsage, Provider, Timings};
	use std::collections::BTreeMap;

	fn entry(id: u64, tokens: u32, stop_reason: Option<&str>, input: u32, cache_read: u32) -> CapturedEntry {
		let mut context = ContextInfo {
			provider: Provider::Anthropic,
			api_format: ApiFormat::AnthropicMessages,
			model: "claude-sonnet-4-5".to_string(),
			system_prompts: Vec::new(),
			tools: Vec::new(),
			messages: vec![ParsedMessage { role: "user".to_string(), content: "hi".to_string(), content_blocks: None, tokens }],
			system_tokens: 0,
			tools_tokens: 0,
			messages_tokens: tokens,
			total_tokens: tokens,
		};
		context.recompute_totals();
		context.total_tokens = tokens;
		CapturedEntry {
			id,
			timestamp: format!("2026-07-27T00:00:{id:02}.000Z"),
			context,
			response: ResponseSummary {
				model: Some("claude-sonnet-4-5".to_string()),
				stop_reason: stop_reason.map(str::to_string),
				usage: Some(ParsedUsage { input_tokens: Some(input), cache_read_tokens: Some(cache_read), ..Default::default() }),
				streaming: false,
			},
			context_limit: Some(200_000),
			source: Some("claude-code".to_string()),
			conversation_id: Some("abc123".to_string()),
			agent_key: Some("agent1".to_string()),
			agent_label: "Fix the login bug".to_string(),
			http_status: 200,
			timings: Timings { send_ms: 0, wait_ms: 0, receive_ms: 500, total_ms: 500 },
			request_bytes: 0,
			response_bytes: 0,
			target_url: "https://api.anthropic.com/v1/messages".to_string(),
			headers: BTreeMap::new(),
			composition: Vec::new(),
			cost_usd: None,
			health: HealthScore { overall: 90.0, rating: Rating::Good, utilization: 90.0, tool_results: 90.0, tool_defs: 90.0, growth: 90.0, thinking: 90.0 },
			security_alerts: Vec::new(),
		}
	}

	#[test]
	fn detects_a_compaction_and_reports_before_after_tokens() {
		let captured = vec![entry(1, 5_000, Some("end_turn"), 5_000, 0), entry(2, 1_000, Some("end_turn"), 1_000, 0)];
		let lhar = build_entries("trace", &captured, PrivacyLevel::Standard);
		let analysis = analyze(&lhar);
		assert_eq!(analysis.compactions.len(), 1);
		assert_eq!(analysis.compactions[0].before_tokens, 5_000);
		assert_eq!(analysis.compactions[0].after_tokens, 1_000);
	}

	#[test]
	fn cache_hit_rate_divides_cache_read_by_total_prompt_tokens() {
		let captured = vec![entry(1, 1_000, Some("end_turn"), 800, 200)];
		let lhar = build_entries("trace", &captured, PrivacyLevel::Standard);
		let analysis = analyze(&lhar);
		assert!((analysis.cache.hit_rate - 0.2).abs() < 1e-9);
	}

	#[test]
	fn single_entry_session_forms_one_growth_block_and_one_turn() {
		let captured = vec![entry(1, 1_000, Some("end_turn"), 1_000, 0)];
		let lhar = build_entries("trace", &captured, PrivacyLevel::Standard);
		let analysis = analyze(&lhar);
		assert_eq!(analysis.growth_blocks.len(), 1);
		assert_eq!(analysis.user_turns.len(), 1);
	}
}
