//! Health score (spec.md §4.H): five weighted audits, each a
//! piecewise-linear function of one statistic of the current
//! [`ContextInfo`], combined into one overall score and a rating.

use std::collections::HashSet;

use context_lens_core::{ContentBlock, ContextInfo};
use serde::{Deserialize, Serialize};

const WEIGHT_UTILIZATION: f64 = 30.0;
const WEIGHT_TOOL_RESULTS: f64 = 25.0;
const WEIGHT_TOOL_DEFS: f64 = 20.0;
const WEIGHT_GROWTH: f64 = 15.0;
const WEIGHT_THINKING: f64 = 10.0;

/// `turnCount <= 2` floors the tool-results sub-score, since an agent
/// only a couple of turns in hasn't had a chance to accumulate bloated
/// tool output yet (spec.md §4.H).
const EARLY_TURN_FLOOR_MAX_TURN: u32 = 2;
const EARLY_TURN_FLOOR_SCORE: f64 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Rating {
	Good,
	NeedsWork,
	Poor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthScore {
	pub overall: f64,
	pub rating: Rating,
	pub utilization: f64,
	pub tool_results: f64,
	pub tool_defs: f64,
	pub growth: f64,
	pub thinking: f64,
}

/// Linear interpolation between sorted `(x, y)` breakpoints; clamps to
/// the first/last `y` outside the covered range.
fn piecewise_linear(breakpoints: &[(f64, f64)], x: f64) -> f64 {
	if breakpoints.is_empty() {
		return 0.0;
	}
	if x <= breakpoints[0].0 {
		return breakpoints[0].1;
	}
	if x >= breakpoints[breakpoints.len() - 1].0 {
		return breakpoints[breakpoints.len() - 1].1;
	}
	for window in breakpoints.windows(2) {
		let (x0, y0) = window[0];
		let (x1, y1) = window[1];
		if x >= x0 && x <= x1 {
			if (x1 - x0).abs() < f64::EPSILON {
				return y0;
			}
			let t = (x - x0) / (x1 - x0);
			return y0 + t * (y1 - y0);
		}
	}
	breakpoints[breakpoints.len() - 1].1
}

fn utilization_score(total_tokens: u32, context_limit: Option<u32>) -> f64 {
	let Some(limit) = context_limit.filter(|&l| l > 0) else { return 100.0 };
	let ratio = total_tokens as f64 / limit as f64;
	piecewise_linear(&[(0.0, 100.0), (0.5, 100.0), (0.75, 85.0), (0.9, 60.0), (1.0, 30.0), (1.2, 0.0)], ratio)
}

/// Tool-result tokens aren't tallied separately on `ParsedMessage`, so
/// approximate using the message's own token count whenever its blocks
/// include a tool_result — good enough for a health heuristic, not a
/// billing figure.
fn tool_result_tokens(context: &ContextInfo) -> u32 {
	context
		.messages
		.iter()
		.filter(|m| m.content_blocks.as_ref().is_some_and(|blocks| blocks.iter().any(|b| matches!(b, ContentBlock::ToolResult { .. }))))
		.map(|m| m.tokens)
		.sum()
}

fn tool_results_score(context: &ContextInfo, turn_count: u32) -> f64 {
	let total = context.total_tokens.max(1);
	let ratio = tool_result_tokens(context) as f64 / total as f64;
	let score = piecewise_linear(&[(0.0, 100.0), (0.2, 90.0), (0.4, 70.0), (0.6, 40.0), (0.8, 15.0), (1.0, 0.0)], ratio);
	if turn_count <= EARLY_TURN_FLOOR_MAX_TURN {
		score.max(EARLY_TURN_FLOOR_SCORE)
	} else {
		score
	}
}

fn tool_def_name(tool: &serde_json::Value) -> Option<String> {
	tool.get("name")
		.and_then(serde_json::Value::as_str)
		.or_else(|| tool.pointer("/function/name").and_then(serde_json::Value::as_str))
		.map(str::to_string)
}

fn tool_defs_score(context: &ContextInfo, tools_used_so_far: &HashSet<String>) -> f64 {
	let total = context.total_tokens.max(1);
	let bloat_ratio = context.tools_tokens as f64 / total as f64;
	let bloat_score = piecewise_linear(&[(0.0, 100.0), (0.1, 90.0), (0.2, 70.0), (0.35, 40.0), (0.5, 15.0), (0.7, 0.0)], bloat_ratio);

	if context.tools.is_empty() {
		return bloat_score;
	}
	let defined: Vec<String> = context.tools.iter().filter_map(tool_def_name).collect();
	if defined.is_empty() {
		return bloat_score;
	}
	let unused = defined.iter().filter(|name| !tools_used_so_far.contains(*name)).count();
	let unused_ratio = unused as f64 / defined.len() as f64;
	let unused_score = piecewise_linear(&[(0.0, 100.0), (0.25, 85.0), (0.5, 60.0), (0.75, 30.0), (1.0, 10.0)], unused_ratio);

	(bloat_score + unused_score) / 2.0
}

fn growth_score(total_tokens: u32, previous_total_tokens: Option<u32>) -> f64 {
	let Some(previous) = previous_total_tokens else { return 100.0 };
	if total_tokens <= previous {
		// A compaction or flat turn is always healthy from a growth
		// perspective.
		return 100.0;
	}
	let growth_ratio = (total_tokens - previous) as f64 / previous.max(1) as f64;
	piecewise_linear(&[(0.0, 100.0), (0.1, 90.0), (0.3, 60.0), (0.6, 30.0), (1.0, 0.0)], growth_ratio)
}

fn thinking_score(context: &ContextInfo) -> f64 {
	let total = context.total_tokens.max(1);
	let thinking_tokens: u32 = context
		.messages
		.iter()
		.filter_map(|m| m.content_blocks.as_ref())
		.flatten()
		.filter_map(|b| match b {
			ContentBlock::Thinking { text } => Some(text.len() as u32 / 4),
			_ => None,
		})
		.sum();
	let ratio = thinking_tokens as f64 / total as f64;
	piecewise_linear(&[(0.0, 100.0), (0.1, 100.0), (0.25, 80.0), (0.5, 50.0), (0.75, 20.0), (1.0, 0.0)], ratio)
}

fn rating_for(overall: f64) -> Rating {
	if overall >= 90.0 {
		Rating::Good
	} else if overall >= 50.0 {
		Rating::NeedsWork
	} else {
		Rating::Poor
	}
}

/// Computes the full health score for `context`, given the context
/// window limit (if the model is known), the previous entry's
/// `total_tokens` in the same conversation (for the growth audit), the
/// set of tool names this conversation has actually invoked so far, and
/// the current user-turn count (for the early-turn floor).
pub fn compute_health(
	context: &ContextInfo,
	context_limit: Option<u32>,
	previous_total_tokens: Option<u32>,
	tools_used_so_far: &HashSet<String>,
	turn_count: u32,
) -> HealthScore {
	let utilization = utilization_score(context.total_tokens, context_limit);
	let tool_results = tool_results_score(context, turn_count);
	let tool_defs = tool_defs_score(context, tools_used_so_far);
	let growth = growth_score(context.total_tokens, previous_total_tokens);
	let thinking = thinking_score(context);

	let overall = (utilization * WEIGHT_UTILIZATION
		+ tool_results * WEIGHT_TOOL_RESULTS
		+ tool_defs * WEIGHT_TOOL_DEFS
		+ growth * WEIGHT_GROWTH
		+ thinking * WEIGHT_THINKING)
		/ 100.0;

	HealthScore { overall, rating: rating_for(overall), utilization, tool_results, tool_defs, growth, thinking }
}

#[cfg(test)]
mod tests {
	use super::*;
	use context_lens_core::{ApiFormat, ParsedMessage, Provider};

	fn context_with_tokens(total: u32, tools_tokens: u32) -> ContextInfo {
		let mut info = ContextInfo {
			provider: Provider::Anthropic,
			api_format: ApiFormat::AnthropicMessages,
			model: "claude-sonnet-4-5".to_string(),
			system_prompts: Vec::new(),
			tools: Vec::new(),
			messages: vec![ParsedMessage {
				role: "user".to_string(),
				content: "hi".to_string(),
				content_blocks: None,
				tokens: total.saturating_sub(tools_tokens),
			}],
			system_tokens: 0,
			tools_tokens,
			messages_tokens: total.saturating_sub(tools_tokens),
			total_tokens: total,
		};
		info.recompute_totals();
		info.tools_tokens = tools_tokens;
		info.total_tokens = info.system_tokens + info.tools_tokens + info.messages_tokens;
		info
	}

	#[test]
	fn low_utilization_scores_well() {
		let context = context_with_tokens(1_000, 0);
		let score = compute_health(&context, Some(200_000), None, &HashSet::new(), 5);
		assert!(score.utilization >= 90.0);
	}

	#[test]
	fn near_full_context_scores_poorly_on_utilization() {
		let context = context_with_tokens(195_000, 0);
		let score = compute_health(&context, Some(200_000), None, &HashSet::new(), 5);
		assert!(score.utilization < 70.0);
	}

	#[test]
	fn unknown_model_limit_does_not_penalize_utilization() {
		let context = context_with_tokens(50_000, 0);
		let score = compute_health(&context, None, None, &HashSet::new(), 5);
		assert_eq!(score.utilization, 100.0);
	}

	#[test]
	fn early_turn_floor_lifts_tool_results_score() {
		let context = context_with_tokens(10_000, 0);
		let score = compute_health(&context, Some(200_000), None, &HashSet::new(), 1);
		assert!(score.tool_results >= 60.0);
	}

	#[test]
	fn shrinking_context_scores_full_growth_marks() {
		let context = context_with_tokens(500, 0);
		let score = compute_health(&context, Some(200_000), Some(5_000), &HashSet::new(), 5);
		assert_eq!(score.growth, 100.0);
	}

	#[test]
	fn rating_buckets_match_overall_thresholds() {
		assert_eq!(rating_for(95.0), Rating::Good);
		assert_eq!(rating_for(60.0), Rating::NeedsWork);
		assert_eq!(rating_for(10.0), Rating::Poor);
	}
}
