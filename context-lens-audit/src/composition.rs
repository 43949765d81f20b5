//! Composition categorization (spec.md §4.H): every byte of a
//! [`ContextInfo`] is assigned to one category, producing a
//! tokens-descending breakdown.

use context_lens_core::{redistribute_residual, ContentBlock, ContextInfo, ParsedMessage};
use context_lens_tokens::estimate_tokens_value;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const SYSTEM_INJECTION_MARKER: &str = "<system-reminder>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
	SystemPrompt,
	ToolDefinitions,
	ToolResults,
	ToolCalls,
	AssistantText,
	UserText,
	Thinking,
	SystemInjections,
	Images,
	CacheMarkers,
	Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositionEntry {
	pub category: Category,
	pub tokens: u32,
	pub pct: f64,
	pub count: u32,
}

/// Builds the full composition breakdown for one request, sorted by
/// `tokens` descending.
pub fn compute_composition(context: &ContextInfo) -> Vec<CompositionEntry> {
	let mut tally: Vec<(Category, u32, u32)> = all_categories().into_iter().map(|c| (c, 0u32, 0u32)).collect();

	let mut add = |category: Category, tokens: u32, count: u32| {
		if let Some(slot) = tally.iter_mut().find(|(c, _, _)| *c == category) {
			slot.1 += tokens;
			slot.2 += count;
		}
	};

	for prompt in &context.system_prompts {
		let tokens = estimate_tokens_value(&Value::String(prompt.content.clone()), Some(context.model.as_str()));
		if prompt.content.contains(SYSTEM_INJECTION_MARKER) {
			add(Category::SystemInjections, tokens, 1);
		} else {
			add(Category::SystemPrompt, tokens, 1);
		}
	}

	if !context.tools.is_empty() {
		let tools_value = Value::Array(context.tools.clone());
		let tokens = estimate_tokens_value(&tools_value, Some(context.model.as_str()));
		add(Category::ToolDefinitions, tokens, context.tools.len() as u32);

		let cache_marker_count = context.tools.iter().filter(|t| t.get("cache_control").is_some()).count();
		if cache_marker_count > 0 {
			add(Category::CacheMarkers, 0, cache_marker_count as u32);
		}
	}

	for message in &context.messages {
		categorize_message(message, context.model.as_str(), &mut add);
	}

	let total_tokens: u32 = tally.iter().map(|(_, tokens, _)| tokens).sum();
	tally
		.into_iter()
		.filter(|(_, tokens, count)| *tokens > 0 || *count > 0)
		.map(|(category, tokens, count)| CompositionEntry {
			category,
			tokens,
			pct: pct_of(tokens, total_tokens),
			count,
		})
		.collect::<Vec<_>>()
		.tap_sort()
}

fn all_categories() -> [Category; 10] {
	[
		Category::SystemPrompt,
		Category::ToolDefinitions,
		Category::ToolResults,
		Category::ToolCalls,
		Category::AssistantText,
		Category::UserText,
		Category::Thinking,
		Category::SystemInjections,
		Category::Images,
		Category::CacheMarkers,
	]
}

fn categorize_message(message: &ParsedMessage, model: &str, add: &mut impl FnMut(Category, u32, u32)) {
	match &message.content_blocks {
		Some(blocks) => {
			for block in blocks {
				categorize_block(block, &message.role, model, add);
			}
		},
		None => {
			let tokens = estimate_tokens_value(&Value::String(message.content.clone()), Some(model));
			if message.content.contains(SYSTEM_INJECTION_MARKER) {
				add(Category::SystemInjections, tokens, 1);
			} else {
				add(text_category_for_role(&message.role), tokens, 1);
			}
		},
	}
}

fn categorize_block(block: &ContentBlock, role: &str, model: &str, add: &mut impl FnMut(Category, u32, u32)) {
	match block {
		ContentBlock::Text { text } | ContentBlock::InputText { text } => {
			let tokens = estimate_tokens_value(&Value::String(text.clone()), Some(model));
			if text.contains(SYSTEM_INJECTION_MARKER) {
				add(Category::SystemInjections, tokens, 1);
			} else {
				add(text_category_for_role(role), tokens, 1);
			}
		},
		ContentBlock::Thinking { text } => {
			let tokens = estimate_tokens_value(&Value::String(text.clone()), Some(model));
			add(Category::Thinking, tokens, 1);
		},
		ContentBlock::ToolUse { input, .. } => {
			let tokens = estimate_tokens_value(input, Some(model));
			add(Category::ToolCalls, tokens, 1);
		},
		ContentBlock::ToolResult { content, .. } => {
			let mut tokens = 0u32;
			for nested in content {
				categorize_nested_result(nested, model, &mut tokens, add);
			}
			add(Category::ToolResults, tokens, 1);
		},
		ContentBlock::Image { .. } => {
			add(Category::Images, context_lens_tokens::IMAGE_TOKEN_ESTIMATE, 1);
		},
		ContentBlock::Fallback { raw } => {
			let tokens = estimate_tokens_value(raw, Some(model));
			add(Category::Other, tokens, 1);
		},
	}
}

/// `tool_result.content` may nest further blocks, notably images
/// (spec.md §3); images are still tallied under `Images`, and the
/// remaining text contributes to the parent `tool_results` entry's
/// token count via `tokens`.
fn categorize_nested_result(block: &ContentBlock, model: &str, tokens: &mut u32, add: &mut impl FnMut(Category, u32, u32)) {
	match block {
		ContentBlock::Image { .. } => {
			add(Category::Images, context_lens_tokens::IMAGE_TOKEN_ESTIMATE, 1);
		},
		other => {
			*tokens += estimate_tokens_value(&block_to_value(other), Some(model));
			let _ = other;
		},
	}
}

fn block_to_value(block: &ContentBlock) -> Value {
	serde_json::to_value(block).unwrap_or(Value::Null)
}

fn text_category_for_role(role: &str) -> Category {
	if role == "assistant" {
		Category::AssistantText
	} else {
		Category::UserText
	}
}

fn pct_of(tokens: u32, total: u32) -> f64 {
	if total == 0 {
		return 0.0;
	}
	((tokens as f64 / total as f64) * 1000.0).round() / 10.0
}

/// Proportionally rescales every entry so the sum matches
/// `target_total` exactly, fixing the rounding residual on the largest
/// entry (spec.md §4.H, sharing the normalizer's redistribution rule).
pub fn normalize_composition(entries: &mut Vec<CompositionEntry>, target_total: u32) {
	let values: Vec<u32> = entries.iter().map(|e| e.tokens).collect();
	let rescaled = redistribute_residual(&values, target_total);
	for (entry, tokens) in entries.iter_mut().zip(rescaled.iter()) {
		entry.tokens = *tokens;
	}
	for entry in entries.iter_mut() {
		entry.pct = pct_of(entry.tokens, target_total);
	}
	entries.sort_by(|a, b| b.tokens.cmp(&a.tokens));
}

trait SortByTokensDesc {
	fn tap_sort(self) -> Self;
}

impl SortByTokensDesc for Vec<CompositionEntry> {
	fn tap_sort(mut self) -> Self {
		self.sort_by(|a, b| b.tokens.cmp(&a.tokens));
		self
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use context_lens_core::{ApiFormat, Provider, SystemPrompt};
	use serde_json::json;

	fn sample_context() -> ContextInfo {
		let mut info = ContextInfo {
			provider: Provider::Anthropic,
			api_format: ApiFormat::AnthropicMessages,
			model: "claude-sonnet-4-5".to_string(),
			system_prompts: vec![SystemPrompt { content: "You are helpful.".to_string() }],
			tools: vec![json!({"name": "bash", "description": "run a shell command"})],
			messages: vec![
				ParsedMessage {
					role: "user".to_string(),
					content: "Hello".to_string(),
					content_blocks: None,
					tokens: 2,
				},
				ParsedMessage {
					role: "assistant".to_string(),
					content: "Hi there".to_string(),
					content_blocks: Some(vec![ContentBlock::Text { text: "Hi there".to_string() }]),
					tokens: 2,
				},
			],
			system_tokens: 4,
			tools_tokens: 6,
			messages_tokens: 4,
			total_tokens: 14,
		};
		info.recompute_totals();
		info
	}

	#[test]
	fn categorizes_system_tools_and_text() {
		let composition = compute_composition(&sample_context());
		let categories: Vec<Category> = composition.iter().map(|e| e.category).collect();
		assert!(categories.contains(&Category::SystemPrompt));
		assert!(categories.contains(&Category::ToolDefinitions));
		assert!(categories.contains(&Category::UserText));
		assert!(categories.contains(&Category::AssistantText));
	}

	#[test]
	fn sorted_by_tokens_descending() {
		let composition = compute_composition(&sample_context());
		for pair in composition.windows(2) {
			assert!(pair[0].tokens >= pair[1].tokens);
		}
	}

	#[test]
	fn system_reminder_text_becomes_system_injection() {
		let mut context = sample_context();
		context.messages[0].content = "<system-reminder>careful</system-reminder>".to_string();
		context.messages[0].content_blocks = None;
		let composition = compute_composition(&context);
		assert!(composition.iter().any(|e| e.category == Category::SystemInjections));
	}

	#[test]
	fn normalize_composition_sums_to_target() {
		let mut composition = compute_composition(&sample_context());
		normalize_composition(&mut composition, 1_000);
		let sum: u32 = composition.iter().map(|e| e.tokens).sum();
		assert_eq!(sum, 1_000);
	}
}
