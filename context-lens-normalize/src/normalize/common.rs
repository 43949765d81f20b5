//! Shared content-block conversion helpers used by more than one of the
//! five parse modes (spec.md §4.C). Anthropic, Gemini, and the
//! Responses API all encode "blocks" in slightly different shapes but
//! converge on the same [`ContentBlock`] enum.

use context_lens_core::ContentBlock;
use context_lens_tokens::estimate_tokens_value;
use serde_json::Value;

/// Converts one Anthropic-style content block (`{"type": "...", ...}`)
/// into our internal representation. Unknown shapes are preserved as
/// [`ContentBlock::Fallback`] rather than dropped.
pub fn anthropic_block(v: &Value) -> ContentBlock {
	let kind = v.get("type").and_then(Value::as_str).unwrap_or("");
	match kind {
		"text" => ContentBlock::Text { text: v.get("text").and_then(Value::as_str).unwrap_or_default().to_string() },
		"thinking" => {
			ContentBlock::Thinking { text: v.get("thinking").and_then(Value::as_str).unwrap_or_default().to_string() }
		},
		"tool_use" => ContentBlock::ToolUse {
			id: v.get("id").and_then(Value::as_str).unwrap_or_default().to_string(),
			name: v.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
			input: v.get("input").cloned().unwrap_or(Value::Null),
		},
		"tool_result" => {
			let tool_use_id = v.get("tool_use_id").and_then(Value::as_str).unwrap_or_default().to_string();
			let is_error = v.get("is_error").and_then(Value::as_bool).unwrap_or(false);
			let content = match v.get("content") {
				Some(Value::String(s)) => vec![ContentBlock::Text { text: s.clone() }],
				Some(Value::Array(items)) => items.iter().map(anthropic_block).collect(),
				_ => Vec::new(),
			};
			ContentBlock::ToolResult { tool_use_id, content, is_error }
		},
		"image" => {
			let media_type = v.pointer("/source/media_type").and_then(Value::as_str).map(str::to_string);
			ContentBlock::Image { media_type }
		},
		_ => ContentBlock::Fallback { raw: v.clone() },
	}
}

/// Produces a short plain-text rendering of a block list for display
/// and for the naive-concatenation fallback path; the authoritative
/// token count is always computed from the original JSON, not from
/// this string.
pub fn flatten_blocks(blocks: &[ContentBlock]) -> String {
	blocks
		.iter()
		.map(flatten_block)
		.collect::<Vec<_>>()
		.join("\n")
}

fn flatten_block(block: &ContentBlock) -> String {
	match block {
		ContentBlock::Text { text } | ContentBlock::InputText { text } | ContentBlock::Thinking { text } => {
			text.clone()
		},
		ContentBlock::ToolUse { name, .. } => format!("[tool_use:{name}]"),
		ContentBlock::ToolResult { content, .. } => flatten_blocks(content),
		ContentBlock::Image { .. } => "[image]".to_string(),
		ContentBlock::Fallback { raw } => raw.to_string(),
	}
}

/// Estimates the token count for one message's content, operating on
/// the original JSON value (string or block array) so image detection
/// in A's estimator sees the real shape.
pub fn estimate_message_tokens(content_value: &Value, model: Option<&str>) -> u32 {
	estimate_tokens_value(content_value, model)
}
