//! gemini parse mode (spec.md §4.C), covering both the direct
//! Generative Language API and the Code Assist wrapper (`body.request`).

use context_lens_core::{ApiFormat, ContentBlock, ContextInfo, ParsedMessage, Provider, SystemPrompt};
use context_lens_tokens::estimate_tokens_value;
use serde_json::Value;

use super::common::flatten_blocks;

pub fn parse(body: &Value) -> ContextInfo {
	let unwrapped = body.get("request").unwrap_or(body);
	let model = unwrapped.get("model").and_then(Value::as_str).unwrap_or_default().to_string();
	let model_hint = Some(model.as_str());

	let system_prompts = unwrapped
		.pointer("/systemInstruction/parts")
		.and_then(Value::as_array)
		.map(|parts| {
			parts
				.iter()
				.filter_map(|p| p.get("text").and_then(Value::as_str))
				.map(|text| SystemPrompt { content: text.to_string() })
				.collect()
		})
		.unwrap_or_default();

	let tools: Vec<Value> = unwrapped
		.get("tools")
		.and_then(Value::as_array)
		.map(|tool_groups| {
			tool_groups
				.iter()
				.filter_map(|group| group.get("functionDeclarations").and_then(Value::as_array))
				.flatten()
				.cloned()
				.collect()
		})
		.unwrap_or_default();

	let messages = unwrapped
		.get("contents")
		.and_then(Value::as_array)
		.map(|contents| contents.iter().map(|c| parse_content(c, model_hint)).collect())
		.unwrap_or_default();

	let system_tokens: u32 = system_prompts
		.iter()
		.map(|sp| estimate_tokens_value(&Value::String(sp.content.clone()), model_hint))
		.sum();
	let tools_tokens = if tools.is_empty() { 0 } else { estimate_tokens_value(&Value::Array(tools.clone()), model_hint) };

	let mut info = ContextInfo {
		provider: Provider::Gemini,
		api_format: ApiFormat::Gemini,
		model,
		system_prompts,
		tools,
		messages,
		system_tokens,
		tools_tokens,
		messages_tokens: 0,
		total_tokens: 0,
	};
	info.recompute_totals();
	info
}

fn parse_content(c: &Value, model_hint: Option<&str>) -> ParsedMessage {
	let raw_role = c.get("role").and_then(Value::as_str).unwrap_or("user");
	let role = if raw_role == "model" { "assistant" } else { raw_role }.to_string();

	let parts_value = c.get("parts").cloned().unwrap_or(Value::Array(Vec::new()));
	let blocks: Vec<ContentBlock> = parts_value
		.as_array()
		.map(|parts| parts.iter().map(gemini_part).collect())
		.unwrap_or_default();
	let content = flatten_blocks(&blocks);
	let tokens = estimate_tokens_value(&parts_value, model_hint);

	ParsedMessage { role, content, content_blocks: Some(blocks), tokens }
}

fn gemini_part(part: &Value) -> ContentBlock {
	if let Some(text) = part.get("text").and_then(Value::as_str) {
		return ContentBlock::Text { text: text.to_string() };
	}
	if let Some(call) = part.get("functionCall") {
		let name = call.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
		let input = call.get("args").cloned().unwrap_or(Value::Null);
		return ContentBlock::ToolUse { id: name.clone(), name, input };
	}
	if let Some(response) = part.get("functionResponse") {
		let name = response.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
		let (text, is_error) = match response.get("response") {
			Some(Value::Object(map)) if map.get("output").and_then(Value::as_str).is_some() => {
				(map.get("output").and_then(Value::as_str).unwrap_or_default().to_string(), false)
			},
			Some(Value::Object(map)) if map.get("error").is_some() => {
				let err = map.get("error").unwrap();
				(err.as_str().map(str::to_string).unwrap_or_else(|| err.to_string()), true)
			},
			Some(other) => (other.to_string(), false),
			None => (String::new(), false),
		};
		return ContentBlock::ToolResult {
			tool_use_id: name,
			content: vec![ContentBlock::Text { text }],
			is_error,
		};
	}
	if let Some(inline) = part.get("inlineData") {
		let media_type = inline.get("mimeType").and_then(Value::as_str).map(str::to_string);
		return ContentBlock::Image { media_type };
	}
	ContentBlock::Fallback { raw: part.clone() }
}
