//! responses / chatgpt-backend parse mode (spec.md §4.C). Both the
//! standalone Responses API and the ChatGPT backend's internal variant
//! of it share this typed-item shape.

use context_lens_core::{ApiFormat, ContentBlock, ContextInfo, ParsedMessage, Provider, SystemPrompt};
use context_lens_tokens::estimate_tokens_value;
use serde_json::Value;

use super::common::flatten_blocks;

pub fn parse(body: &Value, provider: Provider, api_format: ApiFormat) -> ContextInfo {
	let model = body.get("model").and_then(Value::as_str).unwrap_or_default().to_string();
	let model_hint = Some(model.as_str());

	let mut system_prompts = Vec::new();
	if let Some(s) = body.get("instructions").and_then(Value::as_str) {
		system_prompts.push(SystemPrompt { content: s.to_string() });
	}
	if let Some(s) = body.get("system").and_then(Value::as_str) {
		system_prompts.push(SystemPrompt { content: s.to_string() });
	}

	let tools = body.get("tools").and_then(Value::as_array).cloned().unwrap_or_default();

	let messages = if let Some(items) = body.get("input").and_then(Value::as_array) {
		items.iter().map(|item| parse_input_item(item, model_hint)).collect()
	} else if let Some(items) = body.get("messages").and_then(Value::as_array) {
		items.iter().map(|item| parse_plain_message(item, model_hint)).collect()
	} else if let Some(s) = body.get("input").and_then(Value::as_str) {
		vec![ParsedMessage {
			role: "user".to_string(),
			content: s.to_string(),
			content_blocks: None,
			tokens: estimate_tokens_value(&Value::String(s.to_string()), model_hint),
		}]
	} else {
		Vec::new()
	};

	let system_tokens: u32 = system_prompts
		.iter()
		.map(|sp| estimate_tokens_value(&Value::String(sp.content.clone()), model_hint))
		.sum();
	let tools_tokens = if tools.is_empty() { 0 } else { estimate_tokens_value(&Value::Array(tools.clone()), model_hint) };

	let mut info = ContextInfo {
		provider,
		api_format,
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

fn parse_plain_message(item: &Value, model_hint: Option<&str>) -> ParsedMessage {
	let role = item.get("role").and_then(Value::as_str).unwrap_or("user").to_string();
	let content = item.get("content").and_then(Value::as_str).unwrap_or_default().to_string();
	let tokens = estimate_tokens_value(&Value::String(content.clone()), model_hint);
	ParsedMessage { role, content, content_blocks: None, tokens }
}

fn parse_input_item(item: &Value, model_hint: Option<&str>) -> ParsedMessage {
	let item_type = item.get("type").and_then(Value::as_str).unwrap_or("message");
	match item_type {
		"message" => parse_message_item(item, model_hint),
		"function_call" | "custom_tool_call" => parse_function_call(item, model_hint),
		"function_call_output" | "custom_tool_call_output" => parse_function_call_output(item, model_hint),
		"reasoning" => parse_reasoning(item, model_hint),
		"output_text" => parse_bare_text(item, "assistant", true, model_hint),
		"input_text" => parse_bare_text(item, "user", false, model_hint),
		_ => ParsedMessage {
			role: item.get("role").and_then(Value::as_str).unwrap_or("user").to_string(),
			content: item.to_string(),
			content_blocks: Some(vec![ContentBlock::Fallback { raw: item.clone() }]),
			tokens: estimate_tokens_value(item, model_hint),
		},
	}
}

fn parse_message_item(item: &Value, model_hint: Option<&str>) -> ParsedMessage {
	let role = item.get("role").and_then(Value::as_str).unwrap_or("user").to_string();
	let content_value = item.get("content").cloned().unwrap_or(Value::String(String::new()));

	let (content, content_blocks) = match &content_value {
		Value::Array(parts) => {
			let blocks: Vec<ContentBlock> = parts.iter().map(responses_content_part).collect();
			(flatten_blocks(&blocks), Some(blocks))
		},
		Value::String(s) => (s.clone(), None),
		other => (other.to_string(), None),
	};

	let tokens = estimate_tokens_value(&content_value, model_hint);
	ParsedMessage { role, content, content_blocks, tokens }
}

fn responses_content_part(part: &Value) -> ContentBlock {
	match part.get("type").and_then(Value::as_str).unwrap_or("") {
		"output_text" => ContentBlock::Text { text: part.get("text").and_then(Value::as_str).unwrap_or_default().to_string() },
		"input_text" => {
			ContentBlock::InputText { text: part.get("text").and_then(Value::as_str).unwrap_or_default().to_string() }
		},
		"input_image" => {
			ContentBlock::Image { media_type: part.get("image_url").and_then(Value::as_str).map(|_| "image".to_string()) }
		},
		_ => ContentBlock::Fallback { raw: part.clone() },
	}
}

fn parse_function_call(item: &Value, model_hint: Option<&str>) -> ParsedMessage {
	let name = item.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
	let id = item
		.get("call_id")
		.or_else(|| item.get("id"))
		.and_then(Value::as_str)
		.unwrap_or_default()
		.to_string();
	let input = match item.get("arguments") {
		Some(Value::String(s)) => serde_json::from_str(s).unwrap_or(Value::String(s.clone())),
		Some(other) => other.clone(),
		None => Value::Null,
	};
	let block = ContentBlock::ToolUse { id, name: name.clone(), input };
	let content = format!("[tool_use:{name}]");
	ParsedMessage {
		role: "assistant".to_string(),
		content,
		content_blocks: Some(vec![block]),
		tokens: estimate_tokens_value(item, model_hint),
	}
}

fn parse_function_call_output(item: &Value, model_hint: Option<&str>) -> ParsedMessage {
	let tool_use_id = item
		.get("call_id")
		.or_else(|| item.get("id"))
		.and_then(Value::as_str)
		.unwrap_or_default()
		.to_string();
	let output_text = match item.get("output") {
		Some(Value::String(s)) => s.clone(),
		Some(other) => other.to_string(),
		None => String::new(),
	};
	let block = ContentBlock::ToolResult {
		tool_use_id,
		content: vec![ContentBlock::Text { text: output_text.clone() }],
		is_error: false,
	};
	ParsedMessage {
		role: "user".to_string(),
		content: output_text,
		content_blocks: Some(vec![block]),
		tokens: estimate_tokens_value(item, model_hint),
	}
}

fn parse_reasoning(item: &Value, model_hint: Option<&str>) -> ParsedMessage {
	let text = item
		.get("summary")
		.and_then(Value::as_array)
		.map(|parts| {
			parts
				.iter()
				.filter_map(|p| p.get("text").and_then(Value::as_str))
				.collect::<Vec<_>>()
				.join("\n")
		})
		.unwrap_or_default();
	let block = ContentBlock::Thinking { text: text.clone() };
	ParsedMessage {
		role: "assistant".to_string(),
		content: text,
		content_blocks: Some(vec![block]),
		tokens: estimate_tokens_value(item, model_hint),
	}
}

fn parse_bare_text(item: &Value, role: &str, is_output: bool, model_hint: Option<&str>) -> ParsedMessage {
	let text = item.get("text").and_then(Value::as_str).unwrap_or_default().to_string();
	let block =
		if is_output { ContentBlock::Text { text: text.clone() } } else { ContentBlock::InputText { text: text.clone() } };
	ParsedMessage {
		role: role.to_string(),
		content: text.clone(),
		content_blocks: Some(vec![block]),
		tokens: estimate_tokens_value(&Value::String(text), model_hint),
	}
}
