//! chat-completions parse mode (spec.md §4.C).

use context_lens_core::{ApiFormat, ContentBlock, ContextInfo, ParsedMessage, Provider, SystemPrompt};
use context_lens_tokens::estimate_tokens_value;
use serde_json::Value;

use super::common::flatten_blocks;

pub fn parse(body: &Value) -> ContextInfo {
	let model = body.get("model").and_then(Value::as_str).unwrap_or_default().to_string();
	let model_hint = Some(model.as_str());

	let mut system_prompts = Vec::new();
	let mut messages = Vec::new();

	if let Some(items) = body.get("messages").and_then(Value::as_array) {
		for item in items {
			let role = item.get("role").and_then(Value::as_str).unwrap_or("user");
			if role == "system" || role == "developer" {
				if let Some(text) = text_content(item) {
					system_prompts.push(SystemPrompt { content: text });
				}
				continue;
			}
			messages.push(parse_message(item, model_hint));
		}
	}

	// `tools` (current) takes priority over the legacy `functions` field;
	// both are stored verbatim since downstream consumers only need the
	// token count, not a normalized shape.
	let tools = body
		.get("tools")
		.and_then(Value::as_array)
		.or_else(|| body.get("functions").and_then(Value::as_array))
		.cloned()
		.unwrap_or_default();

	let system_tokens: u32 = system_prompts
		.iter()
		.map(|sp| estimate_tokens_value(&Value::String(sp.content.clone()), model_hint))
		.sum();
	let tools_tokens = if tools.is_empty() { 0 } else { estimate_tokens_value(&Value::Array(tools.clone()), model_hint) };

	let mut info = ContextInfo {
		provider: Provider::Openai,
		api_format: ApiFormat::ChatCompletions,
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

fn text_content(item: &Value) -> Option<String> {
	match item.get("content") {
		Some(Value::String(s)) => Some(s.clone()),
		Some(Value::Array(parts)) => Some(
			parts
				.iter()
				.filter_map(|p| p.get("text").and_then(Value::as_str))
				.collect::<Vec<_>>()
				.join("\n"),
		),
		_ => None,
	}
}

fn parse_message(item: &Value, model_hint: Option<&str>) -> ParsedMessage {
	let role = item.get("role").and_then(Value::as_str).unwrap_or("user").to_string();
	let content_value = item.get("content").cloned().unwrap_or(Value::String(String::new()));

	let (content, content_blocks) = match &content_value {
		Value::Array(parts) => {
			let blocks: Vec<ContentBlock> = parts
				.iter()
				.map(|p| match p.get("type").and_then(Value::as_str) {
					Some("text") => ContentBlock::Text { text: p.get("text").and_then(Value::as_str).unwrap_or_default().to_string() },
					Some("image_url") => ContentBlock::Image { media_type: Some("image_url".to_string()) },
					_ => ContentBlock::Fallback { raw: p.clone() },
				})
				.collect();
			(flatten_blocks(&blocks), Some(blocks))
		},
		Value::String(s) => (s.clone(), None),
		other => (other.to_string(), None),
	};

	let tokens = estimate_tokens_value(&content_value, model_hint);
	ParsedMessage { role, content, content_blocks, tokens }
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn system_and_developer_roles_become_system_prompts() {
		let body = json!({
			"model": "gpt-4o",
			"messages": [
				{"role": "system", "content": "Be terse."},
				{"role": "developer", "content": "Follow house style."},
				{"role": "user", "content": "Hi"},
			],
		});
		let info = parse(&body);
		assert_eq!(info.system_prompts.len(), 2);
		assert_eq!(info.messages.len(), 1);
		assert_eq!(info.messages[0].role, "user");
	}

	#[test]
	fn legacy_functions_used_when_tools_absent() {
		let body = json!({
			"model": "gpt-4o",
			"messages": [],
			"functions": [{"name": "legacy_fn"}],
		});
		let info = parse(&body);
		assert_eq!(info.tools.len(), 1);
	}

	#[test]
	fn tools_takes_priority_over_functions() {
		let body = json!({
			"model": "gpt-4o",
			"messages": [],
			"tools": [{"type": "function", "function": {"name": "new_fn"}}],
			"functions": [{"name": "legacy_fn"}],
		});
		let info = parse(&body);
		assert_eq!(info.tools.len(), 1);
		assert_eq!(info.tools[0]["function"]["name"], "new_fn");
	}
}
