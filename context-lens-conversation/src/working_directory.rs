//! `workingDirectory` extraction (spec.md §4.D): first a handful of
//! per-tool text patterns over the system prompt and user messages,
//! then (if none matched) a depth-first walk of the raw request body
//! looking for a handful of well-known key names.

use context_lens_core::ContextInfo;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

const MAX_WALK_DEPTH: usize = 8;

const CWD_KEY_NAMES: &[&str] =
	&["cwd", "workingDirectory", "workspaceRoot", "projectRoot", "sandboxCwd", "working_directory", "workspace_root", "project_root"];

// Claude's "Primary working directory: /home/user/project"
static CLAUDE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)Primary working directory:\s*([^\n]+)").unwrap());
// Codex's `<cwd>/home/user/project</cwd>`
static CODEX_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<cwd>\s*([^<]+?)\s*</cwd>").unwrap());
// Gemini's "I'm currently working in the directory: /home/user/project"
static GEMINI_RE: Lazy<Regex> =
	Lazy::new(|| Regex::new(r"(?i)I'm currently working in the directory:\s*([^\n]+)").unwrap());
// Generic fallbacks: "working directory is/= ..." or "cwd: ..."
static GENERIC_RE: Lazy<Regex> =
	Lazy::new(|| Regex::new(r"(?i)working directory\s*(?:is|=)\s*([^\n]+)|cwd:\s*([^\n]+)").unwrap());

/// Extracts a working directory for this entry, trying text patterns
/// over the system prompt and user messages first, then falling back to
/// a raw-body key walk.
pub fn extract_working_directory(context: &ContextInfo, raw_body: &Value) -> Option<String> {
	if let Some(found) = from_text(&context.system_text()) {
		return Some(found);
	}
	for message in &context.messages {
		if message.role == "user" {
			if let Some(found) = from_text(&message.content) {
				return Some(found);
			}
		}
	}
	walk_for_cwd_key(raw_body, 0)
}

fn from_text(text: &str) -> Option<String> {
	for pattern in [&CLAUDE_RE, &CODEX_RE, &GEMINI_RE] {
		if let Some(caps) = pattern.captures(text) {
			if let Some(m) = caps.get(1) {
				return Some(m.as_str().trim().to_string());
			}
		}
	}
	if let Some(caps) = GENERIC_RE.captures(text) {
		let matched = caps.get(1).or_else(|| caps.get(2));
		if let Some(m) = matched {
			return Some(m.as_str().trim().to_string());
		}
	}
	None
}

fn walk_for_cwd_key(value: &Value, depth: usize) -> Option<String> {
	if depth > MAX_WALK_DEPTH {
		return None;
	}
	match value {
		Value::Object(map) => {
			for key_name in CWD_KEY_NAMES {
				if let Some(Value::String(s)) = map.get(*key_name) {
					if looks_like_path(s) {
						return Some(s.clone());
					}
				}
			}
			for v in map.values() {
				if let Some(found) = walk_for_cwd_key(v, depth + 1) {
					return Some(found);
				}
			}
			None
		},
		Value::Array(items) => items.iter().find_map(|v| walk_for_cwd_key(v, depth + 1)),
		_ => None,
	}
}

/// A cheap heuristic for "this string looks like a filesystem path":
/// POSIX absolute (`/...`), home-relative (`~/...`), or Windows
/// absolute (`C:\...`).
fn looks_like_path(s: &str) -> bool {
	s.starts_with('/')
		|| s.starts_with("~/")
		|| (s.len() >= 3 && s.as_bytes()[1] == b':' && (s.as_bytes()[2] == b'\\' || s.as_bytes()[2] == b'/'))
}

#[cfg(test)]
mod tests {
	use super::*;
	use context_lens_core::{ApiFormat, ParsedMessage, Provider, SystemPrompt};
	use serde_json::json;

	fn context(system: &str, user_text: &str) -> ContextInfo {
		let mut info = ContextInfo {
			provider: Provider::Anthropic,
			api_format: ApiFormat::AnthropicMessages,
			model: "claude-sonnet-4-5".to_string(),
			system_prompts: vec![SystemPrompt { content: system.to_string() }],
			tools: Vec::new(),
			messages: vec![ParsedMessage { role: "user".to_string(), content: user_text.to_string(), content_blocks: None, tokens: 1 }],
			system_tokens: 1,
			tools_tokens: 0,
			messages_tokens: 1,
			total_tokens: 2,
		};
		info.recompute_totals();
		info
	}

	#[test]
	fn finds_claude_style_system_prompt_phrase() {
		let ctx = context("Primary working directory: /home/user/project\nOther stuff.", "hi");
		assert_eq!(extract_working_directory(&ctx, &json!({})).as_deref(), Some("/home/user/project"));
	}

	#[test]
	fn finds_codex_cwd_tag_in_user_text() {
		let ctx = context("", "<cwd>/home/user/repo</cwd>\nFix the bug");
		assert_eq!(extract_working_directory(&ctx, &json!({})).as_deref(), Some("/home/user/repo"));
	}

	#[test]
	fn finds_gemini_style_phrase() {
		let ctx = context("I'm currently working in the directory: /srv/app\n", "hi");
		assert_eq!(extract_working_directory(&ctx, &json!({})).as_deref(), Some("/srv/app"));
	}

	#[test]
	fn falls_back_to_raw_body_key_walk() {
		let ctx = context("", "hi");
		let body = json!({"metadata": {"workspaceRoot": "/home/user/other-project"}});
		assert_eq!(extract_working_directory(&ctx, &body).as_deref(), Some("/home/user/other-project"));
	}

	#[test]
	fn rejects_non_path_looking_values_in_raw_body() {
		let ctx = context("", "hi");
		let body = json!({"cwd": "not-a-path"});
		assert_eq!(extract_working_directory(&ctx, &body), None);
	}

	#[test]
	fn returns_none_when_nothing_matches() {
		let ctx = context("", "hi");
		assert_eq!(extract_working_directory(&ctx, &json!({})), None);
	}
}
