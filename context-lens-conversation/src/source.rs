//! Fallback source-tool detection (spec.md §4.F step 3): when a request
//! carries no explicit path prefix (component B's `extract_source`
//! returned `None`), look for a known tool's fingerprint first in its
//! headers, then in its system prompt text.

use context_lens_core::ContextInfo;
use http::HeaderMap;

/// `(needle, source tag)`, checked against a lowercased `user-agent`
/// header value. First match wins.
const USER_AGENT_SIGNATURES: &[(&str, &str)] =
	&[("claude-cli", "claude-code"), ("claude-code", "claude-code"), ("codex-cli", "codex"), ("codex", "codex"), ("aider", "aider"), ("gemini-cli", "gemini-cli")];

/// `(needle, source tag)`, checked against the concatenated system
/// prompt text. Order matters: more specific phrases first.
const SYSTEM_PROMPT_SIGNATURES: &[(&str, &str)] = &[
	("You are Claude Code", "claude-code"),
	("You are Codex", "codex"),
	("you are aider", "aider"),
	("Gemini CLI", "gemini-cli"),
];

fn match_user_agent(headers: &HeaderMap) -> Option<&'static str> {
	let user_agent = headers.get(http::header::USER_AGENT)?.to_str().ok()?.to_ascii_lowercase();
	USER_AGENT_SIGNATURES.iter().find(|(needle, _)| user_agent.contains(needle)).map(|(_, tag)| *tag)
}

fn match_system_prompt(context: &ContextInfo) -> Option<&'static str> {
	let system_text = context.system_text();
	SYSTEM_PROMPT_SIGNATURES
		.iter()
		.find(|(needle, _)| system_text.to_ascii_lowercase().contains(&needle.to_ascii_lowercase()))
		.map(|(_, tag)| *tag)
}

/// Attempts to identify the originating tool when the request path gave
/// no explicit `source` prefix.
pub fn detect_source_tool(headers: &HeaderMap, context: &ContextInfo) -> Option<String> {
	match_user_agent(headers).or_else(|| match_system_prompt(context)).map(str::to_string)
}

#[cfg(test)]
mod tests {
	use super::*;
	use context_lens_core::{ApiFormat, Provider, SystemPrompt};

	fn headers_with_user_agent(value: &str) -> HeaderMap {
		let mut headers = HeaderMap::new();
		headers.insert(http::header::USER_AGENT, value.parse().unwrap());
		headers
	}

	#[test]
	fn detects_claude_code_via_user_agent() {
		let headers = headers_with_user_agent("claude-cli/1.2.3");
		let context = ContextInfo { provider: Provider::Anthropic, api_format: ApiFormat::AnthropicMessages, ..Default::default() };
		assert_eq!(detect_source_tool(&headers, &context), Some("claude-code".to_string()));
	}

	#[test]
	fn falls_back_to_system_prompt_signature() {
		let headers = HeaderMap::new();
		let context = ContextInfo {
			system_prompts: vec![SystemPrompt { content: "You are Codex, a coding agent.".to_string() }],
			..Default::default()
		};
		assert_eq!(detect_source_tool(&headers, &context), Some("codex".to_string()));
	}

	#[test]
	fn no_signature_found_returns_none() {
		let headers = HeaderMap::new();
		let context = ContextInfo::default();
		assert_eq!(detect_source_tool(&headers, &context), None);
	}
}
