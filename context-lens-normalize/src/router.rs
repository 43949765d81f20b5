//! `extract_source`, `classify_request`, `resolve_target_url` — pure
//! decision tables over the request path/headers, none of which touch
//! the network. Each classification rule below is annotated with the
//! scenario number it encodes.

use std::net::IpAddr;

use context_lens_core::{ApiFormat, Provider};
use http::HeaderMap;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::percent::percent_decode;

/// First-path-segment tokens that belong to an upstream API surface,
/// never a `source` prefix.
pub const RESERVED_SEGMENTS: &[&str] = &[
	"v1",
	"v1beta",
	"v1alpha",
	"v1beta1",
	"v1internal",
	"responses",
	"chat",
	"models",
	"embeddings",
	"backend-api",
	"api",
];

/// Result of `extract_source`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceExtraction {
	pub source: Option<String>,
	pub clean_path: String,
}

/// Splits an optional client-identifying prefix off the front of
/// `path`, e.g. `/claude-code/v1/messages` → `source="claude-code"`,
/// `clean_path="/v1/messages"`.
pub fn extract_source(path: &str) -> SourceExtraction {
	let trimmed = path.strip_prefix('/').unwrap_or(path);
	let (first, rest) = match trimmed.split_once('/') {
		Some((f, r)) => (f, Some(r)),
		None => (trimmed, None),
	};

	if first.is_empty() || RESERVED_SEGMENTS.contains(&first) {
		return SourceExtraction { source: None, clean_path: path.to_string() };
	}

	let decoded = match percent_decode(first) {
		Some(d) => d,
		None => return SourceExtraction { source: None, clean_path: path.to_string() },
	};

	if decoded.contains('/') || decoded.contains('\\') || decoded.contains("..") {
		return SourceExtraction { source: None, clean_path: path.to_string() };
	}

	let clean_path = match rest {
		Some(r) => format!("/{r}"),
		None => "/".to_string(),
	};

	SourceExtraction { source: Some(decoded), clean_path }
}

static VERTEX_PUBLISHER_RE: Lazy<Regex> =
	Lazy::new(|| Regex::new(r"/v1[^/]*/projects/[^/]+/locations/[^/]+/publishers/google/models/").unwrap());
static GEMINI_METHOD_RE: Lazy<Regex> =
	Lazy::new(|| Regex::new(r":(generateContent|streamGenerateContent)|/v1(beta|alpha)/models/|/v1internal:").unwrap());
static VERTEX_LOCATION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"/locations/([^/]+)/").unwrap());

/// Classifies a cleaned request path (plus headers) into
/// `(provider, api_format)`. Evaluated in this exact order; first
/// match wins — mirrors spec.md §8 scenarios 1-3 one rule at a time.
pub fn classify_request(clean_path: &str, headers: &HeaderMap) -> (Provider, ApiFormat) {
	// Rule 1: scenario — ChatGPT backend passthrough.
	if clean_path.starts_with("/api/") || clean_path.starts_with("/backend-api/") {
		return (Provider::Chatgpt, ApiFormat::ChatgptBackend);
	}
	// Rule 2: scenario — Anthropic Messages API.
	if clean_path.contains("/v1/messages") {
		return (Provider::Anthropic, ApiFormat::AnthropicMessages);
	}
	// Rule 3: legacy Anthropic completions.
	if clean_path.contains("/v1/complete") {
		return (Provider::Anthropic, ApiFormat::Unknown);
	}
	// Rule 4: Anthropic SDK signature header with an otherwise unmatched path.
	if headers.contains_key("anthropic-version") {
		return (Provider::Anthropic, ApiFormat::Unknown);
	}
	// Rule 5: scenario — Vertex AI's Gemini-on-Vertex publisher path.
	if VERTEX_PUBLISHER_RE.is_match(clean_path) {
		return (Provider::Vertex, ApiFormat::Gemini);
	}
	// Rule 6: direct Gemini API surface.
	if GEMINI_METHOD_RE.is_match(clean_path) {
		return (Provider::Gemini, ApiFormat::Gemini);
	}
	// Rule 7: Gemini API-key header with an otherwise unmatched path.
	if headers.contains_key("x-goog-api-key") {
		return (Provider::Gemini, ApiFormat::Gemini);
	}
	// Rule 8: OpenAI Responses API.
	if clean_path.contains("/responses") {
		return (Provider::Openai, ApiFormat::Responses);
	}
	// Rule 9: OpenAI Chat Completions.
	if clean_path.contains("/chat/completions") {
		return (Provider::Openai, ApiFormat::ChatCompletions);
	}
	// Rule 10: other OpenAI surfaces with no body shape of their own.
	if clean_path.contains("/models") || clean_path.contains("/embeddings") {
		return (Provider::Openai, ApiFormat::Unknown);
	}
	// Rule 11: bearer token shaped like an OpenAI secret key.
	if let Some(auth) = headers.get(http::header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
		if auth.starts_with("Bearer sk-") {
			return (Provider::Openai, ApiFormat::Unknown);
		}
	}
	// Rule 12: no rule matched.
	(Provider::Unknown, ApiFormat::Unknown)
}

/// Per-provider default upstream base URLs, overridable via
/// `UPSTREAM_{PROVIDER}_URL` environment variables (spec.md §6) when
/// constructed by the binary crate.
#[derive(Debug, Clone)]
pub struct Upstreams {
	pub anthropic: String,
	pub openai: String,
	pub chatgpt: String,
	pub gemini: String,
	pub gemini_code_assist: String,
	pub vertex: String,
}

impl Default for Upstreams {
	fn default() -> Self {
		Self {
			anthropic: "https://api.anthropic.com".to_string(),
			openai: "https://api.openai.com".to_string(),
			chatgpt: "https://chatgpt.com".to_string(),
			gemini: "https://generativelanguage.googleapis.com".to_string(),
			gemini_code_assist: "https://cloudcode-pa.googleapis.com".to_string(),
			vertex: "https://aiplatform.googleapis.com".to_string(),
		}
	}
}

impl Upstreams {
	fn base_for(&self, provider: Provider) -> &str {
		match provider {
			Provider::Anthropic => &self.anthropic,
			Provider::Openai => &self.openai,
			Provider::Chatgpt => &self.chatgpt,
			Provider::Gemini => &self.gemini,
			Provider::Vertex => &self.vertex,
			Provider::Unknown => &self.anthropic,
		}
	}
}

/// Returns `true` when `addr` is a loopback address, gating the
/// `x-target-url` override per spec.md §4.B.
fn is_loopback(addr: Option<IpAddr>) -> bool {
	addr.map(|a| a.is_loopback()).unwrap_or(false)
}

/// Resolves the final upstream URL for a classified request.
///
/// `path_and_query` is the original request's path-plus-query (not the
/// `clean_path` returned by `extract_source` — the upstream still sees
/// the client's full path including any `source` prefix it rejected).
pub fn resolve_target_url(
	path_and_query: &str,
	headers: &HeaderMap,
	upstreams: &Upstreams,
	remote_addr: Option<IpAddr>,
	allow_target_override: bool,
	provider: Provider,
) -> String {
	if allow_target_override && is_loopback(remote_addr) {
		if let Some(target) = headers.get("x-target-url").and_then(|v| v.to_str().ok()) {
			if target.contains("://") {
				return target.to_string();
			}
			return format!("{target}{path_and_query}");
		}
	}

	if provider == Provider::Vertex {
		if let Some(captures) = VERTEX_LOCATION_RE.captures(path_and_query) {
			let location = &captures[1];
			if location != "global" {
				return format!("https://{location}-aiplatform.googleapis.com{path_and_query}");
			}
		}
		return format!("{}{path_and_query}", upstreams.vertex);
	}

	format!("{}{path_and_query}", upstreams.base_for(provider))
}

#[cfg(test)]
mod tests {
	use super::*;

	fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
		let mut map = HeaderMap::new();
		for (k, v) in pairs {
			map.insert(http::HeaderName::from_bytes(k.as_bytes()).unwrap(), v.parse().unwrap());
		}
		map
	}

	#[test]
	fn extract_source_strips_non_reserved_prefix() {
		let out = extract_source("/claude-code/v1/messages");
		assert_eq!(out.source.as_deref(), Some("claude-code"));
		assert_eq!(out.clean_path, "/v1/messages");
	}

	#[test]
	fn extract_source_leaves_reserved_paths_alone() {
		let out = extract_source("/v1/messages");
		assert_eq!(out.source, None);
		assert_eq!(out.clean_path, "/v1/messages");
	}

	#[test]
	fn extract_source_rejects_traversal() {
		let out = extract_source("/..%2fetc/v1/messages");
		assert_eq!(out.source, None);
		assert_eq!(out.clean_path, "/..%2fetc/v1/messages");
	}

	#[test]
	fn classify_anthropic_messages() {
		let (provider, format) = classify_request("/v1/messages", &headers(&[]));
		assert_eq!(provider, Provider::Anthropic);
		assert_eq!(format, ApiFormat::AnthropicMessages);
	}

	#[test]
	fn classify_chatgpt_backend_before_responses() {
		let (provider, format) = classify_request("/backend-api/codex/responses", &headers(&[]));
		assert_eq!(provider, Provider::Chatgpt);
		assert_eq!(format, ApiFormat::ChatgptBackend);
	}

	#[test]
	fn classify_vertex_publisher_path() {
		let (provider, format) = classify_request(
			"/v1/projects/my-proj/locations/us-central1/publishers/google/models/gemini-2.5-pro:generateContent",
			&headers(&[]),
		);
		assert_eq!(provider, Provider::Vertex);
		assert_eq!(format, ApiFormat::Gemini);
	}

	#[test]
	fn classify_gemini_by_api_key_header() {
		let (provider, format) = classify_request("/v1/models/gemini-2.5-pro", &headers(&[("x-goog-api-key", "k")]));
		assert_eq!(provider, Provider::Gemini);
		assert_eq!(format, ApiFormat::Gemini);
	}

	#[test]
	fn classify_openai_responses() {
		let (provider, format) = classify_request("/v1/responses", &headers(&[]));
		assert_eq!(provider, Provider::Openai);
		assert_eq!(format, ApiFormat::Responses);
	}

	#[test]
	fn classify_openai_by_bearer_sk_prefix() {
		let (provider, format) =
			classify_request("/something-unrecognized", &headers(&[("authorization", "Bearer sk-abc123")]));
		assert_eq!(provider, Provider::Openai);
		assert_eq!(format, ApiFormat::Unknown);
	}

	#[test]
	fn classify_falls_through_to_unknown() {
		let (provider, format) = classify_request("/nope", &headers(&[]));
		assert_eq!(provider, Provider::Unknown);
		assert_eq!(format, ApiFormat::Unknown);
	}

	#[test]
	fn resolve_vertex_location_overrides_default() {
		let url = resolve_target_url(
			"/v1/projects/p/locations/us-east1/publishers/google/models/gemini-2.5-pro:generateContent",
			&headers(&[]),
			&Upstreams::default(),
			None,
			false,
			Provider::Vertex,
		);
		assert!(url.starts_with("https://us-east1-aiplatform.googleapis.com"));
	}

	#[test]
	fn resolve_vertex_global_uses_default_base() {
		let url = resolve_target_url(
			"/v1/projects/p/locations/global/publishers/google/models/gemini-2.5-pro:generateContent",
			&headers(&[]),
			&Upstreams::default(),
			None,
			false,
			Provider::Vertex,
		);
		assert!(url.starts_with("https://aiplatform.googleapis.com"));
	}

	#[test]
	fn resolve_target_override_requires_loopback() {
		let loopback = Some("127.0.0.1".parse().unwrap());
		let remote = Some("8.8.8.8".parse().unwrap());
		let h = headers(&[("x-target-url", "https://evil.example.com")]);

		let from_loopback = resolve_target_url("/v1/messages", &h, &Upstreams::default(), loopback, true, Provider::Anthropic);
		assert_eq!(from_loopback, "https://evil.example.com");

		let from_remote = resolve_target_url("/v1/messages", &h, &Upstreams::default(), remote, true, Provider::Anthropic);
		assert!(from_remote.starts_with("https://api.anthropic.com"));
	}

	#[test]
	fn resolve_target_override_disabled_by_config() {
		let loopback = Some("127.0.0.1".parse().unwrap());
		let h = headers(&[("x-target-url", "https://evil.example.com")]);
		let url = resolve_target_url("/v1/messages", &h, &Upstreams::default(), loopback, false, Provider::Anthropic);
		assert!(url.starts_with("https://api.anthropic.com"));
	}

	#[test]
	fn resolve_target_override_without_scheme_is_concatenated() {
		let loopback = Some("127.0.0.1".parse().unwrap());
		let h = headers(&[("x-target-url", "internal-host:9000")]);
		let url = resolve_target_url("/v1/messages?x=1", &h, &Upstreams::default(), loopback, true, Provider::Anthropic);
		assert_eq!(url, "internal-host:9000/v1/messages?x=1");
	}
}
