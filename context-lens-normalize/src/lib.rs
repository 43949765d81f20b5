//! Router (component B) and normalizer (component C): turns an inbound
//! HTTP request into a classified `(provider, api_format, target_url)`
//! tuple and a provider-agnostic [`ContextInfo`], and turns a captured
//! response into a [`ParsedUsage`].

mod error;
mod normalize;
mod percent;
mod router;
mod usage;

pub use context_lens_core::{ApiFormat, ContextInfo, ParsedUsage, Provider};
pub use error::NormalizeError;
pub use normalize::{parse_context, parse_raw, rescale_context_tokens};
pub use router::{classify_request, extract_source, resolve_target_url, SourceExtraction, Upstreams};
pub use usage::{parse_non_streaming_usage, parse_streaming_usage};

/// Reserved path segments that are never mistaken for a `source` prefix
/// (spec.md §4.B); re-exported for callers (e.g. the proxy) that need
/// to reason about the same set without re-parsing the router's rules.
pub use router::RESERVED_SEGMENTS;
