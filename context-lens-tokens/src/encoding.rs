//! Encoding-family resolution.
//!
//! Only two families are recognized (spec.md §4.A). Which family a model
//! maps to only matters once a real BPE tokenizer is plugged into
//! [`crate::Tokenizer`]; today every family falls back to the same
//! `ceil(len/4)` estimate, but keeping the resolution step means that
//! swap is a one-file change.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EncodingFamily {
	Cl100kBase,
	O200kBase,
}

/// `(prefix, family)`, longest prefix wins. Models not matching any
/// prefix here resolve to `Cl100kBase` (spec.md: "unknown -> cl100k_base").
const PREFIXES: &[(&str, EncodingFamily)] = &[
	("gpt-4o", EncodingFamily::O200kBase),
	("chatgpt-4o", EncodingFamily::O200kBase),
	("gpt-4.1", EncodingFamily::O200kBase),
	("gpt-4.5", EncodingFamily::O200kBase),
	("gpt-5", EncodingFamily::O200kBase),
	("o1", EncodingFamily::O200kBase),
	("o3", EncodingFamily::O200kBase),
	("o4", EncodingFamily::O200kBase),
	("text-embedding-3", EncodingFamily::O200kBase),
	("claude", EncodingFamily::Cl100kBase),
	("gpt-4", EncodingFamily::Cl100kBase),
	("gpt-3.5", EncodingFamily::Cl100kBase),
	("gemini", EncodingFamily::Cl100kBase),
];

/// Resolves `model` (matched as a substring/prefix, per spec.md §3's
/// "free-form string matched as substring against pricing/limit tables")
/// to an encoding family by longest matching prefix.
pub fn resolve_encoding_family(model: &str) -> EncodingFamily {
	let model = model.to_ascii_lowercase();
	PREFIXES
		.iter()
		.filter(|(prefix, _)| model.contains(prefix))
		.max_by_key(|(prefix, _)| prefix.len())
		.map(|(_, family)| *family)
		.unwrap_or(EncodingFamily::Cl100kBase)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn gpt4o_is_o200k() {
		assert_eq!(resolve_encoding_family("gpt-4o-2024-08-06"), EncodingFamily::O200kBase);
	}

	#[test]
	fn claude_is_cl100k() {
		assert_eq!(resolve_encoding_family("claude-sonnet-4-20250514"), EncodingFamily::Cl100kBase);
	}

	#[test]
	fn unknown_defaults_cl100k() {
		assert_eq!(resolve_encoding_family("some-unheard-of-model"), EncodingFamily::Cl100kBase);
	}

	#[test]
	fn longest_prefix_wins_over_shorter_overlap() {
		// "gpt-4.1" should win over the shorter "gpt-4" entry.
		assert_eq!(resolve_encoding_family("gpt-4.1-mini"), EncodingFamily::O200kBase);
	}
}
