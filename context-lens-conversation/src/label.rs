//! `label` (spec.md §4.D): the first 80 characters of the first
//! readable user text, or a placeholder when there is none.

const MAX_LABEL_CHARS: usize = 80;
const UNNAMED: &str = "Unnamed conversation";

pub fn conversation_label(first_user_text: Option<&str>) -> String {
	match first_user_text {
		Some(text) if !text.trim().is_empty() => truncate_chars(text.trim(), MAX_LABEL_CHARS),
		_ => UNNAMED.to_string(),
	}
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
	text.chars().take(max_chars).collect()
}
