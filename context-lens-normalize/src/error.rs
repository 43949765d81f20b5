use thiserror::Error;

#[derive(Debug, Error)]
pub enum NormalizeError {
	#[error("unrecognized api format for provider")]
	UnsupportedFormat,
	#[error("request body is not valid JSON")]
	NotJson,
}
