//! Logging setup, grounded directly on the teacher's own `main.rs`:
//! `tracing_subscriber::fmt()` with an `EnvFilter`, writing to stderr so
//! stdout stays free for any piped output (e.g. the `analyze` subcommand
//! printing a JSON result).

use tracing_subscriber::EnvFilter;

pub fn init_logging() {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
		.with_writer(std::io::stderr)
		.with_ansi(false)
		.init();
}
