//! Startup configuration: CLI flags, environment variables, an optional
//! YAML/JSON file, and built-in defaults, layered in that precedence
//! order (spec.md §6, following the teacher's `Args`/`Config`
//! file-or-bytes split in its own `main.rs`, extended with `clap`'s
//! `env` attribute for the env-var tier).

use std::net::IpAddr;
use std::path::PathBuf;

use clap::Parser;
use context_lens_normalize::Upstreams;
use serde::{Deserialize, Serialize};

#[derive(Parser, Debug)]
#[command(name = "context-lens", version, about = "Observability sidecar for agentic LLM tools", long_about = None)]
pub struct Cli {
	#[command(subcommand)]
	pub command: Option<Command>,

	/// Load settings from a YAML or JSON file (merged under env vars and CLI flags).
	#[arg(short, long, value_name = "file")]
	pub config: Option<PathBuf>,

	#[arg(long, env = "CONTEXT_LENS_BIND_HOST")]
	pub bind_host: Option<IpAddr>,

	#[arg(long, env = "CONTEXT_LENS_PROXY_PORT")]
	pub proxy_port: Option<u16>,

	#[arg(long, env = "CONTEXT_LENS_UI_PORT")]
	pub ui_port: Option<u16>,

	#[arg(long, env = "CONTEXT_LENS_ALLOW_TARGET_OVERRIDE")]
	pub allow_target_override: bool,

	#[arg(long, env = "CONTEXT_LENS_MAX_SESSIONS")]
	pub max_sessions: Option<usize>,

	#[arg(long, env = "CONTEXT_LENS_MAX_BODY_BYTES")]
	pub max_body_bytes: Option<u64>,

	#[arg(long, env = "CONTEXT_LENS_DATA_DIR")]
	pub data_dir: Option<PathBuf>,

	/// Replay `<data_dir>/captures/` into the store on startup (component
	/// 4.I.1's offline-replay watcher). Off by default: the live proxy
	/// already stores every request it captures, and the capture sidecar
	/// files it writes live in the same directory, so leaving this on
	/// unconditionally would re-ingest live traffic a second time.
	#[arg(long, env = "CONTEXT_LENS_ENABLE_CAPTURE_REPLAY")]
	pub enable_capture_replay: bool,

	#[arg(long, env = "UPSTREAM_ANTHROPIC_URL")]
	pub upstream_anthropic_url: Option<String>,

	#[arg(long, env = "UPSTREAM_OPENAI_URL")]
	pub upstream_openai_url: Option<String>,

	#[arg(long, env = "UPSTREAM_CHATGPT_URL")]
	pub upstream_chatgpt_url: Option<String>,

	#[arg(long, env = "UPSTREAM_GEMINI_URL")]
	pub upstream_gemini_url: Option<String>,

	#[arg(long, env = "UPSTREAM_GEMINI_CODE_ASSIST_URL")]
	pub upstream_gemini_code_assist_url: Option<String>,

	#[arg(long, env = "UPSTREAM_VERTEX_URL")]
	pub upstream_vertex_url: Option<String>,
}

#[derive(clap::Subcommand, Debug)]
pub enum Command {
	/// Run the proxy and the ingest/query API (the default when no subcommand is given).
	Serve,
	/// Offline session analysis over an already-exported LHAR file (component J).
	Analyze {
		/// Path to an LHAR JSONL file.
		#[arg(short, long)]
		file: PathBuf,
	},
}

/// The file-layer shape, every field optional so a partial file can
/// still be merged under CLI/env overrides.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileConfig {
	bind_host: Option<IpAddr>,
	proxy_port: Option<u16>,
	ui_port: Option<u16>,
	allow_target_override: Option<bool>,
	max_sessions: Option<usize>,
	max_body_bytes: Option<u64>,
	data_dir: Option<PathBuf>,
	enable_capture_replay: Option<bool>,
	upstream_anthropic_url: Option<String>,
	upstream_openai_url: Option<String>,
	upstream_chatgpt_url: Option<String>,
	upstream_gemini_url: Option<String>,
	upstream_gemini_code_assist_url: Option<String>,
	upstream_vertex_url: Option<String>,
}

/// The fully resolved configuration the rest of the binary runs with.
#[derive(Clone, Debug)]
pub struct Config {
	pub bind_host: IpAddr,
	pub proxy_port: u16,
	pub ui_port: u16,
	pub allow_target_override: bool,
	pub max_sessions: usize,
	pub max_body_bytes: u64,
	pub data_dir: PathBuf,
	pub enable_capture_replay: bool,
	pub upstreams: Upstreams,
}

/// Default request-body cap (spec.md §9's open question: "the source
/// performs no request-body size limit — an implementer should add
/// one").
pub const DEFAULT_MAX_BODY_BYTES: u64 = 32 * 1024 * 1024;

impl Default for Config {
	fn default() -> Self {
		Self {
			bind_host: IpAddr::from([127, 0, 0, 1]),
			proxy_port: 4040,
			ui_port: 4041,
			allow_target_override: false,
			max_sessions: 200,
			max_body_bytes: DEFAULT_MAX_BODY_BYTES,
			data_dir: PathBuf::from("./data"),
			enable_capture_replay: false,
			upstreams: Upstreams::default(),
		}
	}
}

/// Parses `contents` as YAML, falling back to JSON (a plain superset
/// attempt, since YAML 1.1 does not parse most JSON documents that use
/// tabs, but `serde_yaml` accepts the common case); unrecognized file
/// content is a fatal configuration error (spec.md §7).
fn parse_file_config(contents: &str) -> anyhow::Result<FileConfig> {
	if let Ok(cfg) = serde_yaml::from_str(contents) {
		return Ok(cfg);
	}
	Ok(serde_json::from_str(contents)?)
}

/// Merges file < CLI/env (CLI flags and env vars arrive pre-merged in
/// `cli` by `clap`'s own `env` resolution, so only the file layer needs
/// folding in here) per spec.md §6's precedence.
pub async fn load(cli: &Cli) -> anyhow::Result<Config> {
	let file: FileConfig = match &cli.config {
		Some(path) => {
			let contents = tokio::fs::read_to_string(path).await?;
			parse_file_config(&contents)?
		},
		None => FileConfig::default(),
	};

	let defaults = Config::default();
	let mut upstreams = defaults.upstreams;
	upstreams.anthropic = cli.upstream_anthropic_url.clone().or(file.upstream_anthropic_url).unwrap_or(upstreams.anthropic);
	upstreams.openai = cli.upstream_openai_url.clone().or(file.upstream_openai_url).unwrap_or(upstreams.openai);
	upstreams.chatgpt = cli.upstream_chatgpt_url.clone().or(file.upstream_chatgpt_url).unwrap_or(upstreams.chatgpt);
	upstreams.gemini = cli.upstream_gemini_url.clone().or(file.upstream_gemini_url).unwrap_or(upstreams.gemini);
	upstreams.gemini_code_assist =
		cli.upstream_gemini_code_assist_url.clone().or(file.upstream_gemini_code_assist_url).unwrap_or(upstreams.gemini_code_assist);
	upstreams.vertex = cli.upstream_vertex_url.clone().or(file.upstream_vertex_url).unwrap_or(upstreams.vertex);

	Ok(Config {
		bind_host: cli.bind_host.or(file.bind_host).unwrap_or(defaults.bind_host),
		proxy_port: cli.proxy_port.or(file.proxy_port).unwrap_or(defaults.proxy_port),
		ui_port: cli.ui_port.or(file.ui_port).unwrap_or(defaults.ui_port),
		allow_target_override: cli.allow_target_override || file.allow_target_override.unwrap_or(false),
		max_sessions: cli.max_sessions.or(file.max_sessions).unwrap_or(defaults.max_sessions),
		max_body_bytes: cli.max_body_bytes.or(file.max_body_bytes).unwrap_or(defaults.max_body_bytes),
		data_dir: cli.data_dir.clone().or(file.data_dir).unwrap_or(defaults.data_dir),
		enable_capture_replay: cli.enable_capture_replay || file.enable_capture_replay.unwrap_or(false),
		upstreams,
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn file_config_parses_yaml() {
		let cfg = parse_file_config("proxyPort: 9090\nmaxSessions: 50\n").unwrap();
		assert_eq!(cfg.proxy_port, Some(9090));
		assert_eq!(cfg.max_sessions, Some(50));
	}

	#[test]
	fn file_config_parses_json() {
		let cfg = parse_file_config(r#"{"proxyPort": 9090}"#).unwrap();
		assert_eq!(cfg.proxy_port, Some(9090));
	}
}
