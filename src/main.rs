use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use context_lens::api::{self, ApiState};
use context_lens::config::{self, Cli, Command};
use context_lens::metrics::{self, Metrics};
use context_lens::proxy::{proxy_handler, ProxyState};
use context_lens::telemetry::init_logging;
use context_lens::upstream::build_client;
use context_lens::{captures::CaptureWriter, watcher};
use context_lens_store::{analyze, LharEntry, Store, StoreConfig};
use prometheus_client::registry::Registry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_logging();

	let cli = Cli::parse();

	match cli.command {
		Some(Command::Analyze { ref file }) => analyze_command(file).await,
		_ => serve(&cli).await,
	}
}

/// Component J, driven from the CLI: load an already-exported LHAR
/// JSONL file and print the derived `SessionAnalysis` as JSON (spec.md
/// §4.J).
async fn analyze_command(file: &std::path::Path) -> anyhow::Result<()> {
	let contents = tokio::fs::read_to_string(file).await.with_context(|| format!("reading {}", file.display()))?;

	let mut entries: Vec<LharEntry> = Vec::new();
	for line in contents.lines() {
		let line = line.trim();
		if line.is_empty() {
			continue;
		}
		let value: serde_json::Value = match serde_json::from_str(line) {
			Ok(v) => v,
			Err(err) => {
				tracing::warn!(error = %err, "skipping unparsable LHAR line");
				continue;
			},
		};
		if value.get("type").and_then(serde_json::Value::as_str) != Some("entry") {
			continue;
		}
		match serde_json::from_value::<LharEntry>(value) {
			Ok(entry) => entries.push(entry),
			Err(err) => tracing::warn!(error = %err, "skipping invalid LHAR entry line"),
		}
	}
	entries.sort_by(|a, b| (a.trace_id.as_str(), a.sequence).cmp(&(b.trace_id.as_str(), b.sequence)));

	let analysis = analyze(&entries);
	println!("{}", serde_json::to_string_pretty(&analysis)?);
	Ok(())
}

/// Runs the proxy (spec.md §4.E) on `proxy_port` and the ingest/query
/// API plus `/metrics` (spec.md §4.I) on `ui_port`, concurrently, until
/// either listener exits.
async fn serve(cli: &Cli) -> anyhow::Result<()> {
	let config = Arc::new(config::load(cli).await.context("loading configuration")?);

	tokio::fs::create_dir_all(&config.data_dir).await.with_context(|| format!("creating data dir {}", config.data_dir.display()))?;

	let store_config = StoreConfig {
		state_path: config.data_dir.join("state.jsonl"),
		tags_path: config.data_dir.join("tags.jsonl"),
		max_sessions: config.max_sessions,
		..StoreConfig::default()
	};
	let store = Arc::new(Store::init(store_config).await.context("loading state.jsonl")?);

	let mut registry = Registry::default();
	let metrics = Metrics::new(&mut registry);
	let metrics_app = metrics::App::new(Arc::new(registry));

	let client = build_client();
	let captures = Arc::new(CaptureWriter::new(config.data_dir.clone()));

	let proxy_state = ProxyState { store: store.clone(), client, config: config.clone(), metrics, captures };
	let proxy_router = axum::Router::new().fallback(proxy_handler).with_state(proxy_state);

	let api_router = api::router(ApiState { store: store.clone() }).merge(metrics_app.router());

	// The replay watcher re-ingests `<data_dir>/captures/` — the same
	// sidecar files the live proxy itself writes on every captured
	// request (src/captures.rs). Left on unconditionally it would
	// double-store every live request a second time ~2s later, so it
	// only runs when the operator explicitly opts in (offline replay of
	// a capture directory collected elsewhere, e.g. from mitmproxy).
	if config.enable_capture_replay {
		tokio::spawn(watcher::run(config.data_dir.clone(), store.clone()));
	}

	let proxy_addr = SocketAddr::new(config.bind_host, config.proxy_port);
	let ui_addr = SocketAddr::new(config.bind_host, config.ui_port);

	let proxy_listener = tokio::net::TcpListener::bind(proxy_addr).await.with_context(|| format!("binding proxy listener on {proxy_addr}"))?;
	let ui_listener = tokio::net::TcpListener::bind(ui_addr).await.with_context(|| format!("binding API listener on {ui_addr}"))?;

	tracing::info!(%proxy_addr, %ui_addr, "context-lens starting");

	let proxy_server = axum::serve(proxy_listener, proxy_router.into_make_service_with_connect_info::<SocketAddr>());
	let ui_server = axum::serve(ui_listener, api_router.into_make_service());

	tokio::select! {
		result = proxy_server => result.context("proxy listener")?,
		result = ui_server => result.context("API listener")?,
	}

	Ok(())
}
