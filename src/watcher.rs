//! Component 4.I.1: a poll-based watcher over `<data_dir>/captures/`
//! that feeds unseen capture files into the same ingest path `POST
//! /api/ingest` uses. Grounded on the original's own simple polling
//! replay loop rather than pulling in a filesystem-event crate the
//! teacher never reaches for.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use context_lens_normalize::{classify_request, extract_source, parse_context};
use context_lens_store::{ProxyResponse, Store, StoreRequestInput};
use context_lens_core::Timings;
use serde_json::Value;

const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Runs forever, polling `<data_dir>/captures/` for files not yet
/// replayed. The live proxy writes its own capture sidecar files into
/// this same directory, so the caller must only spawn this when replay
/// is explicitly requested (`Config::enable_capture_replay`) — running
/// it unconditionally alongside the live proxy would re-ingest every
/// request it already stored.
pub async fn run(data_dir: PathBuf, store: Arc<Store>) {
	let mut seen: BTreeSet<PathBuf> = BTreeSet::new();
	let captures_dir = data_dir.join("captures");
	let mut interval = tokio::time::interval(POLL_INTERVAL);
	loop {
		interval.tick().await;
		let Ok(mut day_dirs) = tokio::fs::read_dir(&captures_dir).await else { continue };
		while let Ok(Some(day_dir)) = day_dirs.next_entry().await {
			if !day_dir.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
				continue;
			}
			let Ok(mut files) = tokio::fs::read_dir(day_dir.path()).await else { continue };
			while let Ok(Some(file)) = files.next_entry().await {
				let path = file.path();
				if seen.contains(&path) {
					continue;
				}
				seen.insert(path.clone());
				if let Err(err) = replay_one(&path, &store).await {
					tracing::warn!(error = %err, path = %path.display(), "failed to replay capture file");
				}
			}
		}
	}
}

async fn replay_one(path: &PathBuf, store: &Arc<Store>) -> anyhow::Result<()> {
	let contents = tokio::fs::read_to_string(path).await?;
	let document: Value = serde_json::from_str(&contents)?;
	let raw_body = document.get("request").cloned().unwrap_or(Value::Null);
	let Some(response_value) = document.get("response") else { return Ok(()) };

	let headers = http::HeaderMap::new();
	let extraction = extract_source("/");
	let (provider, api_format) = classify_request(&extraction.clean_path, &headers);
	let context = parse_context(provider, api_format, &raw_body);

	let response = if response_value.get("streaming").and_then(Value::as_bool) == Some(true) {
		ProxyResponse::Streaming { chunks: response_value.get("chunks").and_then(Value::as_str).unwrap_or_default().to_string() }
	} else if let Some(raw) = response_value.get("raw").and_then(Value::as_str) {
		ProxyResponse::Raw(raw.to_string())
	} else {
		ProxyResponse::Json(response_value.clone())
	};

	let meta = document.get("meta").cloned().unwrap_or(Value::Null);
	let source = meta.get("source").and_then(Value::as_str).map(str::to_string);
	let target_url = meta.get("targetUrl").and_then(Value::as_str).unwrap_or_default().to_string();

	let input = StoreRequestInput {
		context,
		response,
		source,
		raw_body,
		headers: Default::default(),
		http_status: meta.get("httpStatus").and_then(Value::as_u64).unwrap_or(200) as u16,
		timings: Timings::default(),
		request_bytes: 0,
		response_bytes: 0,
		target_url,
	};
	store.store_request(input).await;
	Ok(())
}
