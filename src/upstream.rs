//! The pooled HTTP client used to forward both non-POST passthrough
//! traffic and captured POST requests upstream. Grounded on the
//! teacher's `management/hyper_helpers.rs::pooling_client`: a
//! `hyper_util::client::legacy::Client` over a plain `HttpConnector`,
//! timers wired through `TokioExecutor`/`TokioTimer`, TLS added via
//! `hyper_rustls` rather than the bare `HttpConnector` the teacher uses
//! for its (TLS-terminated-elsewhere) mesh traffic.

use http_body_util::Full;
use hyper_rustls::HttpsConnectorBuilder;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioTimer};

pub type Body = Full<bytes::Bytes>;
pub type UpstreamClient = Client<hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>, Body>;

pub fn build_client() -> UpstreamClient {
	let https = HttpsConnectorBuilder::new().with_native_roots().expect("native root cert store").https_or_http().enable_http1().enable_http2().build();

	Client::builder(TokioExecutor::new()).timer(TokioTimer::new()).build(https)
}
