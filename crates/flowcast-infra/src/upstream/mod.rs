//! Upstream workflow engine client.

pub mod http;

pub use http::HttpUpstreamGateway;
