//! HTTP layer for Flowcast.
//!
//! Axum router at `/api/v1/` exposing the workflow chat stream endpoints
//! as Server-Sent Events, with an envelope format for JSON responses and
//! CORS support.

pub mod error;
pub mod handlers;
pub mod response;
pub mod router;
