//! Upstream workflow engine port and endpoint selection.

pub mod gateway;
pub mod target;

pub use gateway::{ChunkStream, UpstreamGateway};
pub use target::select_target;
