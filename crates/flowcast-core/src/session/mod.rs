//! Pause state for the resume protocol.

pub mod resume;
pub mod store;
