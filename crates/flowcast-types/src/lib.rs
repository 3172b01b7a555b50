//! Shared domain types for Flowcast.
//!
//! This crate contains the types used across the Flowcast streaming
//! engine: chat turns and history, workflow bot metadata, upstream event
//! chunks, client frames, lock settings, configuration, and the error
//! taxonomy.
//!
//! Zero infrastructure dependencies -- only serde, chrono, thiserror.

pub mod chat;
pub mod config;
pub mod error;
pub mod event;
pub mod frame;
pub mod lock;
pub mod workflow;
