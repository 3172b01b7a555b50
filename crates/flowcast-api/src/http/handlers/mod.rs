//! HTTP request handlers.

pub mod workflow_chat;
