//! Streaming engine and port trait definitions for Flowcast.
//!
//! This crate defines the "ports" (repository, session store, lock backend
//! and upstream gateway traits) that the infrastructure layer implements,
//! plus the engine built on top of them. It depends only on
//! `flowcast-types` -- never on `flowcast-infra` or any database/IO crate.

pub mod lock;
pub mod repository;
pub mod session;
pub mod stream;
pub mod upstream;
pub mod workflow;
