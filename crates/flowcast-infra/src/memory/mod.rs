//! In-process implementations for single-instance deployments and tests.

pub mod lock;
pub mod session;
