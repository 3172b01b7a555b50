//! Infrastructure adapters for Flowcast.
//!
//! Implements the ports defined in flowcast-core: SQLite repositories,
//! session store and lock backend (sqlx, WAL, split reader/writer pools),
//! their in-process counterparts, and the HTTP/SSE upstream gateway.

pub mod configured;
pub mod memory;
pub mod sqlite;
pub mod upstream;
