use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of lock taken on a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockFlavor {
    /// Plain mutual exclusion.
    Mutex,
    /// Mutual exclusion granted to waiters in arrival order.
    Fair,
    /// Shared side of a read/write pair.
    Read,
    /// Exclusive side of a read/write pair.
    Write,
}

impl LockFlavor {
    /// Whether two holders of this flavor may coexist on one key.
    pub fn is_shared(&self) -> bool {
        matches!(self, LockFlavor::Read)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LockFlavor::Mutex => "mutex",
            LockFlavor::Fair => "fair",
            LockFlavor::Read => "read",
            LockFlavor::Write => "write",
        }
    }
}

impl fmt::Display for LockFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LockFlavor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mutex" => Ok(LockFlavor::Mutex),
            "fair" => Ok(LockFlavor::Fair),
            "read" => Ok(LockFlavor::Read),
            "write" => Ok(LockFlavor::Write),
            other => Err(format!("invalid lock flavor: '{other}'")),
        }
    }
}

/// What to do when a lock cannot be acquired in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Fail the call with `LockError::AcquireTimeout`.
    Error,
    /// Skip the operation and return `None`.
    ReturnNone,
    /// Run the operation without the lock.
    Proceed,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePolicy::Error => write!(f, "error"),
            FailurePolicy::ReturnNone => write!(f, "return_none"),
            FailurePolicy::Proceed => write!(f, "proceed"),
        }
    }
}
