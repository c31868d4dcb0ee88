//! Identity types for drops.
//!
//! A drop is identified by `(oid, uid)`: the `oid` is the stable logical
//! identity assigned in a graph spec, the `uid` is a fresh identity minted
//! for each runtime instance of that spec node.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable logical identity of a drop within a graph spec.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Oid(pub String);

impl Oid {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Oid {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Oid {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Fresh instance identity minted when a drop is instantiated at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Uid(pub String);

impl Uid {
    /// Mint a fresh uid, scoped under the owning session so that re-deploying
    /// the same `oid` across sessions never collides.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
