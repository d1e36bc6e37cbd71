//! Ephemeral client identities
//!
//! Every client session mints one identity when it joins a room. The
//! identity doubles as the presence key and as the tie-break value for
//! writer election, so ordering is plain lexicographic string order.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque per-session identifier, unique for the lifetime of a client
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientIdentity(String);

impl ClientIdentity {
    /// Mint a fresh 128-bit random identity
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Wrap an existing identifier (tests, CLI overrides)
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientIdentity {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ClientIdentity {
    fn from(s: String) -> Self {
        Self(s)
    }
}
