//! Membership snapshots
//!
//! A snapshot is the complete set of identities present in a room at
//! one presence sync. It is replaced wholesale on every sync; there is
//! no delta or history.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::identity::ClientIdentity;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MembershipSnapshot {
    members: BTreeSet<ClientIdentity>,
}

impl MembershipSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, id: &ClientIdentity) -> bool {
        self.members.contains(id)
    }

    /// Lexicographically smallest identity present
    pub fn smallest(&self) -> Option<&ClientIdentity> {
        self.members.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClientIdentity> {
        self.members.iter()
    }
}

impl FromIterator<ClientIdentity> for MembershipSnapshot {
    fn from_iter<I: IntoIterator<Item = ClientIdentity>>(iter: I) -> Self {
        Self {
            members: iter.into_iter().collect(),
        }
    }
}
