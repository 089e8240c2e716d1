// SPDX-License-Identifier: MIT OR Apache-2.0

use canopy_core::PublicKey;
use serde::{Deserialize, Serialize};

use crate::role::Role;

/// Change to the member table of a tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AclMutation {
    /// Add a new member with the given role.
    Add { identity: PublicKey, role: Role },

    /// Assign a different role to an existing member.
    ChangeRole { identity: PublicKey, role: Role },

    /// Remove an existing member.
    Remove { identity: PublicKey },
}

impl AclMutation {
    pub fn add(identity: PublicKey, role: Role) -> Self {
        Self::Add { identity, role }
    }

    pub fn change_role(identity: PublicKey, role: Role) -> Self {
        Self::ChangeRole { identity, role }
    }

    pub fn remove(identity: PublicKey) -> Self {
        Self::Remove { identity }
    }

    /// Member affected by this mutation.
    pub fn identity(&self) -> &PublicKey {
        match self {
            AclMutation::Add { identity, .. }
            | AclMutation::ChangeRole { identity, .. }
            | AclMutation::Remove { identity } => identity,
        }
    }
}
