// SPDX-License-Identifier: MIT OR Apache-2.0

use canopy_auth::{AclMutation, AclPayload};
use canopy_core::Change;
use serde::{Deserialize, Serialize};

/// Decrypted payload of a change in a tree.
///
/// A change can carry a membership mutation, an opaque application mutation or both. A change
/// with neither is treated like a content change when checking permissions.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub acl: Option<AclMutation>,
    #[serde(with = "serde_bytes")]
    pub content: Option<Vec<u8>>,
}

impl Payload {
    pub fn new(acl: Option<AclMutation>, content: Option<Vec<u8>>) -> Self {
        Self { acl, content }
    }

    /// Payload only carrying an application mutation.
    pub fn content(content: impl Into<Vec<u8>>) -> Self {
        Self {
            acl: None,
            content: Some(content.into()),
        }
    }

    /// Payload only carrying a membership mutation.
    pub fn acl(mutation: AclMutation) -> Self {
        Self {
            acl: Some(mutation),
            content: None,
        }
    }
}

impl AclPayload for Payload {
    fn acl_mutation(&self) -> Option<&AclMutation> {
        self.acl.as_ref()
    }
}

/// Change as it is stored in a tree.
pub type TreeChange = Change<Payload>;
