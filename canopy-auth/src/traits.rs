// SPDX-License-Identifier: MIT OR Apache-2.0

//! Interfaces to express required information from changes processed by the ACL state machine.
use canopy_core::{Change, Hash, PublicKey};

use crate::mutation::AclMutation;

/// Applications implementing this trait should authenticate the author of each change before
/// handing it to the state machine.
pub trait AclChange {
    /// Id of this change.
    fn id(&self) -> Hash;

    /// Verified author of this change.
    fn author(&self) -> PublicKey;

    /// Membership mutation carried by this change, if any.
    fn acl_mutation(&self) -> Option<&AclMutation>;
}

/// Application payloads which can carry a membership mutation.
pub trait AclPayload {
    fn acl_mutation(&self) -> Option<&AclMutation>;
}

impl<P> AclChange for Change<P>
where
    P: AclPayload,
{
    fn id(&self) -> Hash {
        self.id
    }

    fn author(&self) -> PublicKey {
        self.author
    }

    fn acl_mutation(&self) -> Option<&AclMutation> {
        self.payload.acl_mutation()
    }
}

#[cfg(test)]
mod tests {
    use canopy_core::{Change, DocumentKey, PrivateKey, Rng};
    use serde::{Deserialize, Serialize};

    use crate::mutation::AclMutation;
    use crate::role::Role;
    use crate::state::AclState;

    use super::{AclChange, AclPayload};

    #[derive(Clone, Debug, Serialize, Deserialize)]
    struct Membership(Option<AclMutation>);

    impl AclPayload for Membership {
        fn acl_mutation(&self) -> Option<&AclMutation> {
            self.0.as_ref()
        }
    }

    #[test]
    fn signed_changes_drive_state() {
        let rng = Rng::from_seed([9; 32]);
        let document_key = DocumentKey::generate(&rng).unwrap();
        let alice = PrivateKey::new();
        let bob = PrivateKey::new();

        let root = Change::new(&alice, &document_key, &rng, vec![], 0, Membership(None)).unwrap();
        let mut state = AclState::from_root(&root).unwrap();

        let add = Change::new(
            &alice,
            &document_key,
            &rng,
            vec![root.id],
            1,
            Membership(Some(AclMutation::add(bob.public_key(), Role::Writer))),
        )
        .unwrap();
        assert_eq!(add.author(), alice.public_key());
        assert!(add.acl_mutation().is_some());

        state.apply(&add).unwrap();
        assert_eq!(state.role(&bob.public_key()), Some(Role::Writer));
    }
}
