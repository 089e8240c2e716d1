// SPDX-License-Identifier: MIT OR Apache-2.0

//! Member table derived from replaying ACL mutations.
use std::collections::BTreeMap;

use canopy_core::{Hash, PublicKey};
use thiserror::Error;
use tracing::trace;

use crate::mutation::AclMutation;
use crate::role::Role;
use crate::traits::AclChange;

/// Role of a member and the change which last assigned it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemberState {
    pub role: Role,
    pub updated_at: Hash,
}

/// Members of a tree and their roles at one point of its history.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AclState {
    members: BTreeMap<PublicKey, MemberState>,
}

impl AclState {
    /// Establish the initial state from the root change.
    ///
    /// The root author becomes `Admin`. A mutation carried by the root is applied without any
    /// permission check, it can still fail if it is invalid in itself (for example adding the
    /// root author a second time).
    pub fn from_root(root: &impl AclChange) -> Result<Self, AclError> {
        let mut state = Self::default();
        state.members.insert(
            root.author(),
            MemberState {
                role: Role::Admin,
                updated_at: root.id(),
            },
        );

        if let Some(mutation) = root.acl_mutation() {
            state.mutate(root.id(), mutation)?;
        }

        Ok(state)
    }

    /// Role of an identity, `None` if it is not a member.
    pub fn role(&self, identity: &PublicKey) -> Option<Role> {
        self.members.get(identity).map(|member| member.role)
    }

    pub fn member(&self, identity: &PublicKey) -> Option<&MemberState> {
        self.members.get(identity)
    }

    pub fn is_member(&self, identity: &PublicKey) -> bool {
        self.members.contains_key(identity)
    }

    /// All members with their roles, ordered by identity.
    pub fn members(&self) -> impl Iterator<Item = (&PublicKey, &MemberState)> {
        self.members.iter()
    }

    pub fn admins(&self) -> Vec<PublicKey> {
        self.members
            .iter()
            .filter(|(_, member)| member.role.is_admin())
            .map(|(identity, _)| *identity)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Minimum role an author needs for the given change.
    pub fn required_role(change: &impl AclChange) -> Role {
        if change.acl_mutation().is_some() {
            Role::Admin
        } else {
            Role::Writer
        }
    }

    /// Check if a change is permitted and valid in this state without applying it.
    pub fn check(&self, change: &impl AclChange) -> Result<(), AclError> {
        let author = change.author();
        let required = Self::required_role(change);
        let actual = self.role(&author);

        if actual.is_none_or(|role| role < required) {
            return Err(AclError::InsufficientPermission {
                author,
                required,
                actual,
            });
        }

        match change.acl_mutation() {
            Some(AclMutation::Add { identity, .. }) if self.is_member(identity) => {
                Err(AclError::MemberExists(*identity))
            }
            Some(AclMutation::ChangeRole { identity, .. } | AclMutation::Remove { identity })
                if !self.is_member(identity) =>
            {
                Err(AclError::UnknownMember(*identity))
            }
            _ => Ok(()),
        }
    }

    /// Apply a change in place. The state is left untouched when the change is refused.
    pub fn apply(&mut self, change: &impl AclChange) -> Result<(), AclError> {
        self.check(change)?;

        if let Some(mutation) = change.acl_mutation() {
            self.mutate(change.id(), mutation)?;
        }

        Ok(())
    }

    fn mutate(&mut self, id: Hash, mutation: &AclMutation) -> Result<(), AclError> {
        match mutation {
            AclMutation::Add { identity, role } => {
                if self.is_member(identity) {
                    return Err(AclError::MemberExists(*identity));
                }
                trace!(identity = %identity, %role, change = %id.short(), "add member");
                self.members.insert(
                    *identity,
                    MemberState {
                        role: *role,
                        updated_at: id,
                    },
                );
            }
            AclMutation::ChangeRole { identity, role } => {
                let member = self
                    .members
                    .get_mut(identity)
                    .ok_or(AclError::UnknownMember(*identity))?;
                trace!(identity = %identity, %role, change = %id.short(), "change role");
                member.role = *role;
                member.updated_at = id;
            }
            AclMutation::Remove { identity } => {
                if self.members.remove(identity).is_none() {
                    return Err(AclError::UnknownMember(*identity));
                }
                trace!(identity = %identity, change = %id.short(), "remove member");
            }
        }

        Ok(())
    }
}

/// Apply a change to a state, returning the successor state.
pub fn apply(state: &AclState, change: &impl AclChange) -> Result<AclState, AclError> {
    let mut next = state.clone();
    next.apply(change)?;
    Ok(next)
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AclError {
    #[error("{author} requires role {required} but has {}", display_role(.actual))]
    InsufficientPermission {
        author: PublicKey,
        required: Role,
        actual: Option<Role>,
    },

    #[error("identity {0} is already a member")]
    MemberExists(PublicKey),

    #[error("identity {0} is not a member")]
    UnknownMember(PublicKey),
}

fn display_role(role: &Option<Role>) -> String {
    role.map(|role| role.to_string())
        .unwrap_or_else(|| "no role".to_string())
}

#[cfg(test)]
mod tests {
    use canopy_core::{Hash, PrivateKey, PublicKey};

    use crate::mutation::AclMutation;
    use crate::role::Role;
    use crate::traits::AclChange;

    use super::{AclError, AclState, apply};

    struct TestChange {
        id: Hash,
        author: PublicKey,
        mutation: Option<AclMutation>,
    }

    impl TestChange {
        fn new(seed: &str, author: &PrivateKey, mutation: Option<AclMutation>) -> Self {
            Self {
                id: Hash::new(seed),
                author: author.public_key(),
                mutation,
            }
        }
    }

    impl AclChange for TestChange {
        fn id(&self) -> Hash {
            self.id
        }

        fn author(&self) -> PublicKey {
            self.author
        }

        fn acl_mutation(&self) -> Option<&AclMutation> {
            self.mutation.as_ref()
        }
    }

    #[test]
    fn root_author_is_admin() {
        let alice = PrivateKey::new();
        let root = TestChange::new("root", &alice, None);

        let state = AclState::from_root(&root).unwrap();
        assert_eq!(state.role(&alice.public_key()), Some(Role::Admin));
        assert_eq!(state.admins(), vec![alice.public_key()]);
        assert_eq!(
            state.member(&alice.public_key()).unwrap().updated_at,
            root.id
        );
    }

    #[test]
    fn root_mutation_is_not_checked() {
        let alice = PrivateKey::new();
        let bob = PrivateKey::new();

        let root = TestChange::new(
            "root",
            &alice,
            Some(AclMutation::add(bob.public_key(), Role::Writer)),
        );
        let state = AclState::from_root(&root).unwrap();
        assert_eq!(state.len(), 2);
        assert_eq!(state.role(&bob.public_key()), Some(Role::Writer));

        // The root author can not be added twice.
        let root = TestChange::new(
            "root",
            &alice,
            Some(AclMutation::add(alice.public_key(), Role::Reader)),
        );
        assert!(matches!(
            AclState::from_root(&root),
            Err(AclError::MemberExists(_))
        ));
    }

    #[test]
    fn admin_manages_members() {
        let alice = PrivateKey::new();
        let bob = PrivateKey::new();

        let state = AclState::from_root(&TestChange::new("root", &alice, None)).unwrap();

        let add = TestChange::new(
            "add",
            &alice,
            Some(AclMutation::add(bob.public_key(), Role::Reader)),
        );
        let state = apply(&state, &add).unwrap();
        assert_eq!(state.role(&bob.public_key()), Some(Role::Reader));

        let promote = TestChange::new(
            "promote",
            &alice,
            Some(AclMutation::change_role(bob.public_key(), Role::Writer)),
        );
        let state = apply(&state, &promote).unwrap();
        let member = state.member(&bob.public_key()).unwrap();
        assert_eq!(member.role, Role::Writer);
        assert_eq!(member.updated_at, promote.id);

        let remove = TestChange::new(
            "remove",
            &alice,
            Some(AclMutation::remove(bob.public_key())),
        );
        let state = apply(&state, &remove).unwrap();
        assert!(!state.is_member(&bob.public_key()));
    }

    #[test]
    fn content_requires_writer() {
        let alice = PrivateKey::new();
        let bob = PrivateKey::new();
        let claire = PrivateKey::new();

        let state = AclState::from_root(&TestChange::new(
            "root",
            &alice,
            Some(AclMutation::add(bob.public_key(), Role::Reader)),
        ))
        .unwrap();

        // Admins can write.
        assert!(apply(&state, &TestChange::new("1", &alice, None)).is_ok());

        // Readers can not.
        let result = apply(&state, &TestChange::new("2", &bob, None));
        assert_eq!(
            result,
            Err(AclError::InsufficientPermission {
                author: bob.public_key(),
                required: Role::Writer,
                actual: Some(Role::Reader),
            })
        );

        // Strangers neither.
        let result = apply(&state, &TestChange::new("3", &claire, None));
        assert!(matches!(
            result,
            Err(AclError::InsufficientPermission { actual: None, .. })
        ));
    }

    #[test]
    fn acl_mutations_require_admin() {
        let alice = PrivateKey::new();
        let bob = PrivateKey::new();
        let claire = PrivateKey::new();

        let state = AclState::from_root(&TestChange::new(
            "root",
            &alice,
            Some(AclMutation::add(bob.public_key(), Role::Writer)),
        ))
        .unwrap();

        let add = TestChange::new(
            "add",
            &bob,
            Some(AclMutation::add(claire.public_key(), Role::Writer)),
        );
        assert!(matches!(
            apply(&state, &add),
            Err(AclError::InsufficientPermission {
                required: Role::Admin,
                actual: Some(Role::Writer),
                ..
            })
        ));
    }

    #[test]
    fn invalid_mutations_leave_state_untouched() {
        let alice = PrivateKey::new();
        let bob = PrivateKey::new();

        let mut state = AclState::from_root(&TestChange::new("root", &alice, None)).unwrap();
        let before = state.clone();

        let remove = TestChange::new(
            "remove",
            &alice,
            Some(AclMutation::remove(bob.public_key())),
        );
        assert_eq!(
            state.apply(&remove),
            Err(AclError::UnknownMember(bob.public_key()))
        );

        let add_again = TestChange::new(
            "add",
            &alice,
            Some(AclMutation::add(alice.public_key(), Role::Writer)),
        );
        assert_eq!(
            state.apply(&add_again),
            Err(AclError::MemberExists(alice.public_key()))
        );

        assert_eq!(state, before);
    }
}
