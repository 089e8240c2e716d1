// SPDX-License-Identifier: MIT OR Apache-2.0

//! Permissioned change trees.
//!
//! A [`ChangeTree`] holds the history of one document as a directed acyclic graph of signed and
//! encrypted changes. Some changes carry membership mutations which decide who may author
//! subsequent changes, see `canopy-auth`.
//!
//! Trees can be built from any unordered, partial set of changes. Changes whose parents are not
//! known yet are held back until the parents arrive, changes whose author lacked permission in
//! their causal past are rejected for good. All accepted changes are brought into a deterministic
//! total order: topologically sorted, with concurrent changes ordered by their id. Replicas holding
//! the same changes therefore derive the same state, independent of arrival order.
//!
//! Consumers derive application state through an [`UpdateListener`] which is either asked to
//! rebuild from scratch or to apply a batch of new changes on top of what it has.
//!
//! ## Example
//!
//! ```
//! use canopy_auth::{AclMutation, Role};
//! use canopy_core::{DocumentKey, PrivateKey, Rng};
//! use canopy_tree::{ChangeTree, NoOpListener, Payload};
//!
//! let alice = PrivateKey::new();
//! let bob = PrivateKey::new();
//! let document_key = DocumentKey::generate(&Rng::default()).unwrap();
//!
//! // Alice creates a tree and makes Bob a writer.
//! let tree = ChangeTree::create(
//!     alice,
//!     document_key.clone(),
//!     Payload::acl(AclMutation::add(bob.public_key(), Role::Writer)),
//!     NoOpListener,
//! )
//! .unwrap();
//! tree.add_content(Payload::content("hello")).unwrap();
//!
//! // Bob builds the same tree from its changes and continues writing.
//! let bob_tree =
//!     ChangeTree::build(tree.snapshot().unwrap(), bob, document_key, NoOpListener).unwrap();
//! let change = bob_tree.add_content(Payload::content("world")).unwrap();
//!
//! tree.receive(vec![change]).unwrap();
//! assert_eq!(tree.order().unwrap(), bob_tree.order().unwrap());
//! ```
mod account;
pub mod graph;
mod listener;
mod payload;
mod pending;
mod provider;
mod state;
#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;
mod tree;

pub use account::Account;
pub use listener::{NoOpListener, UpdateListener};
pub use payload::{Payload, TreeChange};
pub use pending::PendingBuffer;
pub use provider::{MemoryTreeProvider, TreeProvider, TreeSnapshot};
pub use state::{Rejection, TreeState};
pub use tree::{AddResult, AddResultMode, ChangeTree, TreeError};
