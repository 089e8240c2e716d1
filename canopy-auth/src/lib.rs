// SPDX-License-Identifier: MIT OR Apache-2.0

//! Role-based access control for document trees.
//!
//! The members of a tree and their [`Role`]s are not stored anywhere, they are derived by
//! replaying the ACL mutations contained in the tree's changes in causal order. Every change is
//! checked against the [`AclState`] computed over its _own_ parents, so permissions always refer
//! to the causal past of an action and never to a concurrent or future branch.
//!
//! The root change is special: its author becomes the first `Admin` and any mutation it carries
//! (for example adding initial members) is applied without a permission check.
mod role;
mod mutation;
pub mod state;
pub mod traits;

pub use mutation::AclMutation;
pub use role::Role;
pub use state::{AclError, AclState, MemberState, apply};
pub use traits::{AclChange, AclPayload};
