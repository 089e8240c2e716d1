// SPDX-License-Identifier: MIT OR Apache-2.0

//! Notifications for consumers deriving state from a tree.
use crate::payload::TreeChange;
use crate::state::TreeState;

/// Consumer of tree updates, for example a text document projection.
///
/// Both callbacks are invoked synchronously while the tree is locked for writing, they receive the
/// locked state and must not call back into the tree. Implementations must be idempotent: after a
/// rebuild a consumer might see changes again which it already applied during an earlier update.
pub trait UpdateListener: Send + Sync {
    /// Derived state needs to be recomputed from scratch by iterating the tree from its root.
    fn rebuild(&mut self, tree: &TreeState);

    /// Apply only the given changes, they are in total order and come after everything the tree
    /// reported before.
    fn update(&mut self, tree: &TreeState, changes: &[TreeChange]);
}

/// Listener ignoring all notifications.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpListener;

impl UpdateListener for NoOpListener {
    fn rebuild(&mut self, _tree: &TreeState) {}

    fn update(&mut self, _tree: &TreeState, _changes: &[TreeChange]) {}
}
