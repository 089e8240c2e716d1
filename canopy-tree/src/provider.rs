// SPDX-License-Identifier: MIT OR Apache-2.0

//! Interface to load the stored changes of a tree.
use std::collections::HashMap;
use std::convert::Infallible;
use std::error::Error as StdError;
use std::future::Future;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use canopy_core::{Hash, RawChange};
use serde::{Deserialize, Serialize};

use crate::state::TreeState;

/// Stored form of a tree: its root, all other changes in any order and the heads at the time it
/// was persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeSnapshot {
    pub root: RawChange,
    pub changes: Vec<RawChange>,
    pub heads: Vec<Hash>,
}

impl TreeSnapshot {
    /// Id of the tree, equal to the id of its root change.
    pub fn id(&self) -> Hash {
        self.root.id()
    }

    /// Snapshot of all accepted changes of a tree.
    pub fn from_state(state: &TreeState) -> Self {
        // The root is always first in the total order.
        let changes = state.raw_changes().into_iter().skip(1).collect();
        Self {
            root: state.root().raw().clone(),
            changes,
            heads: state.heads(),
        }
    }
}

/// Source of stored trees.
pub trait TreeProvider {
    type Error: StdError + Send + Sync + 'static;

    /// Load the snapshot of a tree, returns `None` if the tree is unknown.
    fn load(
        &self,
        id: &Hash,
    ) -> impl Future<Output = Result<Option<TreeSnapshot>, Self::Error>> + Send;
}

/// An in-memory tree provider.
///
/// `MemoryTreeProvider` supports usage in asynchronous and multi-threaded contexts by wrapping
/// the snapshots with an `RwLock` and `Arc`.
#[derive(Clone, Debug, Default)]
pub struct MemoryTreeProvider {
    inner: Arc<RwLock<HashMap<Hash, TreeSnapshot>>>,
}

impl MemoryTreeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_store(&self) -> RwLockReadGuard<'_, HashMap<Hash, TreeSnapshot>> {
        self.inner
            .read()
            .expect("acquire shared read access on store")
    }

    fn write_store(&self) -> RwLockWriteGuard<'_, HashMap<Hash, TreeSnapshot>> {
        self.inner
            .write()
            .expect("acquire exclusive write access on store")
    }

    /// Insert or replace the snapshot of a tree.
    pub fn insert(&self, snapshot: TreeSnapshot) {
        self.write_store().insert(snapshot.id(), snapshot);
    }

    pub fn contains(&self, id: &Hash) -> bool {
        self.read_store().contains_key(id)
    }
}

impl TreeProvider for MemoryTreeProvider {
    type Error = Infallible;

    async fn load(&self, id: &Hash) -> Result<Option<TreeSnapshot>, Self::Error> {
        Ok(self.read_store().get(id).cloned())
    }
}
