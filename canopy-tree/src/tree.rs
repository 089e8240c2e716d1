// SPDX-License-Identifier: MIT OR Apache-2.0

//! Change tree of one document.
use std::fmt;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use canopy_auth::{AclChange, AclError, AclState};
use canopy_core::{ChangeError, DocumentKey, Hash, PrivateKey, PublicKey, RawChange, Rng};
use petgraph::algo::is_cyclic_directed;
use petgraph::graphmap::DiGraphMap;
use thiserror::Error;
use tracing::{debug, warn};

use crate::account::Account;
use crate::listener::UpdateListener;
use crate::payload::{Payload, TreeChange};
use crate::provider::TreeSnapshot;
use crate::state::TreeState;

/// How the listener of a tree was notified about a batch of received changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddResultMode {
    /// No change was accepted.
    Nothing,

    /// All accepted changes were appended to the end of the total order.
    Append,

    /// Derived state had to be recomputed.
    Rebuild,
}

/// Outcome of receiving a batch of changes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddResult {
    pub old_heads: Vec<Hash>,
    pub heads: Vec<Hash>,

    /// Accepted changes in total order.
    pub added: Vec<Hash>,

    /// Changes rejected while processing this batch, including pending changes which depended on
    /// them.
    pub rejected: Vec<Hash>,

    /// Number of changes still waiting for missing parents.
    pub pending: usize,

    pub mode: AddResultMode,
}

struct TreeInner {
    state: TreeState,
    listener: Box<dyn UpdateListener>,
    closed: bool,
}

/// Permissioned, replicated change tree of one document.
///
/// All mutations and reads run under one lock per tree. Reads can happen concurrently, mutations
/// are exclusive. The listener is notified while the lock is held, after every mutation.
pub struct ChangeTree {
    id: Hash,
    private_key: PrivateKey,
    document_key: DocumentKey,
    rng: Rng,
    inner: RwLock<TreeInner>,
}

impl ChangeTree {
    /// Create a new tree, authoring its root change.
    ///
    /// The author becomes the first admin, an ACL mutation in the payload is applied without
    /// permission checks.
    pub fn create<L>(
        private_key: PrivateKey,
        document_key: DocumentKey,
        payload: Payload,
        listener: L,
    ) -> Result<Self, TreeError>
    where
        L: UpdateListener + 'static,
    {
        let rng = Rng::default();
        let root = TreeChange::new(
            &private_key,
            &document_key,
            &rng,
            vec![],
            timestamp(),
            payload,
        )?;
        debug!(tree = %root.id.short(), "create tree");

        let state = TreeState::new(root)?;
        Ok(Self::from_state(
            state,
            private_key,
            document_key,
            rng,
            Box::new(listener),
        ))
    }

    /// Build a tree from a stored snapshot using the keys of an account.
    pub fn open<L>(snapshot: TreeSnapshot, account: &Account, listener: L) -> Result<Self, TreeError>
    where
        L: UpdateListener + 'static,
    {
        let id = snapshot.id();
        let document_key = account
            .document_key(&id)
            .ok_or(TreeError::MissingKey(id))?
            .clone();
        Self::build(
            snapshot,
            account.private_key().clone(),
            document_key,
            listener,
        )
    }

    /// Build a tree from a stored snapshot.
    ///
    /// Changes whose author lacked permission, and correctly signed changes with an unreadable
    /// payload, are excluded and recorded as rejected. Other changes failing to decode are
    /// ignored. Only a broken root or a cycle fail the build. The stored heads are a hint, the
    /// actual heads are recomputed.
    pub fn build<L>(
        snapshot: TreeSnapshot,
        private_key: PrivateKey,
        document_key: DocumentKey,
        listener: L,
    ) -> Result<Self, TreeError>
    where
        L: UpdateListener + 'static,
    {
        let root =
            TreeChange::from_raw(snapshot.root, &document_key).map_err(TreeError::InvalidRoot)?;
        let id = root.id;
        let mut state = TreeState::new(root)?;

        let (mut changes, unreadable) = decode_all(&id, snapshot.changes, &document_key);

        if contains_cycle(&changes) {
            return Err(TreeError::Cycle);
        }

        // Process in a stable order, independent of how the changes were stored.
        changes.sort();
        let excluded = state.exclude(unreadable);
        let ingested = state.ingest(changes);
        state.recompute_order();

        if state.pending_len() > 0 {
            warn!(
                tree = %id.short(),
                pending = state.pending_len(),
                "changes with missing parents in snapshot"
            );
        }

        let mut stored_heads = snapshot.heads;
        stored_heads.sort();
        stored_heads.dedup();
        if stored_heads != state.heads() {
            warn!(tree = %id.short(), "stored heads differ from computed heads");
        }

        debug!(
            tree = %id.short(),
            changes = state.len(),
            rejected = excluded.len() + ingested.rejected.len(),
            "build tree"
        );

        Ok(Self::from_state(
            state,
            private_key,
            document_key,
            Rng::default(),
            Box::new(listener),
        ))
    }

    fn from_state(
        state: TreeState,
        private_key: PrivateKey,
        document_key: DocumentKey,
        rng: Rng,
        mut listener: Box<dyn UpdateListener>,
    ) -> Self {
        listener.rebuild(&state);

        Self {
            id: state.id(),
            private_key,
            document_key,
            rng,
            inner: RwLock::new(TreeInner {
                state,
                listener,
                closed: false,
            }),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, TreeInner>, TreeError> {
        self.inner.read().map_err(|_| TreeError::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, TreeInner>, TreeError> {
        let inner = self.inner.write().map_err(|_| TreeError::LockPoisoned)?;
        if inner.closed {
            return Err(TreeError::Closed(self.id));
        }
        Ok(inner)
    }

    /// Id of the tree, equal to the id of its root change.
    pub fn id(&self) -> Hash {
        self.id
    }

    /// Identity used to author local changes.
    pub fn identity(&self) -> PublicKey {
        self.private_key.public_key()
    }

    /// Author a new change on top of the current heads.
    ///
    /// Fails with [`TreeError::Permission`] if the local identity lacks the required role, the
    /// tree is left untouched in that case.
    pub fn add_content(&self, payload: Payload) -> Result<TreeChange, TreeError> {
        let mut inner = self.write()?;
        let TreeInner {
            state, listener, ..
        } = &mut *inner;

        let change = TreeChange::new(
            &self.private_key,
            &self.document_key,
            &self.rng,
            state.heads(),
            timestamp(),
            payload,
        )?;

        state
            .accept(change.clone())
            .map_err(TreeError::Permission)?;

        // The new change descends from all previous heads and thus from every accepted change.
        state.push_order(change.id);
        debug!(tree = %self.id.short(), change = %change.id.short(), "add local change");

        listener.update(state, std::slice::from_ref(&change));

        Ok(change)
    }

    /// Merge a batch of verified changes received from other peers.
    ///
    /// The listener is asked to rebuild when the new changes do not simply extend the previous
    /// total order, or when an ACL mutation was authored concurrently to the previous heads.
    pub fn receive(&self, changes: Vec<TreeChange>) -> Result<AddResult, TreeError> {
        self.merge(changes, vec![])
    }

    fn merge(
        &self,
        changes: Vec<TreeChange>,
        unreadable: Vec<(Hash, String)>,
    ) -> Result<AddResult, TreeError> {
        let mut inner = self.write()?;
        let TreeInner {
            state, listener, ..
        } = &mut *inner;

        let old_heads = state.heads();
        let mut rejected = state.exclude(unreadable);
        let ingested = state.ingest(changes);
        rejected.extend(ingested.rejected);

        if ingested.added.is_empty() {
            return Ok(AddResult {
                heads: old_heads.clone(),
                old_heads,
                added: vec![],
                rejected,
                pending: state.pending_len(),
                mode: AddResultMode::Nothing,
            });
        }

        let is_prefix = state.recompute_order();
        let concurrent_acl = ingested.added.iter().any(|id| {
            state
                .get(id)
                .is_some_and(|change| change.acl_mutation().is_some())
                && !old_heads.iter().all(|head| state.is_ancestor(head, id))
        });

        let mut added = ingested.added;
        added.sort_by_key(|id| state.position(id));

        let mode = if !is_prefix || concurrent_acl {
            debug!(
                tree = %self.id.short(),
                added = added.len(),
                is_prefix,
                concurrent_acl,
                "rebuild after receiving changes"
            );
            listener.rebuild(state);
            AddResultMode::Rebuild
        } else {
            debug!(tree = %self.id.short(), added = added.len(), "append received changes");
            let changes: Vec<TreeChange> = added
                .iter()
                .filter_map(|id| state.get(id).cloned())
                .collect();
            listener.update(state, &changes);
            AddResultMode::Append
        };

        Ok(AddResult {
            old_heads,
            heads: state.heads(),
            added,
            rejected,
            pending: state.pending_len(),
            mode,
        })
    }

    /// Decode raw changes with the key of this tree and merge them.
    ///
    /// Correctly signed changes whose payload can not be read are rejected along with their
    /// descendants. Changes with a broken encoding or signature are ignored, their claimed id can
    /// not be trusted.
    pub fn receive_raw(&self, raw_changes: Vec<RawChange>) -> Result<AddResult, TreeError> {
        let (changes, unreadable) = decode_all(&self.id, raw_changes, &self.document_key);
        self.merge(changes, unreadable)
    }

    /// Run a function against the locked state of the tree.
    pub fn with_state<F, T>(&self, f: F) -> Result<T, TreeError>
    where
        F: FnOnce(&TreeState) -> T,
    {
        let inner = self.read()?;
        Ok(f(&inner.state))
    }

    pub fn root(&self) -> Result<TreeChange, TreeError> {
        self.with_state(|state| state.root().clone())
    }

    pub fn heads(&self) -> Result<Vec<Hash>, TreeError> {
        self.with_state(|state| state.heads())
    }

    pub fn get(&self, id: &Hash) -> Result<Option<TreeChange>, TreeError> {
        self.with_state(|state| state.get(id).cloned())
    }

    pub fn has_change(&self, id: &Hash) -> Result<bool, TreeError> {
        self.with_state(|state| state.has_change(id))
    }

    /// Number of accepted changes, including the root.
    pub fn len(&self) -> Result<usize, TreeError> {
        self.with_state(|state| state.len())
    }

    /// ACL state at the current heads.
    pub fn acl_state(&self) -> Result<AclState, TreeError> {
        self.with_state(|state| state.acl_state())
    }

    pub fn is_rejected(&self, id: &Hash) -> Result<bool, TreeError> {
        self.with_state(|state| state.is_rejected(id))
    }

    pub fn pending_len(&self) -> Result<usize, TreeError> {
        self.with_state(|state| state.pending_len())
    }

    /// Deterministic total order of all accepted changes.
    pub fn order(&self) -> Result<Vec<Hash>, TreeError> {
        self.with_state(|state| state.order().to_vec())
    }

    pub fn position(&self, id: &Hash) -> Result<Option<usize>, TreeError> {
        self.with_state(|state| state.position(id))
    }

    /// Visit accepted changes in total order, starting at the root or right after `from`.
    ///
    /// Iteration stops as soon as `visit` returns `false`.
    pub fn iterate<F>(&self, from: Option<&Hash>, visit: F) -> Result<(), TreeError>
    where
        F: FnMut(&TreeChange) -> bool,
    {
        let inner = self.read()?;
        inner.state.iterate(from, visit)
    }

    /// Raw form of all accepted changes in total order, for persisting or sending them to peers.
    pub fn raw_changes(&self) -> Result<Vec<RawChange>, TreeError> {
        self.with_state(|state| state.raw_changes())
    }

    /// Snapshot of all accepted changes and the current heads.
    pub fn snapshot(&self) -> Result<TreeSnapshot, TreeError> {
        self.with_state(TreeSnapshot::from_state)
    }

    /// Refuse all further mutations. Closing twice has no effect.
    pub fn close(&self) -> Result<(), TreeError> {
        let mut inner = self.inner.write().map_err(|_| TreeError::LockPoisoned)?;
        if !inner.closed {
            debug!(tree = %self.id.short(), "close tree");
            inner.closed = true;
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.read().map(|inner| inner.closed).unwrap_or(true)
    }
}

impl fmt::Debug for ChangeTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeTree")
            .field("id", &self.id)
            .field("identity", &self.identity())
            .finish_non_exhaustive()
    }
}

/// Decode raw changes with the document key, separating out authentic but unreadable ones.
fn decode_all(
    tree: &Hash,
    raw_changes: Vec<RawChange>,
    document_key: &DocumentKey,
) -> (Vec<TreeChange>, Vec<(Hash, String)>) {
    let mut changes = Vec::with_capacity(raw_changes.len());
    let mut unreadable = Vec::new();

    for raw in raw_changes {
        let raw_id = raw.id();
        match TreeChange::from_raw(raw, document_key) {
            Ok(change) => changes.push(change),
            Err(err) => match err.unreadable() {
                Some(id) => {
                    warn!(tree = %tree.short(), change = %id.short(), %err, "unreadable change");
                    unreadable.push((id, err.to_string()));
                }
                None => {
                    warn!(tree = %tree.short(), change = %raw_id.short(), %err, "ignore undecodable change")
                }
            },
        }
    }

    (changes, unreadable)
}

fn contains_cycle(changes: &[TreeChange]) -> bool {
    let mut graph: DiGraphMap<Hash, ()> = DiGraphMap::new();
    for change in changes {
        graph.add_node(change.id);
        for parent in &change.parents {
            graph.add_edge(*parent, change.id, ());
        }
    }
    is_cyclic_directed(&graph)
}

fn timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_micros() as u64)
        .unwrap_or_default()
}

#[derive(Debug, Error)]
pub enum TreeError {
    #[error("could not decode root change: {0}")]
    InvalidRoot(ChangeError),

    #[error("root change {0} has parents")]
    RootHasParents(Hash),

    #[error("invalid acl mutation in root change: {0}")]
    InvalidRootAcl(AclError),

    #[error("changes contain a cycle")]
    Cycle,

    /// Local change was refused by the ACL state at the current heads.
    #[error("change rejected: {0}")]
    Permission(AclError),

    #[error("unknown change {0}")]
    UnknownChange(Hash),

    #[error(transparent)]
    Change(#[from] ChangeError),

    #[error("no document key for tree {0}")]
    MissingKey(Hash),

    #[error("tree {0} is closed")]
    Closed(Hash),

    #[error("tree lock is poisoned")]
    LockPoisoned,
}
