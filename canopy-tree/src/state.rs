// SPDX-License-Identifier: MIT OR Apache-2.0

//! Accepted changes of one tree, their deterministic order and the derived ACL state.
use std::collections::{BTreeSet, HashMap, HashSet};

use canopy_auth::{AclChange, AclError, AclState};
use canopy_core::{Hash, RawChange};
use petgraph::graphmap::DiGraphMap;
use thiserror::Error;
use tracing::{debug, trace};

use crate::graph;
use crate::payload::TreeChange;
use crate::pending::PendingBuffer;
use crate::tree::TreeError;

/// Reason a change was refused by a tree. Rejections are permanent.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Rejection {
    /// Author lacked the required role or the mutation was invalid in the causal past of the
    /// change.
    #[error(transparent)]
    Permission(#[from] AclError),

    /// An ancestor of the change was rejected.
    #[error("ancestor {0} was rejected")]
    RejectedAncestor(Hash),

    /// Change has no parents but is not the root of this tree.
    #[error("change is the root of a different tree")]
    ForeignRoot,

    /// Change is signed by its author but the payload can not be decrypted or decoded with the
    /// document key of this tree.
    #[error("unreadable payload: {0}")]
    Unreadable(String),
}

/// Outcome of ingesting a batch of changes.
#[derive(Debug, Default)]
pub(crate) struct Ingested {
    pub(crate) added: Vec<Hash>,
    pub(crate) rejected: Vec<Hash>,
}

/// State of a change tree.
///
/// Only accepted changes are part of the graph. For every accepted change the ACL state _after_
/// applying it is kept, this is the state any single-parent child is checked against.
#[derive(Debug)]
pub struct TreeState {
    root: Hash,
    changes: HashMap<Hash, TreeChange>,
    graph: DiGraphMap<Hash, ()>,
    acl_states: HashMap<Hash, AclState>,
    heads: BTreeSet<Hash>,
    order: Vec<Hash>,
    positions: HashMap<Hash, usize>,
    rejected: HashMap<Hash, Rejection>,
    pending: PendingBuffer,
}

impl TreeState {
    /// Initialise the state with a verified root change.
    pub(crate) fn new(root: TreeChange) -> Result<Self, TreeError> {
        if !root.is_root() {
            return Err(TreeError::RootHasParents(root.id));
        }

        let acl_state = AclState::from_root(&root).map_err(TreeError::InvalidRootAcl)?;

        let id = root.id;
        let mut graph = DiGraphMap::new();
        graph.add_node(id);

        Ok(Self {
            root: id,
            changes: HashMap::from([(id, root)]),
            graph,
            acl_states: HashMap::from([(id, acl_state)]),
            heads: BTreeSet::from([id]),
            order: vec![id],
            positions: HashMap::from([(id, 0)]),
            rejected: HashMap::new(),
            pending: PendingBuffer::new(),
        })
    }

    /// Id of the root change, which is also the id of the tree.
    pub fn id(&self) -> Hash {
        self.root
    }

    pub fn root(&self) -> &TreeChange {
        &self.changes[&self.root]
    }

    /// Accepted changes without any accepted children, in ascending order.
    pub fn heads(&self) -> Vec<Hash> {
        self.heads.iter().copied().collect()
    }

    pub fn get(&self, id: &Hash) -> Option<&TreeChange> {
        self.changes.get(id)
    }

    pub fn has_change(&self, id: &Hash) -> bool {
        self.changes.contains_key(id)
    }

    /// Number of accepted changes, including the root.
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn is_rejected(&self, id: &Hash) -> bool {
        self.rejected.contains_key(id)
    }

    pub fn rejection(&self, id: &Hash) -> Option<&Rejection> {
        self.rejected.get(id)
    }

    /// Number of changes waiting for missing parents.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Ids of changes which are referenced by pending changes but unknown to this tree.
    pub fn missing(&self) -> HashSet<Hash> {
        self.pending.missing()
    }

    /// Deterministic total order of all accepted changes.
    pub fn order(&self) -> &[Hash] {
        &self.order
    }

    /// Position of a change in the total order.
    pub fn position(&self, id: &Hash) -> Option<usize> {
        self.positions.get(id).copied()
    }

    /// ACL state at the current heads.
    pub fn acl_state(&self) -> AclState {
        self.state_at(&self.heads())
    }

    /// ACL state right after the given change was applied.
    pub fn acl_state_at(&self, id: &Hash) -> Option<&AclState> {
        self.acl_states.get(id)
    }

    /// Returns `true` if a linear path exists between the two changes, that is `to` knew about
    /// `from` when it was authored.
    pub fn is_ancestor(&self, from: &Hash, to: &Hash) -> bool {
        graph::has_path(&self.graph, *from, *to)
    }

    /// Visit accepted changes in total order, starting at the root or right after `from`.
    ///
    /// Iteration stops as soon as `visit` returns `false`.
    pub fn iterate<F>(&self, from: Option<&Hash>, mut visit: F) -> Result<(), TreeError>
    where
        F: FnMut(&TreeChange) -> bool,
    {
        let start = match from {
            Some(id) => self.position(id).ok_or(TreeError::UnknownChange(*id))? + 1,
            None => 0,
        };

        for id in &self.order[start..] {
            let change = self.changes.get(id).ok_or(TreeError::UnknownChange(*id))?;
            if !visit(change) {
                break;
            }
        }

        Ok(())
    }

    /// Raw form of all accepted changes in total order.
    pub fn raw_changes(&self) -> Vec<RawChange> {
        self.order
            .iter()
            .filter_map(|id| self.changes.get(id))
            .map(|change| change.raw().clone())
            .collect()
    }

    /// ACL state over a set of accepted parents.
    ///
    /// With a single parent this is the cached state after that parent. Multiple parents are
    /// merged by replaying the total order of their combined causal history and checking every
    /// ACL mutation again against the merged state. A mutation which is not valid anymore, for
    /// example because a concurrent branch removed its author, is skipped.
    pub(crate) fn state_at(&self, parents: &[Hash]) -> AclState {
        if let [parent] = parents {
            if let Some(state) = self.acl_states.get(parent) {
                return state.clone();
            }
        }

        let closure = graph::ancestors(&self.graph, parents);
        let mut state = self.acl_states[&self.root].clone();

        for id in graph::linearize_subset(&self.graph, &closure) {
            if id == self.root {
                continue;
            }

            let Some(change) = self.changes.get(&id) else {
                continue;
            };

            if change.acl_mutation().is_none() {
                continue;
            }

            if let Err(err) = state.apply(change) {
                trace!(change = %id.short(), %err, "skip acl mutation in merged state");
            }
        }

        state
    }

    /// Validate a change whose parents are all accepted and add it to the graph.
    ///
    /// This does not update the total order.
    pub(crate) fn accept(&mut self, change: TreeChange) -> Result<(), AclError> {
        let mut state = self.state_at(&change.parents);
        state.apply(&change)?;

        let id = change.id;
        self.graph.add_node(id);
        for parent in &change.parents {
            self.graph.add_edge(*parent, id, ());
            self.heads.remove(parent);
        }
        self.heads.insert(id);
        self.acl_states.insert(id, state);
        self.changes.insert(id, change);

        Ok(())
    }

    /// Append a change to the end of the total order.
    ///
    /// Only valid for changes which have all current heads as ancestors.
    pub(crate) fn push_order(&mut self, id: Hash) {
        self.positions.insert(id, self.order.len());
        self.order.push(id);
    }

    /// Recompute the total order, returns `true` if the previous order is a prefix of the new one.
    pub(crate) fn recompute_order(&mut self) -> bool {
        let order = graph::linearize(&self.graph);
        let is_prefix = order.len() >= self.order.len() && order[..self.order.len()] == self.order;

        self.positions = order
            .iter()
            .enumerate()
            .map(|(position, id)| (*id, position))
            .collect();
        self.order = order;

        is_prefix
    }

    fn reject(&mut self, id: Hash, rejection: Rejection, ingested: &mut Ingested) {
        debug!(change = %id.short(), reason = %rejection, "reject change");
        self.rejected.insert(id, rejection);
        ingested.rejected.push(id);

        for dependent in self.pending.reject(&id) {
            debug!(change = %dependent.short(), ancestor = %id.short(), "reject pending change");
            self.rejected
                .insert(dependent, Rejection::RejectedAncestor(id));
            ingested.rejected.push(dependent);
        }
    }

    /// Reject changes which can never be read by this tree, together with their pending
    /// descendants. Descendants arriving later are rejected on arrival.
    ///
    /// Returns the ids of all rejected changes.
    pub(crate) fn exclude(&mut self, unreadable: Vec<(Hash, String)>) -> Vec<Hash> {
        let mut ingested = Ingested::default();
        for (id, reason) in unreadable {
            if self.changes.contains_key(&id) || self.rejected.contains_key(&id) {
                continue;
            }
            self.reject(id, Rejection::Unreadable(reason), &mut ingested);
        }
        ingested.rejected
    }

    /// Process a batch of verified changes in any order.
    ///
    /// Changes whose parents are unknown are held back until the parents arrive. Whether a change
    /// is accepted only depends on its causal history, so the outcome is independent of arrival
    /// order. The total order is not updated.
    pub(crate) fn ingest(&mut self, changes: Vec<TreeChange>) -> Ingested {
        let mut ingested = Ingested::default();
        let mut queue = changes;
        queue.reverse();

        while let Some(change) = queue.pop() {
            let id = change.id;

            if self.changes.contains_key(&id)
                || self.rejected.contains_key(&id)
                || self.pending.contains(&id)
            {
                trace!(change = %id.short(), "ignore known change");
                continue;
            }

            if change.is_root() {
                self.reject(id, Rejection::ForeignRoot, &mut ingested);
                continue;
            }

            if let Some(parent) = change
                .parents
                .iter()
                .find(|parent| self.rejected.contains_key(parent))
            {
                let parent = *parent;
                self.reject(id, Rejection::RejectedAncestor(parent), &mut ingested);
                continue;
            }

            let missing: HashSet<Hash> = change
                .parents
                .iter()
                .filter(|parent| !self.changes.contains_key(parent))
                .copied()
                .collect();
            if !missing.is_empty() {
                debug!(change = %id.short(), missing = missing.len(), "change is pending");
                self.pending.insert(change, missing);
                continue;
            }

            match self.accept(change) {
                Ok(()) => {
                    trace!(change = %id.short(), "accept change");
                    ingested.added.push(id);
                    // Parents of released changes are accepted now, process them next.
                    let released = self.pending.resolve(&id);
                    queue.extend(released.into_iter().rev());
                }
                Err(err) => self.reject(id, Rejection::Permission(err), &mut ingested),
            }
        }

        ingested
    }
}
