// SPDX-License-Identifier: MIT OR Apache-2.0

//! Buffer for changes which arrived before their parents.
use std::collections::{HashMap, HashSet};

use canopy_core::Hash;

use crate::payload::TreeChange;

/// Changes waiting for missing parents.
///
/// Every buffered change is indexed by each parent it is still waiting for. When a parent gets
/// accepted all changes which were only waiting for it are released, when a parent gets rejected
/// all changes depending on it (directly or through other buffered changes) are dropped.
///
/// Example graph where B1 is missing:
///
/// ```text
/// A <-- ?? <-- C
///   \-- B2 <--/
/// ```
///
/// C stays pending until B1 was accepted.
#[derive(Debug, Default)]
pub struct PendingBuffer {
    changes: HashMap<Hash, TreeChange>,
    missing: HashMap<Hash, HashSet<Hash>>,
    dependents: HashMap<Hash, HashSet<Hash>>,
}

impl PendingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer a change together with the parents it is still missing.
    pub fn insert(&mut self, change: TreeChange, missing: HashSet<Hash>) {
        for parent in &missing {
            self.dependents.entry(*parent).or_default().insert(change.id);
        }
        self.missing.insert(change.id, missing);
        self.changes.insert(change.id, change);
    }

    pub fn contains(&self, id: &Hash) -> bool {
        self.changes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Parents we're still waiting for, these need to be requested from other peers.
    pub fn missing(&self) -> HashSet<Hash> {
        self.dependents
            .keys()
            .filter(|id| !self.changes.contains_key(id))
            .copied()
            .collect()
    }

    /// Mark a parent as accepted and return all changes which are not missing anything anymore.
    pub fn resolve(&mut self, id: &Hash) -> Vec<TreeChange> {
        let Some(dependents) = self.dependents.remove(id) else {
            return Vec::new();
        };

        let mut ready: Vec<Hash> = Vec::new();
        for dependent in dependents {
            let Some(missing) = self.missing.get_mut(&dependent) else {
                continue;
            };
            missing.remove(id);
            if missing.is_empty() {
                ready.push(dependent);
            }
        }

        // Release in a stable order.
        ready.sort();
        ready
            .into_iter()
            .filter_map(|id| {
                self.missing.remove(&id);
                self.changes.remove(&id)
            })
            .collect()
    }

    /// Mark a parent as rejected and drop all changes depending on it, returns the ids of all
    /// dropped changes.
    pub fn reject(&mut self, id: &Hash) -> Vec<Hash> {
        let mut dropped = Vec::new();
        let mut queue = vec![*id];

        while let Some(id) = queue.pop() {
            let Some(dependents) = self.dependents.remove(&id) else {
                continue;
            };

            for dependent in dependents {
                let Some(change) = self.changes.remove(&dependent) else {
                    continue;
                };

                if let Some(missing) = self.missing.remove(&dependent) {
                    for parent in missing {
                        if let Some(siblings) = self.dependents.get_mut(&parent) {
                            siblings.remove(&dependent);
                            if siblings.is_empty() {
                                self.dependents.remove(&parent);
                            }
                        }
                    }
                }

                dropped.push(change.id);
                queue.push(change.id);
            }
        }

        dropped.sort();
        dropped
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use canopy_core::{DocumentKey, Hash, PrivateKey, Rng};

    use crate::payload::{Payload, TreeChange};

    use super::PendingBuffer;

    fn change(rng: &Rng, parents: Vec<Hash>) -> TreeChange {
        let document_key = DocumentKey::from_bytes([1; 32]);
        TreeChange::new(
            &PrivateKey::new(),
            &document_key,
            rng,
            parents,
            0,
            Payload::default(),
        )
        .unwrap()
    }

    #[test]
    fn released_when_all_parents_arrived() {
        let rng = Rng::from_seed([1; 32]);
        let a = Hash::new(b"a");
        let b = Hash::new(b"b");

        let c = change(&rng, vec![a, b]);
        let mut pending = PendingBuffer::new();
        pending.insert(c.clone(), HashSet::from([a, b]));
        assert!(pending.contains(&c.id));
        assert_eq!(pending.missing(), HashSet::from([a, b]));

        assert!(pending.resolve(&a).is_empty());
        assert_eq!(pending.len(), 1);
        assert_eq!(pending.missing(), HashSet::from([b]));

        let released = pending.resolve(&b);
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].id, c.id);
        assert!(pending.is_empty());
    }

    #[test]
    fn rejection_drops_dependents() {
        let rng = Rng::from_seed([2; 32]);
        let a = Hash::new(b"a");
        let other = Hash::new(b"other");

        // b waits for a, c waits for b and another missing change.
        let b = change(&rng, vec![a]);
        let c = change(&rng, vec![b.id, other]);

        let mut pending = PendingBuffer::new();
        pending.insert(b.clone(), HashSet::from([a]));
        pending.insert(c.clone(), HashSet::from([b.id, other]));

        let mut expected = vec![b.id, c.id];
        expected.sort();
        assert_eq!(pending.reject(&a), expected);
        assert!(pending.is_empty());
        assert!(pending.missing().is_empty());
    }
}
