// SPDX-License-Identifier: MIT OR Apache-2.0

use std::sync::{Arc, RwLock, RwLockWriteGuard};

use canopy_tree::{TreeChange, TreeState, UpdateListener};
use tracing::{trace, warn};

use crate::text::{TextChange, TextState};

/// Listener keeping a [`TextState`] in sync with the tree it is attached to.
///
/// Changes without content are only marked as visited. Content which does not decode as a
/// [`TextChange`] is logged and skipped.
#[derive(Clone, Debug, Default)]
pub struct TextProjection {
    state: Arc<RwLock<TextState>>,
}

impl TextProjection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle on the projected state.
    pub fn state(&self) -> Arc<RwLock<TextState>> {
        self.state.clone()
    }

    fn lock(&self) -> Option<RwLockWriteGuard<'_, TextState>> {
        match self.state.write() {
            Ok(state) => Some(state),
            Err(_) => {
                warn!("text state lock is poisoned");
                None
            }
        }
    }
}

fn apply_change(state: &mut TextState, change: &TreeChange) {
    if let Some(content) = &change.payload.content {
        match TextChange::from_bytes(content) {
            Ok(text_change) => state.apply(&text_change),
            Err(err) => {
                warn!(change = %change.id.short(), %err, "skip undecodable text change")
            }
        }
    }
    state.mark_applied(change.id);
}

impl UpdateListener for TextProjection {
    fn rebuild(&mut self, tree: &TreeState) {
        let mut text = TextState::default();
        if let Err(err) = tree.iterate(None, |change| {
            apply_change(&mut text, change);
            true
        }) {
            warn!(tree = %tree.id().short(), %err, "rebuilding text failed");
            return;
        }

        trace!(tree = %tree.id().short(), len = text.text().len(), "rebuild text");
        if let Some(mut state) = self.lock() {
            *state = text;
        }
    }

    fn update(&mut self, tree: &TreeState, changes: &[TreeChange]) {
        let Some(mut state) = self.lock() else {
            return;
        };

        let mut applied = state.last_applied().and_then(|id| tree.position(&id));
        for change in changes {
            let Some(position) = tree.position(&change.id) else {
                continue;
            };

            if applied.is_some_and(|applied| position <= applied) {
                trace!(change = %change.id.short(), "skip applied text change");
                continue;
            }

            apply_change(&mut state, change);
            applied = Some(position);
        }
    }
}

#[cfg(test)]
mod tests {
    use canopy_core::PrivateKey;
    use canopy_tree::test_utils::{change, document_key};
    use canopy_tree::{ChangeTree, Payload};

    use crate::text::TextChange;

    use super::TextProjection;

    fn text_payload(text: &str) -> Payload {
        Payload::content(TextChange::append(text).to_bytes())
    }

    #[test]
    fn updates_are_idempotent() {
        let private_key = PrivateKey::new();
        let document_key = document_key(3);
        let projection = TextProjection::new();
        let state = projection.state();

        let tree = ChangeTree::create(
            private_key.clone(),
            document_key.clone(),
            text_payload("a"),
            projection,
        )
        .unwrap();
        let b = tree.add_content(text_payload("b")).unwrap();
        assert_eq!(state.read().unwrap().text(), "ab");

        // Receiving a known change is a no-op for the tree and the projection.
        tree.receive(vec![b]).unwrap();
        assert_eq!(state.read().unwrap().text(), "ab");

        let mut projection = TextProjection::new();
        let state = projection.state();
        tree.with_state(|tree_state| {
            use canopy_tree::UpdateListener;

            projection.rebuild(tree_state);
            let changes: Vec<_> = tree_state
                .order()
                .iter()
                .filter_map(|id| tree_state.get(id).cloned())
                .collect();
            projection.update(tree_state, &changes);
        })
        .unwrap();
        assert_eq!(state.read().unwrap().text(), "ab");
    }

    #[test]
    fn invalid_content_is_skipped() {
        let private_key = PrivateKey::new();
        let document_key = document_key(4);
        let projection = TextProjection::new();
        let state = projection.state();

        let tree = ChangeTree::create(
            private_key.clone(),
            document_key.clone(),
            text_payload("hello"),
            projection,
        )
        .unwrap();

        let garbage = change(
            &private_key,
            &document_key,
            &[tree.id()],
            Payload::content(vec![0xff, 0x00]),
        );
        let garbage_id = garbage.id;
        tree.receive(vec![garbage]).unwrap();

        let text = state.read().unwrap();
        assert_eq!(text.text(), "hello");
        assert_eq!(text.last_applied(), Some(garbage_id));
    }
}
