// SPDX-License-Identifier: MIT OR Apache-2.0

use std::sync::{Arc, RwLock};

use canopy_core::{DocumentKey, Hash, PrivateKey};
use canopy_tree::{Account, AddResult, ChangeTree, Payload, TreeChange, TreeError, TreeSnapshot};
use thiserror::Error;

use crate::projection::TextProjection;
use crate::text::{TextChange, TextState};

/// Plain-text document whose history lives in a change tree.
///
/// The tree carries a [`TextProjection`], every accepted change is reflected in [`text`] right
/// after it was added or received.
///
/// [`text`]: PlainTextDocument::text
#[derive(Clone, Debug)]
pub struct PlainTextDocument {
    tree: Arc<ChangeTree>,
    state: Arc<RwLock<TextState>>,
}

impl PlainTextDocument {
    /// Create a new document, the root change carries the initial text.
    pub fn create(
        private_key: PrivateKey,
        document_key: DocumentKey,
        text: &str,
    ) -> Result<Self, DocumentError> {
        let projection = TextProjection::new();
        let state = projection.state();
        let tree = ChangeTree::create(private_key, document_key, text_payload(text), projection)?;
        Ok(Self {
            tree: Arc::new(tree),
            state,
        })
    }

    /// Open a stored document with the keys of an account.
    pub fn open(snapshot: TreeSnapshot, account: &Account) -> Result<Self, DocumentError> {
        let projection = TextProjection::new();
        let state = projection.state();
        let tree = ChangeTree::open(snapshot, account, projection)?;
        Ok(Self {
            tree: Arc::new(tree),
            state,
        })
    }

    pub fn id(&self) -> Hash {
        self.tree.id()
    }

    pub fn text(&self) -> Result<String, DocumentError> {
        let state = self.state.read().map_err(|_| DocumentError::LockPoisoned)?;
        Ok(state.text().to_owned())
    }

    /// Append text, fails if the local identity is not allowed to write.
    pub fn add_text(&self, text: &str) -> Result<TreeChange, DocumentError> {
        let change = self.tree.add_content(text_payload(text))?;
        Ok(change)
    }

    /// Merge changes from other replicas.
    pub fn receive(&self, changes: Vec<TreeChange>) -> Result<AddResult, DocumentError> {
        let result = self.tree.receive(changes)?;
        Ok(result)
    }

    pub fn tree(&self) -> &Arc<ChangeTree> {
        &self.tree
    }
}

fn text_payload(text: &str) -> Payload {
    Payload::content(TextChange::append(text).to_bytes())
}

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error("text state lock is poisoned")]
    LockPoisoned,
}
