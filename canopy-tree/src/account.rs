// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::HashMap;

use canopy_core::{DocumentKey, Hash, PrivateKey, PublicKey};

/// Local identity and the keys of all documents it can read.
#[derive(Clone, Debug)]
pub struct Account {
    private_key: PrivateKey,
    document_keys: HashMap<Hash, DocumentKey>,
}

impl Account {
    pub fn new(private_key: PrivateKey) -> Self {
        Self {
            private_key,
            document_keys: HashMap::new(),
        }
    }

    pub fn private_key(&self) -> &PrivateKey {
        &self.private_key
    }

    pub fn public_key(&self) -> PublicKey {
        self.private_key.public_key()
    }

    /// Key of the tree with the given id.
    pub fn document_key(&self, tree_id: &Hash) -> Option<&DocumentKey> {
        self.document_keys.get(tree_id)
    }

    pub fn add_document_key(&mut self, tree_id: Hash, document_key: DocumentKey) {
        self.document_keys.insert(tree_id, document_key);
    }

    pub fn with_document_key(mut self, tree_id: Hash, document_key: DocumentKey) -> Self {
        self.add_document_key(tree_id, document_key);
        self
    }
}
