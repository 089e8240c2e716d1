// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fixtures for tests of trees and their consumers.
use canopy_core::{DocumentKey, Hash, PrivateKey, Rng};

use crate::account::Account;
use crate::payload::{Payload, TreeChange};

pub fn setup_logging() {
    if std::env::var("RUST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }
}

/// Deterministic document key derived from a seed.
pub fn document_key(seed: u8) -> DocumentKey {
    let rng = Rng::from_seed([seed; 32]);
    DocumentKey::generate(&rng).expect("generate document key")
}

/// Sign and encrypt a change without going through a tree.
pub fn change(
    author: &PrivateKey,
    document_key: &DocumentKey,
    parents: &[Hash],
    payload: Payload,
) -> TreeChange {
    TreeChange::new(
        author,
        document_key,
        &Rng::default(),
        parents.to_vec(),
        0,
        payload,
    )
    .expect("create change")
}

/// Account holding a fresh identity and the key of the given tree.
pub fn account(tree_id: Hash, document_key: &DocumentKey) -> Account {
    Account::new(PrivateKey::new()).with_document_key(tree_id, document_key.clone())
}
