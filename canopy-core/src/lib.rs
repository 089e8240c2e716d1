// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core data-types for permissioned, encrypted document trees.
//!
//! Every edit to a document is a [`Change`]: a node in a directed acyclic graph which points at
//! the ids of the changes it builds upon. Changes are signed by their author's
//! [`PrivateKey`](identity::PrivateKey), their payload is encrypted with a shared
//! [`DocumentKey`](crypto::DocumentKey) and their id is the BLAKE3 [`Hash`] of the signed body.
//!
//! ## Example
//!
//! ```
//! use canopy_core::{Change, DocumentKey, PrivateKey, Rng, decode, encode};
//!
//! let rng = Rng::default();
//! let private_key = PrivateKey::new();
//! let document_key = DocumentKey::generate(&rng).unwrap();
//!
//! // Create a root change without any parents.
//! let root = Change::new(&private_key, &document_key, &rng, vec![], 0, "hello".to_string())
//!     .unwrap();
//! assert!(root.is_root());
//!
//! // Everyone holding the document key can decode and verify it.
//! let bytes = encode(&root);
//! let root_again: Change<String> = decode(&bytes, &document_key).unwrap();
//! assert_eq!(root_again.payload, "hello");
//! assert_eq!(root_again.author, private_key.public_key());
//! ```
pub mod cbor;
pub mod change;
pub mod crypto;
pub mod hash;
pub mod identity;
mod serde;

pub use change::{CHANGE_VERSION, Change, ChangeBody, ChangeError, RawChange, decode, encode};
pub use crypto::{DocumentKey, Rng, RngError};
pub use hash::{Hash, HashError};
pub use identity::{IdentityError, PrivateKey, PublicKey, Signature};
pub use serde::{deserialize_hex, serialize_hex};
