// SPDX-License-Identifier: MIT OR Apache-2.0

//! Plain-text documents replicated through permissioned change trees.
//!
//! Text is only ever appended. Every append is a [`TextChange`] encoded into the content of a tree
//! change, the visible text is the concatenation of all accepted appends in the total order of
//! the tree. A [`TextProjection`] keeps that text up to date when changes are added locally or
//! received from other replicas.
//!
//! ## Example
//!
//! ```
//! use canopy_core::{DocumentKey, PrivateKey, Rng};
//! use canopy_document::PlainTextDocument;
//!
//! let document_key = DocumentKey::generate(&Rng::default()).unwrap();
//! let document = PlainTextDocument::create(PrivateKey::new(), document_key, "hello").unwrap();
//!
//! document.add_text(" world").unwrap();
//! assert_eq!(document.text().unwrap(), "hello world");
//! ```
mod document;
mod projection;
mod text;

pub use document::{DocumentError, PlainTextDocument};
pub use projection::TextProjection;
pub use text::{TextChange, TextState};
