// SPDX-License-Identifier: MIT OR Apache-2.0

use canopy_core::Hash;
use canopy_core::cbor::{DecodeError, decode_cbor, encode_cbor};
use serde::{Deserialize, Serialize};

/// Mutation of a plain-text document, carried as content of a tree change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextChange {
    Append { text: String },
}

impl TextChange {
    pub fn append(text: impl Into<String>) -> Self {
        Self::Append { text: text.into() }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        // Any CBOR encoding error is a critical IO error, which can not happen when writing into
        // a vector.
        encode_cbor(self).expect("CBOR encoder failed due to an critical IO error")
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        decode_cbor(bytes)
    }
}

/// Text derived from all changes of a tree up to `last_applied`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TextState {
    text: String,
    last_applied: Option<Hash>,
}

impl TextState {
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Last change visited, with or without text content.
    pub fn last_applied(&self) -> Option<Hash> {
        self.last_applied
    }

    pub(crate) fn apply(&mut self, change: &TextChange) {
        match change {
            TextChange::Append { text } => self.text.push_str(text),
        }
    }

    pub(crate) fn mark_applied(&mut self, id: Hash) {
        self.last_applied = Some(id);
    }
}
