// SPDX-License-Identifier: MIT OR Apache-2.0

//! CBOR encoding of everything which leaves a replica.
//!
//! Three layers of a change are encoded with [CBOR]:
//!
//! ```text
//! raw change   [ body: bytes, signature: bytes ]
//! body         [ version, author, parents, timestamp, nonce, ciphertext ]
//! ciphertext   XChaCha20-Poly1305( CBOR(payload) )
//! ```
//!
//! Ids and signatures are computed over the exact body bytes. A body decodes from exactly one
//! CBOR item, anything following it is an error instead of being silently dropped, otherwise two
//! different byte strings (and ids) would describe the same change.
//!
//! [CBOR]: https://www.rfc-editor.org/rfc/rfc8949
use std::io::Read;

use ciborium::de::Error as DeserializeError;
use ciborium::ser::Error as SerializeError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Encode a change, body or payload.
pub fn encode_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>, EncodeError> {
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(value, &mut bytes)?;
    Ok(bytes)
}

/// Decode a single CBOR item which has to span the whole input.
pub fn decode_cbor<T, R>(mut reader: R) -> Result<T, DecodeError>
where
    T: for<'a> Deserialize<'a>,
    R: Read,
{
    let value = ciborium::from_reader::<T, _>(&mut reader)?;

    let mut rest = Vec::new();
    reader.read_to_end(&mut rest).map_err(DecodeError::Io)?;
    if !rest.is_empty() {
        return Err(DecodeError::TrailingBytes(rest.len()));
    }

    Ok(value)
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("could not write encoded change: {0}")]
    Io(std::io::Error),

    /// Value has no CBOR representation, for example a map with non-string keys in a payload.
    #[error("value can not be encoded: {0}")]
    Value(String),
}

impl From<SerializeError<std::io::Error>> for EncodeError {
    fn from(value: SerializeError<std::io::Error>) -> Self {
        match value {
            SerializeError::Io(err) => EncodeError::Io(err),
            SerializeError::Value(err) => EncodeError::Value(err),
        }
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("could not read encoded change: {0}")]
    Io(std::io::Error),

    /// Input is not well-formed CBOR, at the given byte offset.
    #[error("invalid CBOR at byte {0}")]
    Syntax(usize),

    /// Input is valid CBOR but does not have the expected shape, for example a body with the wrong
    /// number of fields or unsorted parents.
    #[error("unexpected value at byte {0:?}: {1}")]
    Semantic(Option<usize>, String),

    #[error("input is nested too deeply")]
    RecursionLimitExceeded,

    #[error("{0} unexpected bytes after encoded value")]
    TrailingBytes(usize),
}

impl From<DeserializeError<std::io::Error>> for DecodeError {
    fn from(value: DeserializeError<std::io::Error>) -> Self {
        match value {
            DeserializeError::Io(err) => DecodeError::Io(err),
            DeserializeError::Syntax(offset) => DecodeError::Syntax(offset),
            DeserializeError::Semantic(offset, description) => {
                DecodeError::Semantic(offset, description)
            }
            DeserializeError::RecursionLimitExceeded => DecodeError::RecursionLimitExceeded,
        }
    }
}
