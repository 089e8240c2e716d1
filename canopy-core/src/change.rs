// SPDX-License-Identifier: MIT OR Apache-2.0

//! Signed and encrypted changes, the nodes of a document's history graph.
//!
//! A change is stored and exchanged as a [`RawChange`]: the CBOR-encoded [`ChangeBody`] plus an
//! ed25519 signature over exactly these bytes. The id of a change is the BLAKE3 hash of the body
//! bytes, which makes it content-derived and stable across peers.
//!
//! The body carries everything needed to place the change into the graph (author, parents) in
//! plaintext, while the application payload is encrypted with the document key. Decoding a raw
//! change verifies the signature _before_ anything else is looked at, then decrypts and
//! deserializes the payload:
//!
//! ```text
//! raw bytes ──> RawChange ──> ChangeBody ──(verify)──> ciphertext ──(decrypt)──> P
//! ```
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cbor::{EncodeError, decode_cbor, encode_cbor};
use crate::crypto::{DocumentKey, Rng, RngError, XAeadError, XAeadNonce};
use crate::hash::Hash;
use crate::identity::{PrivateKey, PublicKey, Signature};

/// Current version of the change encoding.
pub const CHANGE_VERSION: u64 = 1;

/// Signed part of every change.
///
/// Parents are kept sorted and free of duplicates so that the encoding of a body is canonical.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeBody {
    pub version: u64,
    pub author: PublicKey,
    pub parents: Vec<Hash>,
    pub timestamp: u64,
    pub nonce: XAeadNonce,
    pub payload: Vec<u8>,
}

/// Change as it is persisted or sent over the wire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawChange {
    #[serde(with = "serde_bytes")]
    body: Vec<u8>,
    signature: Signature,
}

impl RawChange {
    pub fn new(body: Vec<u8>, signature: Signature) -> Self {
        Self { body, signature }
    }

    /// Content-derived id of this change.
    pub fn id(&self) -> Hash {
        Hash::new(&self.body)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ChangeError> {
        decode_cbor(bytes).map_err(|err| ChangeError::MalformedEncoding(err.to_string()))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        // We can be sure that all values in this module are serializable and _if_ ciborium
        // still fails then because of something really bad ..
        encode_cbor(self).expect("CBOR encoder failed due to an critical IO error")
    }
}

/// Verified and decrypted change carrying an application payload `P`.
#[derive(Clone)]
pub struct Change<P> {
    pub id: Hash,
    pub author: PublicKey,
    pub parents: Vec<Hash>,
    pub timestamp: u64,
    pub payload: P,
    raw: RawChange,
}

impl<P> Change<P> {
    /// Returns `true` if this change starts a new tree.
    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    /// Signature of the author over the change body.
    pub fn signature(&self) -> &Signature {
        self.raw.signature()
    }

    /// Raw, still encrypted representation of this change.
    pub fn raw(&self) -> &RawChange {
        &self.raw
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.raw.to_bytes()
    }
}

impl<P> Change<P>
where
    P: Serialize,
{
    /// Sign and encrypt a new change pointing at the given parents.
    pub fn new(
        private_key: &PrivateKey,
        document_key: &DocumentKey,
        rng: &Rng,
        mut parents: Vec<Hash>,
        timestamp: u64,
        payload: P,
    ) -> Result<Self, ChangeError> {
        parents.sort();
        parents.dedup();

        let plaintext = encode_cbor(&payload)?;
        let nonce: XAeadNonce = rng.random_array()?;
        let ciphertext = document_key
            .encrypt(&plaintext, nonce)
            .map_err(ChangeError::EncryptFailed)?;

        let body = ChangeBody {
            version: CHANGE_VERSION,
            author: private_key.public_key(),
            parents,
            timestamp,
            nonce,
            payload: ciphertext,
        };
        let body_bytes = encode_cbor(&body)?;
        let signature = private_key.sign(&body_bytes);
        let raw = RawChange::new(body_bytes, signature);

        Ok(Self {
            id: raw.id(),
            author: body.author,
            parents: body.parents,
            timestamp,
            payload,
            raw,
        })
    }
}

impl<P> Change<P>
where
    P: DeserializeOwned,
{
    /// Verify the signature of a raw change and decrypt its payload.
    pub fn from_raw(raw: RawChange, document_key: &DocumentKey) -> Result<Self, ChangeError> {
        let id = raw.id();

        let body: ChangeBody = decode_cbor(raw.body())
            .map_err(|err| ChangeError::MalformedEncoding(err.to_string()))?;

        if body.version != CHANGE_VERSION {
            return Err(ChangeError::UnsupportedVersion(body.version));
        }

        if !body.author.verify(raw.body(), raw.signature()) {
            return Err(ChangeError::SignatureInvalid(id));
        }

        let plaintext = document_key
            .decrypt(&body.payload, body.nonce)
            .map_err(|_| ChangeError::DecryptFailed(id))?;

        let payload: P = decode_cbor(&plaintext[..])
            .map_err(|err| ChangeError::MalformedPayload(id, err.to_string()))?;

        Ok(Self {
            id,
            author: body.author,
            parents: body.parents,
            timestamp: body.timestamp,
            payload,
            raw,
        })
    }
}

/// Decode, verify and decrypt a change from its stored bytes.
pub fn decode<P>(bytes: &[u8], document_key: &DocumentKey) -> Result<Change<P>, ChangeError>
where
    P: DeserializeOwned,
{
    Change::from_raw(RawChange::from_bytes(bytes)?, document_key)
}

/// Encode a change into the bytes it is stored and exchanged as.
pub fn encode<P>(change: &Change<P>) -> Vec<u8> {
    change.to_bytes()
}

impl<P> PartialEq for Change<P> {
    fn eq(&self, other: &Self) -> bool {
        self.id.eq(&other.id)
    }
}

impl<P> Eq for Change<P> {}

impl<P> PartialOrd for Change<P> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<P> Ord for Change<P> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id.cmp(&other.id)
    }
}

impl<P> fmt::Debug for Change<P>
where
    P: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Change")
            .field("id", &self.id)
            .field("author", &self.author)
            .field("parents", &self.parents)
            .field("timestamp", &self.timestamp)
            .field("payload", &self.payload)
            .finish()
    }
}

/// Reasons a raw change can not be turned into a [`Change`].
#[derive(Debug, Error)]
pub enum ChangeError {
    /// Bytes are not a valid CBOR encoding of a raw change or its body.
    #[error("malformed change encoding: {0}")]
    MalformedEncoding(String),

    #[error("unsupported change version {0}")]
    UnsupportedVersion(u64),

    /// Signature does not match the change body and claimed author.
    #[error("invalid signature on change {0}")]
    SignatureInvalid(Hash),

    /// Payload could not be decrypted with the given document key.
    #[error("could not decrypt payload of change {0}")]
    DecryptFailed(Hash),

    /// Signed and decrypted payload is not a valid payload.
    #[error("malformed payload in change {0}: {1}")]
    MalformedPayload(Hash, String),

    #[error("could not encrypt change payload: {0}")]
    EncryptFailed(XAeadError),

    #[error(transparent)]
    Rng(#[from] RngError),

    #[error(transparent)]
    Encode(#[from] EncodeError),
}

impl ChangeError {
    /// Id of a correctly signed change whose payload can not be read with the document key.
    ///
    /// Receiving such a change again always yields the same error.
    pub fn unreadable(&self) -> Option<Hash> {
        match self {
            ChangeError::DecryptFailed(id) | ChangeError::MalformedPayload(id, _) => Some(*id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use crate::cbor::encode_cbor;
    use crate::crypto::{DocumentKey, Rng};
    use crate::hash::Hash;
    use crate::identity::PrivateKey;

    use super::{CHANGE_VERSION, Change, ChangeBody, ChangeError, RawChange, decode, encode};

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Note {
        text: String,
    }

    fn note(text: &str) -> Note {
        Note {
            text: text.to_string(),
        }
    }

    #[test]
    fn sign_encrypt_and_decode() {
        let rng = Rng::from_seed([1; 32]);
        let private_key = PrivateKey::new();
        let document_key = DocumentKey::generate(&rng).unwrap();

        let parent = Hash::new(b"parent");
        let change =
            Change::new(&private_key, &document_key, &rng, vec![parent], 7, note("hello"))
                .unwrap();
        assert!(!change.is_root());
        assert_eq!(change.author, private_key.public_key());

        let bytes = encode(&change);
        let decoded: Change<Note> = decode(&bytes, &document_key).unwrap();

        assert_eq!(decoded.id, change.id);
        assert_eq!(decoded.parents, vec![parent]);
        assert_eq!(decoded.timestamp, 7);
        assert_eq!(decoded.payload, note("hello"));

        // Encoding is stable.
        assert_eq!(encode(&decoded), bytes);
    }

    #[test]
    fn parents_are_canonical() {
        let rng = Rng::from_seed([2; 32]);
        let private_key = PrivateKey::new();
        let document_key = DocumentKey::generate(&rng).unwrap();

        let a = Hash::new(b"a");
        let b = Hash::new(b"b");
        let change =
            Change::new(&private_key, &document_key, &rng, vec![b, a, b], 0, note("")).unwrap();

        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(change.parents, expected);
    }

    #[test]
    fn equal_payloads_get_distinct_ids() {
        let rng = Rng::from_seed([3; 32]);
        let private_key = PrivateKey::new();
        let document_key = DocumentKey::generate(&rng).unwrap();

        let change_1 =
            Change::new(&private_key, &document_key, &rng, vec![], 0, note("same")).unwrap();
        let change_2 =
            Change::new(&private_key, &document_key, &rng, vec![], 0, note("same")).unwrap();
        assert_ne!(change_1.id, change_2.id);
    }

    #[test]
    fn invalid_signature() {
        let rng = Rng::from_seed([4; 32]);
        let private_key = PrivateKey::new();
        let document_key = DocumentKey::generate(&rng).unwrap();

        let change =
            Change::new(&private_key, &document_key, &rng, vec![], 0, note("hello")).unwrap();

        // Signature from a different key over the same body.
        let forged_signature = PrivateKey::new().sign(change.raw().body());
        let forged = RawChange::new(change.raw().body().to_vec(), forged_signature);

        let result = Change::<Note>::from_raw(forged, &document_key);
        assert!(matches!(result, Err(ChangeError::SignatureInvalid(id)) if id == change.id));
    }

    #[test]
    fn tampered_body() {
        let rng = Rng::from_seed([5; 32]);
        let private_key = PrivateKey::new();
        let document_key = DocumentKey::generate(&rng).unwrap();

        let change =
            Change::new(&private_key, &document_key, &rng, vec![], 1, note("hello")).unwrap();

        // Re-encode the body with a different timestamp but keep the original signature.
        let body = ChangeBody {
            version: CHANGE_VERSION,
            author: private_key.public_key(),
            parents: vec![],
            timestamp: 2,
            nonce: [0; 24],
            payload: vec![1, 2, 3],
        };
        let tampered = RawChange::new(encode_cbor(&body).unwrap(), *change.signature());

        assert!(matches!(
            Change::<Note>::from_raw(tampered, &document_key),
            Err(ChangeError::SignatureInvalid(_))
        ));
    }

    #[test]
    fn wrong_document_key() {
        let rng = Rng::from_seed([6; 32]);
        let private_key = PrivateKey::new();
        let document_key = DocumentKey::generate(&rng).unwrap();
        let other_key = DocumentKey::generate(&rng).unwrap();

        let change =
            Change::new(&private_key, &document_key, &rng, vec![], 0, note("hello")).unwrap();

        assert!(matches!(
            decode::<Note>(&encode(&change), &other_key),
            Err(ChangeError::DecryptFailed(id)) if id == change.id
        ));
    }

    #[test]
    fn malformed_bytes() {
        let rng = Rng::from_seed([7; 32]);
        let document_key = DocumentKey::generate(&rng).unwrap();

        assert!(matches!(
            decode::<Note>(&[0xff, 0x00, 0x12], &document_key),
            Err(ChangeError::MalformedEncoding(_))
        ));

        // Valid raw change wrapping a body which is not a change.
        let private_key = PrivateKey::new();
        let garbage = encode_cbor(&"not a body").unwrap();
        let signature = private_key.sign(&garbage);
        let raw = RawChange::new(garbage, signature);
        assert!(matches!(
            Change::<Note>::from_raw(raw, &document_key),
            Err(ChangeError::MalformedEncoding(_))
        ));
    }

    #[test]
    fn trailing_bytes_in_body() {
        let rng = Rng::from_seed([8; 32]);
        let private_key = PrivateKey::new();
        let document_key = DocumentKey::generate(&rng).unwrap();

        let change =
            Change::new(&private_key, &document_key, &rng, vec![], 0, note("hello")).unwrap();

        // Correctly signed, but the body carries an extra byte.
        let mut body = change.raw().body().to_vec();
        body.push(0x00);
        let signature = private_key.sign(&body);
        let padded = RawChange::new(body, signature);

        assert!(matches!(
            Change::<Note>::from_raw(padded, &document_key),
            Err(ChangeError::MalformedEncoding(_))
        ));
    }

    #[test]
    fn malformed_payload() {
        let rng = Rng::from_seed([9; 32]);
        let private_key = PrivateKey::new();
        let document_key = DocumentKey::generate(&rng).unwrap();

        // Authentic change whose payload is not a note.
        let change =
            Change::new(&private_key, &document_key, &rng, vec![], 0, 42u64).unwrap();

        let result = Change::<Note>::from_raw(change.raw().clone(), &document_key);
        assert!(matches!(
            &result,
            Err(ChangeError::MalformedPayload(id, _)) if *id == change.id
        ));
        assert_eq!(result.unwrap_err().unreadable(), Some(change.id));

        // Forged signatures do not exclude the id they claim.
        let forged = RawChange::new(
            change.raw().body().to_vec(),
            PrivateKey::new().sign(change.raw().body()),
        );
        let result = Change::<u64>::from_raw(forged, &document_key);
        assert!(result.unwrap_err().unreadable().is_none());
    }
}
