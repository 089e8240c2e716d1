// SPDX-License-Identifier: MIT OR Apache-2.0

use std::marker::PhantomData;

use serde::de::{SeqAccess, Visitor};
use serde::ser::SerializeSeq;
use serde::{Deserialize, Serialize};
use serde_bytes::{ByteBuf as SerdeByteBuf, Bytes as SerdeBytes};

use crate::change::ChangeBody;
use crate::crypto::{NONCE_LEN, XAeadNonce};
use crate::hash::{Hash, HashError};
use crate::identity::{IdentityError, PrivateKey, PublicKey, Signature};

/// Helper method for `serde` to serialize bytes into a hex string when using a human readable
/// encoding (JSON), otherwise it serializes the bytes directly (CBOR).
pub fn serialize_hex<S>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    if serializer.is_human_readable() {
        hex::serde::serialize(value, serializer)
    } else {
        SerdeBytes::new(value).serialize(serializer)
    }
}

/// Helper method for `serde` to deserialize from a hex string into bytes when using a human
/// readable encoding (JSON), otherwise it deserializes the bytes directly (CBOR).
pub fn deserialize_hex<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    if deserializer.is_human_readable() {
        hex::serde::deserialize(deserializer)
    } else {
        let bytes = <SerdeByteBuf>::deserialize(deserializer)?;
        Ok(bytes.to_vec())
    }
}

impl Serialize for Hash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serialize_hex(self.as_bytes(), serializer)
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let bytes = deserialize_hex(deserializer)?;

        bytes
            .as_slice()
            .try_into()
            .map_err(|err: HashError| serde::de::Error::custom(err.to_string()))
    }
}

impl Serialize for PrivateKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serialize_hex(self.as_bytes(), serializer)
    }
}

impl<'de> Deserialize<'de> for PrivateKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let bytes = deserialize_hex(deserializer)?;

        bytes
            .as_slice()
            .try_into()
            .map_err(|err: IdentityError| serde::de::Error::custom(err.to_string()))
    }
}

impl Serialize for PublicKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serialize_hex(self.as_bytes(), serializer)
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let bytes = deserialize_hex(deserializer)?;

        bytes
            .as_slice()
            .try_into()
            .map_err(|err: IdentityError| serde::de::Error::custom(err.to_string()))
    }
}

impl Serialize for Signature {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serialize_hex(&self.to_bytes(), serializer)
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let bytes = deserialize_hex(deserializer)?;

        bytes
            .as_slice()
            .try_into()
            .map_err(|err: IdentityError| serde::de::Error::custom(err.to_string()))
    }
}

impl Serialize for ChangeBody {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut seq = serializer.serialize_seq(Some(6))?;
        seq.serialize_element(&self.version)?;
        seq.serialize_element(&self.author)?;
        seq.serialize_element(&self.parents)?;
        seq.serialize_element(&self.timestamp)?;
        seq.serialize_element(SerdeBytes::new(&self.nonce))?;
        seq.serialize_element(SerdeBytes::new(&self.payload))?;
        seq.end()
    }
}

impl<'de> Deserialize<'de> for ChangeBody {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct BodyVisitor(PhantomData<ChangeBody>);

        impl<'de> Visitor<'de> for BodyVisitor {
            type Value = ChangeBody;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("change body encoded as a sequence")
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let version: u64 = seq
                    .next_element()?
                    .ok_or(serde::de::Error::custom("version missing"))?;
                let author: PublicKey = seq
                    .next_element()?
                    .ok_or(serde::de::Error::custom("author missing"))?;
                let parents: Vec<Hash> = seq
                    .next_element()?
                    .ok_or(serde::de::Error::custom("parents missing"))?;
                let timestamp: u64 = seq
                    .next_element()?
                    .ok_or(serde::de::Error::custom("timestamp missing"))?;
                let nonce: SerdeByteBuf = seq
                    .next_element()?
                    .ok_or(serde::de::Error::custom("nonce missing"))?;
                let payload: SerdeByteBuf = seq
                    .next_element()?
                    .ok_or(serde::de::Error::custom("payload missing"))?;

                if seq.next_element::<serde::de::IgnoredAny>()?.is_some() {
                    return Err(serde::de::Error::custom("too many fields in change body"));
                }

                // Parents need to be strictly ascending, this rules out duplicates and makes the
                // encoding canonical.
                if !parents.windows(2).all(|pair| pair[0] < pair[1]) {
                    return Err(serde::de::Error::custom(
                        "parents are not sorted or contain duplicates",
                    ));
                }

                let nonce: XAeadNonce = nonce.as_slice().try_into().map_err(|_| {
                    serde::de::Error::custom(format!(
                        "invalid nonce length {}, expected {NONCE_LEN}",
                        nonce.len()
                    ))
                })?;

                Ok(ChangeBody {
                    version,
                    author,
                    parents,
                    timestamp,
                    nonce,
                    payload: payload.into_vec(),
                })
            }
        }

        deserializer.deserialize_seq(BodyVisitor(PhantomData))
    }
}
