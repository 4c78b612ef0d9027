//! Cryptographic module used for signing and verifying events and blocks.

use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::utilities::{from_base58, from_hex, to_base58, to_hex};

pub(crate) mod ed25519;

pub use ed25519::Keypair;

#[derive(Error, Debug)]
pub enum KeyPairError {
    #[error("Invalid key length")]
    SliceLength,
    #[error("Invalid signature")]
    Signature,
    #[error("Invalid private key")]
    PrivateKey,
    #[error("Invalid public key")]
    PublicKey,
    #[error("Invalid encoding: {0}")]
    Encoding(#[from] anyhow::Error),
}

/// Raw ed25519 verification key bytes. Serialized as base58.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKey(pub(crate) [u8; 32]);

impl PublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyPairError> {
        let raw = <[u8; 32]>::try_from(bytes).map_err(|_| KeyPairError::SliceLength)?;
        Ok(PublicKey(raw))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_base58(&self) -> String {
        to_base58(self.0)
    }

    pub fn from_base58(encoded: &str) -> Result<Self, KeyPairError> {
        let bytes = from_base58(encoded)?;
        Self::from_bytes(&bytes)
    }

    /// Checks an ed25519 signature made by the owner of this key.
    pub fn verify<M: AsRef<[u8]>>(&self, message: M, signature: &Signature) -> bool {
        ed25519::verify(self, message.as_ref(), signature).is_ok()
    }
}

impl Display for PublicKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_base58())
    }
}

impl Debug for PublicKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let encoded = self.to_base58();
        write!(f, "PublicKey({})", &encoded[..encoded.len().min(8)])
    }
}

impl FromStr for PublicKey {
    type Err = KeyPairError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_base58(s)
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base58())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        PublicKey::from_base58(&encoded).map_err(de::Error::custom)
    }
}

/// Detached ed25519 signature, hex on the wire.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Signature(pub(crate) Vec<u8>);

impl Signature {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Debug for Signature {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let encoded = to_hex(&self.0);
        write!(f, "Signature({})", &encoded[..encoded.len().min(12)])
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&to_hex(&self.0))
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        from_hex(encoded).map(Signature).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn test_sign_verify() {
        let keypair = Keypair::generate(None);
        let signature = keypair.sign(b"message");

        assert!(keypair.public_key().verify(b"message", &signature));
        assert!(!keypair.public_key().verify(b"other message", &signature));

        let other = Keypair::generate(None);
        assert!(!other.public_key().verify(b"message", &signature));
    }

    #[test]
    fn test_truncated_signature_does_not_verify() {
        let keypair = Keypair::generate(None);
        let mut signature = keypair.sign(b"message");
        signature.0.truncate(10);
        assert!(!keypair.public_key().verify(b"message", &signature));
    }

    #[test]
    fn test_public_key_base58() {
        let keypair = Keypair::generate(None);
        let public_key = keypair.public_key();
        let parsed: PublicKey = public_key.to_string().parse().unwrap();
        assert_eq!(public_key, parsed);

        assert_matches!(
            PublicKey::from_base58(&to_base58([1u8; 5])),
            Err(KeyPairError::SliceLength)
        );
    }

    #[test]
    fn test_keypair_from_base58() {
        let keypair = Keypair::generate(None);
        let restored = Keypair::from_base58(&keypair.to_base58()).unwrap();
        assert_eq!(keypair.public_key(), restored.public_key());
    }

    #[test]
    fn test_seeded_keypair_is_deterministic() {
        let first = Keypair::generate(Some(b"seed".to_vec()));
        let second = Keypair::generate(Some(b"seed".to_vec()));
        assert_eq!(first.public_key(), second.public_key());
    }
}
