//! Uses the `ed25519-zebra` crate to implement signing and signature verification.
use ed25519_zebra::{Signature as ZebraSignature, SigningKey, VerificationKey};
use rand_chacha::rand_core::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

use crate::crypto::{KeyPairError, PublicKey, Signature};
use crate::utilities::{blake2_256, from_base58, to_base58};

// Careful with DEBUG, DISPLAY!!!
pub struct Keypair {
    secret: [u8; 32],
    signing_key: SigningKey,
    public_key: PublicKey,
}

impl Keypair {
    /// Generates a new keypair. A seed makes the result reproducible.
    pub fn generate(seed: Option<Vec<u8>>) -> Self {
        let mut secret = [0u8; 32];
        match seed {
            Some(seed) => ChaCha20Rng::from_seed(blake2_256(&seed)).fill_bytes(&mut secret),
            None => rand::rngs::StdRng::from_entropy().fill_bytes(&mut secret),
        }
        let signing_key = SigningKey::from(secret);
        Self::from_parts(secret, signing_key)
    }

    pub fn from_bytes(raw: &[u8]) -> Result<Self, KeyPairError> {
        let secret = <[u8; 32]>::try_from(raw).map_err(|_| KeyPairError::SliceLength)?;
        let signing_key = SigningKey::try_from(&secret[..]).map_err(|_| KeyPairError::PrivateKey)?;
        Ok(Self::from_parts(secret, signing_key))
    }

    pub fn from_base58(encoded: &str) -> Result<Self, KeyPairError> {
        let raw = from_base58(encoded)?;
        Self::from_bytes(&raw)
    }

    pub fn to_base58(&self) -> String {
        to_base58(self.secret)
    }

    pub fn public_key(&self) -> PublicKey {
        self.public_key
    }

    pub fn sign<M: AsRef<[u8]>>(&self, message: M) -> Signature {
        let signature = self.signing_key.sign(message.as_ref());
        let sig_data: [u8; 64] = signature.into();
        Signature(sig_data.to_vec())
    }

    fn from_parts(secret: [u8; 32], signing_key: SigningKey) -> Self {
        let verification_key = VerificationKey::from(&signing_key);
        let public_key: [u8; 32] = verification_key.into();
        Keypair {
            secret,
            signing_key,
            public_key: PublicKey(public_key),
        }
    }
}

pub(crate) fn verify(
    public_key: &PublicKey,
    message: &[u8],
    signature: &Signature,
) -> Result<(), KeyPairError> {
    let verification_key =
        VerificationKey::try_from(&public_key.0[..]).map_err(|_| KeyPairError::PublicKey)?;
    let sig_bytes =
        <[u8; 64]>::try_from(signature.as_bytes()).map_err(|_| KeyPairError::Signature)?;
    verification_key
        .verify(&ZebraSignature::from(sig_bytes), message)
        .map_err(|_| KeyPairError::Signature)
}
