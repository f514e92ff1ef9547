use base64::Engine;
use ed25519_dalek::Signer;
use ed25519_dalek::{SecretKey, SigningKey, ed25519};
use zeroize::Zeroize;

use crate::crypto::{hash, random_seed};
use crate::{Error, X25519PublicKey, X25519Secret};

/// Long-term identity key pair combining signing and key agreement.
///
/// An `IdentityKeyPair` contains an Ed25519 signing key for authenticating
/// the signed prekey and an X25519 key for Diffie-Hellman, derived from the
/// same seed. Created once per device; the private halves never leave the
/// local keystore.
pub struct IdentityKeyPair {
    signing_key: Box<SigningKey>,
    dh_key: X25519Secret,
}

impl IdentityKeyPair {
    /// Generates a new identity key pair from the OS random source.
    ///
    /// Aborts with [`Error::RandomnessUnavailable`] if the source fails.
    pub fn generate() -> Result<Self, Error> {
        let seed = random_seed()?;
        let signing_key = Box::new(SigningKey::from(SecretKey::from(*seed)));
        let dh_key = X25519Secret::from(seed);

        Ok(Self {
            signing_key,
            dh_key,
        })
    }

    /// Opaque fingerprint identifying this key pair.
    ///
    /// Derived from the public halves only, so both parties compute the
    /// same id for the same identity.
    pub fn key_id(&self) -> String {
        identity_key_id(&self.signing_key.verifying_key(), &self.dh_key.public_key())
    }

    /// Signs a message with the Ed25519 signing key.
    pub fn sign(&self, message: &[u8]) -> ed25519_dalek::Signature {
        self.signing_key.sign(message)
    }

    /// Verifies a signature against this identity's own public key.
    pub fn verify(
        &self,
        message: &[u8],
        signature: &ed25519::Signature,
    ) -> Result<(), ed25519::Error> {
        let verifying_key = self.signing_key.verifying_key();
        verifying_key.verify_strict(message, signature)
    }

    /// Returns the public Ed25519 verification key.
    pub fn signing_key_public(&self) -> ed25519_dalek::VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Returns the public X25519 key for Diffie-Hellman operations.
    pub fn dh_key_public(&self) -> X25519PublicKey {
        self.dh_key.public_key()
    }

    /// Performs Diffie-Hellman with another party's public key.
    pub(crate) fn dh(&self, public_key: &X25519PublicKey) -> x25519_dalek::SharedSecret {
        self.dh_key.dh(public_key)
    }

    /// Serializes the key pair to 64 bytes for the local keystore.
    ///
    /// First 32 bytes are the Ed25519 private key, last 32 the X25519
    /// private key. Only the encrypted-at-rest keystore may hold this.
    pub fn to_bytes(&self) -> [u8; 64] {
        let mut bytes = [0u8; 64];
        bytes[0..32].copy_from_slice(self.signing_key.as_bytes().as_slice());
        bytes[32..64].copy_from_slice(self.dh_key.as_bytes());

        bytes
    }
}

impl From<[u8; 64]> for IdentityKeyPair {
    fn from(bytes: [u8; 64]) -> Self {
        let mut signing_bytes = Box::new([0u8; 32]);
        signing_bytes.copy_from_slice(&bytes[0..32]);
        let signing_key = Box::new(SigningKey::from_bytes(&SecretKey::from(*signing_bytes)));
        signing_bytes.zeroize();

        let mut dh_bytes = Box::new([0u8; 32]);
        dh_bytes.copy_from_slice(&bytes[32..64]);
        let dh_key = X25519Secret::from(dh_bytes);

        Self {
            signing_key,
            dh_key,
        }
    }
}

impl Zeroize for IdentityKeyPair {
    fn zeroize(&mut self) {
        // SigningKey zeroizes on drop; wipe the DH half explicitly.
        self.dh_key.zeroize();
    }
}

/// Fingerprint for an identity given its two public keys.
pub fn identity_key_id(
    signing_key_public: &ed25519_dalek::VerifyingKey,
    dh_key_public: &X25519PublicKey,
) -> String {
    let mut material = [0u8; 64];
    material[0..32].copy_from_slice(signing_key_public.as_bytes());
    material[32..64].copy_from_slice(dh_key_public.as_bytes());

    let engine = base64::engine::general_purpose::STANDARD;
    engine.encode(hash(&material))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signing_and_verification() {
        let identity = IdentityKeyPair::generate().unwrap();
        let message = b"This is a test message";

        let signature = identity.sign(message);
        assert!(identity.verify(message, &signature).is_ok());

        let modified_message = b"This is a modified message";
        assert!(identity.verify(modified_message, &signature).is_err());
    }

    #[test]
    fn test_key_id_is_stable_and_distinct() {
        let identity = IdentityKeyPair::generate().unwrap();
        assert_eq!(identity.key_id(), identity.key_id());

        let other = IdentityKeyPair::generate().unwrap();
        assert_ne!(identity.key_id(), other.key_id());
    }

    #[test]
    fn test_serialization_round_trip() {
        let original = IdentityKeyPair::generate().unwrap();
        let serialized = original.to_bytes();
        assert_eq!(serialized.len(), 64);

        let restored = IdentityKeyPair::from(serialized);
        assert_eq!(
            original.signing_key.as_bytes(),
            restored.signing_key.as_bytes()
        );
        assert_eq!(original.dh_key.as_bytes(), restored.dh_key.as_bytes());
        assert_eq!(original.key_id(), restored.key_id());
    }
}
