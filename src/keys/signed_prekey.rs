use std::collections::HashMap;
use std::time::SystemTime;

use ed25519_dalek::Signature;
use x25519_dalek::SharedSecret;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::random_seed;
use crate::keys::IdentityKeyPair;
use crate::{Error, X25519PublicKey, X25519Secret};

/// A medium-term key-agreement key whose public half is signed by the
/// identity key.
///
/// Rotated periodically; retired keys are retained until no in-flight
/// envelope can reference them, then pruned.
pub struct SignedPreKey {
    pre_key: X25519Secret,
    id: u32,
    created_at: SystemTime,
}

impl SignedPreKey {
    /// Creates a new signed prekey with the given id.
    pub fn new(id: u32) -> Result<Self, Error> {
        let seed = random_seed()?;

        Ok(Self {
            pre_key: X25519Secret::from(seed),
            id,
            created_at: SystemTime::now(),
        })
    }

    /// Returns the public component of this prekey.
    pub fn public_key(&self) -> X25519PublicKey {
        self.pre_key.public_key()
    }

    /// Returns the unique identifier for this prekey.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Returns when this prekey was created.
    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// Performs Diffie-Hellman with the other party's public key.
    pub(crate) fn dh(&self, public_key: &X25519PublicKey) -> SharedSecret {
        self.pre_key.dh(public_key)
    }

    /// Signs this prekey's public value with the identity key.
    ///
    /// The signature proves to bundle fetchers that the prekey belongs to
    /// the owner of the identity key.
    pub fn signature(&self, identity: &IdentityKeyPair) -> Signature {
        let encoded = self.public_key().to_bytes();
        identity.sign(&encoded)
    }

    /// Serializes to 36 bytes: 4-byte big-endian id, 32-byte private key.
    pub fn to_bytes(&self) -> [u8; 36] {
        let mut result = [0u8; 36];

        result[0..4].copy_from_slice(&self.id.to_be_bytes());
        result[4..].copy_from_slice(self.pre_key.as_bytes());

        result
    }
}

impl From<[u8; 36]> for SignedPreKey {
    fn from(bytes: [u8; 36]) -> Self {
        let mut id_bytes = [0u8; 4];
        id_bytes.copy_from_slice(&bytes[0..4]);
        let id = u32::from_be_bytes(id_bytes);

        let mut key_bytes = Box::new([0u8; 32]);
        key_bytes.copy_from_slice(&bytes[4..]);

        Self {
            pre_key: X25519Secret::from(key_bytes),
            id,
            created_at: SystemTime::now(),
        }
    }
}

impl Zeroize for SignedPreKey {
    fn zeroize(&mut self) {
        self.pre_key.zeroize();
        self.id = 0;
    }
}

impl ZeroizeOnDrop for SignedPreKey {}

/// Signed prekeys indexed by id, with rotation and bounded retention.
pub struct SignedPreKeyStore {
    keys: HashMap<u32, SignedPreKey>,
    next_id: u32,
    max_keys: usize,
}

impl SignedPreKeyStore {
    pub(crate) fn new(max_keys: usize) -> Result<Self, Error> {
        let mut keys = HashMap::with_capacity(max_keys);
        let id = 1;
        keys.insert(id, SignedPreKey::new(id)?);

        Ok(Self {
            keys,
            next_id: id + 1,
            max_keys,
        })
    }

    /// Issues a new current key, pruning the oldest retained key once the
    /// retention bound is exceeded.
    pub(crate) fn rotate(&mut self) -> Result<&SignedPreKey, Error> {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        self.keys.insert(id, SignedPreKey::new(id)?);

        while self.keys.len() > self.max_keys {
            if let Some(oldest) = self.keys.keys().min().copied() {
                self.keys.remove(&oldest);
            }
        }

        self.get(id)
            .ok_or_else(|| Error::PreKey("Rotated signed prekey missing".to_string()))
    }

    pub(crate) fn get(&self, id: u32) -> Option<&SignedPreKey> {
        self.keys.get(&id)
    }

    /// Returns the most recently issued signed prekey.
    pub(crate) fn current(&self) -> Result<&SignedPreKey, Error> {
        let current_id = self.next_id.wrapping_sub(1);
        self.keys
            .get(&current_id)
            .ok_or_else(|| Error::PreKey("No current signed prekey".to_string()))
    }
}

impl Zeroize for SignedPreKeyStore {
    fn zeroize(&mut self) {
        for (_, key) in self.keys.iter_mut() {
            key.zeroize();
        }
        self.keys.clear();
        self.next_id = 0;
        self.max_keys = 0;
    }
}

impl ZeroizeOnDrop for SignedPreKeyStore {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_prekey_creation() {
        let pre_key = SignedPreKey::new(13).unwrap();

        assert_eq!(pre_key.id(), 13);
        assert!(!pre_key.public_key().as_bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_serialization_round_trip() {
        let original = SignedPreKey::new(21).unwrap();
        let serialized = original.to_bytes();
        assert_eq!(serialized.len(), 36);

        let restored = SignedPreKey::from(serialized);
        assert_eq!(restored.id(), original.id());
        assert_eq!(
            restored.public_key().as_bytes(),
            original.public_key().as_bytes()
        );
    }

    #[test]
    fn test_signature_verifies_against_identity() {
        let identity = IdentityKeyPair::generate().unwrap();
        let pre_key = SignedPreKey::new(13).unwrap();

        let signature = pre_key.signature(&identity);
        let encoded = pre_key.public_key().to_bytes();
        assert!(
            identity
                .signing_key_public()
                .verify_strict(&encoded, &signature)
                .is_ok()
        );
    }

    #[test]
    fn test_rotation_retains_old_keys_up_to_bound() {
        let mut store = SignedPreKeyStore::new(3).unwrap();
        let first_id = store.current().unwrap().id();

        store.rotate().unwrap();
        store.rotate().unwrap();

        // First key still present: three keys retained, bound is three.
        assert!(store.get(first_id).is_some());

        store.rotate().unwrap();
        assert!(store.get(first_id).is_none());
        assert_eq!(store.current().unwrap().id(), first_id + 3);
    }
}
