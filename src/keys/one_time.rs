use std::collections::HashMap;

use x25519_dalek::SharedSecret;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::random_seed;
use crate::{Error, X25519PublicKey, X25519Secret};

/// A single-use key-agreement key.
///
/// Each one-time prekey adds forward secrecy to the first message of the
/// session that consumes it. A key is handed out by the directory at most
/// once and refuses local reuse after it has been marked used.
#[derive(Clone)]
pub struct OneTimePreKey {
    pre_key: X25519Secret,
    id: u32,
    used: bool,
}

impl OneTimePreKey {
    /// Creates a new one-time prekey with the given id.
    pub fn new(id: u32) -> Result<Self, Error> {
        Ok(Self {
            pre_key: X25519Secret::from(random_seed()?),
            id,
            used: false,
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

    /// Checks whether this prekey has been consumed.
    pub fn is_used(&self) -> bool {
        self.used
    }

    /// Marks this prekey as consumed, preventing future use.
    pub fn mark_as_used(&mut self) {
        self.used = true;
    }

    /// Performs Diffie-Hellman with the provided public key, consuming the
    /// prekey. Fails if the key was already used.
    pub(crate) fn dh(self, public_key: &X25519PublicKey) -> Result<SharedSecret, Error> {
        if self.used {
            return Err(Error::PreKey("One-time prekey already used".to_string()));
        }

        Ok(self.pre_key.dh(public_key))
    }

    /// Serializes to 37 bytes: 4-byte big-endian id, used flag, 32-byte
    /// private key.
    pub fn to_bytes(&self) -> [u8; 37] {
        let mut result = [0u8; 37];

        result[0..4].copy_from_slice(&self.id.to_be_bytes());
        result[4] = u8::from(self.used);
        result[5..].copy_from_slice(self.pre_key.as_bytes());

        result
    }
}

impl From<[u8; 37]> for OneTimePreKey {
    fn from(bytes: [u8; 37]) -> Self {
        let mut id_bytes = [0u8; 4];
        id_bytes.copy_from_slice(&bytes[0..4]);
        let id = u32::from_be_bytes(id_bytes);
        let used = bytes[4] != 0;

        let mut key_bytes = Box::new([0u8; 32]);
        key_bytes.copy_from_slice(&bytes[5..]);

        Self {
            pre_key: X25519Secret::from(key_bytes),
            id,
            used,
        }
    }
}

impl Zeroize for OneTimePreKey {
    fn zeroize(&mut self) {
        self.pre_key.zeroize();
        self.id = 0;
        self.used = false;
    }
}

impl ZeroizeOnDrop for OneTimePreKey {}

/// Pool of one-time prekeys with monotonically increasing ids.
pub(crate) struct OneTimePreKeyStore {
    keys: HashMap<u32, OneTimePreKey>,
    next_id: u32,
}

impl OneTimePreKeyStore {
    pub(crate) fn new() -> Self {
        Self {
            keys: HashMap::new(),
            next_id: 1,
        }
    }

    /// Generates `count` new prekeys and returns their public halves for
    /// publication.
    pub(crate) fn generate_keys(
        &mut self,
        count: usize,
    ) -> Result<HashMap<u32, X25519PublicKey>, Error> {
        let mut published = HashMap::with_capacity(count);
        for _ in 0..count {
            let id = self.next_id;
            let key = OneTimePreKey::new(id)?;
            published.insert(id, key.public_key());
            self.next_id = self.next_id.wrapping_add(1);
            self.keys.insert(id, key);
        }

        Ok(published)
    }

    /// Returns all unconsumed prekey ids mapped to their public keys.
    pub(crate) fn public_keys(&self) -> HashMap<u32, X25519PublicKey> {
        self.keys
            .iter()
            .filter(|(_, key)| !key.is_used())
            .map(|(id, key)| (*id, key.public_key()))
            .collect()
    }

    /// Looks up a prekey by id without removing it.
    pub(crate) fn get(&self, id: u32) -> Option<&OneTimePreKey> {
        self.keys.get(&id)
    }

    /// Removes and returns a prekey by id. The key never goes back in.
    pub(crate) fn take(&mut self, id: u32) -> Option<OneTimePreKey> {
        self.keys.remove(&id)
    }

    /// Returns the number of prekeys still held locally.
    pub(crate) fn count(&self) -> usize {
        self.keys.len()
    }
}

impl Zeroize for OneTimePreKeyStore {
    fn zeroize(&mut self) {
        for (_, key) in self.keys.iter_mut() {
            key.zeroize();
        }
        self.keys.clear();
        self.next_id = 0;
    }
}

impl ZeroizeOnDrop for OneTimePreKeyStore {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_time_prekey_creation() {
        let pre_key = OneTimePreKey::new(13).unwrap();

        assert_eq!(pre_key.id(), 13);
        assert!(!pre_key.is_used());
        assert!(!pre_key.public_key().as_bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_serialization_round_trip() {
        let original = OneTimePreKey::new(123).unwrap();
        let serialized = original.to_bytes();
        assert_eq!(serialized.len(), 37);

        let restored = OneTimePreKey::from(serialized);
        assert_eq!(restored.id(), original.id());
        assert_eq!(restored.is_used(), original.is_used());
        assert_eq!(
            restored.public_key().as_bytes(),
            original.public_key().as_bytes()
        );
    }

    #[test]
    fn test_used_prekey_refuses_dh() {
        let mut key = OneTimePreKey::new(1).unwrap();
        let other_public = OneTimePreKey::new(2).unwrap().public_key();

        key.mark_as_used();
        assert!(key.dh(&other_public).is_err());
    }

    #[test]
    fn test_store_take_is_single_use() {
        let mut store = OneTimePreKeyStore::new();
        let published = store.generate_keys(5).unwrap();
        assert_eq!(published.len(), 5);
        assert_eq!(store.count(), 5);

        let id = *published.keys().next().unwrap();
        assert!(store.take(id).is_some());
        assert!(store.take(id).is_none());
        assert_eq!(store.count(), 4);
    }

    #[test]
    fn test_store_ids_are_monotonic() {
        let mut store = OneTimePreKeyStore::new();
        store.generate_keys(3).unwrap();
        let second = store.generate_keys(3).unwrap();

        assert!(second.keys().all(|id| *id > 3));
    }
}
