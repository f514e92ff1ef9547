use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::envelope::base64_array;
use crate::x3dh::ServerPrekeyBundle;
use crate::Error;

/// Public half of a signed prekey as published to the directory.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignedPreKeyPublic {
    /// Prekey id.
    pub id: u32,
    /// X25519 public key.
    #[serde(with = "base64_array")]
    pub public_key: [u8; 32],
    /// Ed25519 signature over `public_key` by the identity key.
    #[serde(with = "base64_array")]
    pub signature: [u8; 64],
}

/// Public half of a one-time prekey as published to the directory.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OneTimePreKeyPublic {
    /// Prekey id.
    pub id: u32,
    /// X25519 public key.
    #[serde(with = "base64_array")]
    pub public_key: [u8; 32],
}

/// The public portions of one device's key bundle, as uploaded with
/// `PUT /keys/{device_id}`.
///
/// Contains no private material; the private halves never leave the device.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PublishedBundle {
    /// Fingerprint id of the identity key.
    pub identity_key_id: String,
    /// X25519 identity public key.
    #[serde(with = "base64_array")]
    pub identity_dh_public: [u8; 32],
    /// Ed25519 identity verification key.
    #[serde(with = "base64_array")]
    pub identity_signing_public: [u8; 32],
    /// Current signed prekey.
    pub signed_prekey: SignedPreKeyPublic,
    /// All unconsumed one-time prekeys.
    pub one_time_prekeys: Vec<OneTimePreKeyPublic>,
}

/// Server-side store of published key bundles.
///
/// Trusted only for relay of public material. The one non-negotiable
/// invariant lives here: a one-time prekey id is handed out by at most one
/// [`fetch_bundle`](KeyBundleDirectory::fetch_bundle) response, retired
/// atomically with that response.
///
/// The trait is synchronous; a remote implementation maps the three
/// `/keys/{device_id}` endpoints and owns its transport's timeout and
/// cancellation behavior. Transport failures surface as
/// [`Error::DirectoryUnavailable`], which callers retry with backoff.
pub trait KeyBundleDirectory: Send + Sync {
    /// Idempotent upsert of a device's published bundle.
    fn publish_bundle(&self, device_id: &str, bundle: &PublishedBundle) -> Result<(), Error>;

    /// Returns a fresh prekey bundle for `device_id`, consuming at most one
    /// one-time prekey. The one-time prekey field is omitted when the pool
    /// is exhausted; the fetch still succeeds.
    fn fetch_bundle(&self, device_id: &str) -> Result<ServerPrekeyBundle, Error>;

    /// Remaining unconsumed one-time prekeys for `device_id`. Drives the
    /// client's replenishment policy.
    fn prekey_count(&self, device_id: &str) -> Result<usize, Error>;
}

struct DirectoryEntry {
    bundle: PublishedBundle,
    consumed: HashSet<u32>,
}

/// In-process directory implementation.
///
/// Backs tests and single-process deployments. All mutation happens under
/// one mutex, which makes the hand-out-and-retire step atomic.
#[derive(Clone, Default)]
pub struct MemoryDirectory {
    inner: Arc<Mutex<HashMap<String, DirectoryEntry>>>,
}

impl MemoryDirectory {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyBundleDirectory for MemoryDirectory {
    fn publish_bundle(&self, device_id: &str, bundle: &PublishedBundle) -> Result<(), Error> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| Error::DirectoryUnavailable("Directory lock poisoned".to_string()))?;

        let consumed = inner
            .remove(device_id)
            .map(|entry| entry.consumed)
            .unwrap_or_default();

        // Re-uploading an already-consumed id must not resurrect it.
        let mut bundle = bundle.clone();
        bundle
            .one_time_prekeys
            .retain(|key| !consumed.contains(&key.id));

        inner.insert(device_id.to_string(), DirectoryEntry { bundle, consumed });
        Ok(())
    }

    fn fetch_bundle(&self, device_id: &str) -> Result<ServerPrekeyBundle, Error> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| Error::DirectoryUnavailable("Directory lock poisoned".to_string()))?;

        let entry = inner.get_mut(device_id).ok_or_else(|| {
            Error::DirectoryUnavailable(format!("No bundle published for {device_id}"))
        })?;

        // Lowest id first, so hand-out order is deterministic.
        let next = entry
            .bundle
            .one_time_prekeys
            .iter()
            .min_by_key(|key| key.id)
            .map(|key| (key.id, key.public_key));

        let one_time = if let Some((id, public_key)) = next {
            entry.bundle.one_time_prekeys.retain(|key| key.id != id);
            entry.consumed.insert(id);
            Some((id, public_key))
        } else {
            tracing::warn!(device_id, "One-time prekey pool exhausted for bundle fetch");
            None
        };

        ServerPrekeyBundle::try_from_bytes(
            entry.bundle.identity_key_id.clone(),
            entry.bundle.identity_dh_public,
            entry.bundle.identity_signing_public,
            entry.bundle.signed_prekey.signature,
            (
                entry.bundle.signed_prekey.id,
                entry.bundle.signed_prekey.public_key,
            ),
            one_time,
        )
    }

    fn prekey_count(&self, device_id: &str) -> Result<usize, Error> {
        let inner = self
            .inner
            .lock()
            .map_err(|_| Error::DirectoryUnavailable("Directory lock poisoned".to_string()))?;

        let entry = inner.get(device_id).ok_or_else(|| {
            Error::DirectoryUnavailable(format!("No bundle published for {device_id}"))
        })?;

        Ok(entry.bundle.one_time_prekeys.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Device, ProtocolConfig};

    fn small_device() -> Device {
        Device::new(Some(ProtocolConfig {
            one_time_prekey_batch: 3,
            ..ProtocolConfig::default()
        }))
        .unwrap()
    }

    #[test]
    fn test_fetch_consumes_each_one_time_prekey_once() {
        let directory = MemoryDirectory::new();
        let device = small_device();
        let device_id = device.identity_key_id();

        device.publish(&directory).unwrap();
        assert_eq!(directory.prekey_count(&device_id).unwrap(), 3);

        let mut seen = HashSet::new();
        for _ in 0..3 {
            let bundle = directory.fetch_bundle(&device_id).unwrap();
            let (id, _) = bundle.otpk_public().unwrap();
            assert!(seen.insert(id), "one-time prekey id handed out twice");
        }

        assert_eq!(directory.prekey_count(&device_id).unwrap(), 0);
    }

    #[test]
    fn test_exhausted_pool_omits_one_time_prekey() {
        let directory = MemoryDirectory::new();
        let device = small_device();
        let device_id = device.identity_key_id();

        device.publish(&directory).unwrap();
        for _ in 0..3 {
            directory.fetch_bundle(&device_id).unwrap();
        }

        let bundle = directory.fetch_bundle(&device_id).unwrap();
        assert!(bundle.otpk_public().is_none());
        assert!(bundle.verify().is_ok());
    }

    #[test]
    fn test_republish_does_not_resurrect_consumed_ids() {
        let directory = MemoryDirectory::new();
        let device = small_device();
        let device_id = device.identity_key_id();

        device.publish(&directory).unwrap();
        let consumed_id = directory
            .fetch_bundle(&device_id)
            .unwrap()
            .otpk_public()
            .unwrap()
            .0;

        // The device republishes its full local pool, consumed id included.
        device.publish(&directory).unwrap();
        assert_eq!(directory.prekey_count(&device_id).unwrap(), 2);

        for _ in 0..2 {
            let bundle = directory.fetch_bundle(&device_id).unwrap();
            assert_ne!(bundle.otpk_public().unwrap().0, consumed_id);
        }
    }

    #[test]
    fn test_unknown_device_is_a_directory_error() {
        let directory = MemoryDirectory::new();
        assert!(matches!(
            directory.fetch_bundle("nobody"),
            Err(Error::DirectoryUnavailable(_))
        ));
        assert!(matches!(
            directory.prekey_count("nobody"),
            Err(Error::DirectoryUnavailable(_))
        ));
    }
}
