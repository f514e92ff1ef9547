use std::collections::HashMap;
use std::time::SystemTime;

use ed25519_dalek::Signature;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::directory::{KeyBundleDirectory, OneTimePreKeyPublic, PublishedBundle, SignedPreKeyPublic};
use crate::keys::{IdentityKeyPair, OneTimePreKeyStore, SignedPreKeyStore};
use crate::x3dh::{SessionSecret, X3dh};
use crate::{Error, ProtocolConfig, X25519PublicKey};

/// One device's key material: identity key, signed prekey pool, one-time
/// prekey pool, and the lifecycle policy that governs them.
///
/// Created once per device; an explicit key reset means constructing a new
/// `Device` and republishing. Private halves stay inside this type and its
/// keystore serialization paths.
pub struct Device {
    identity: IdentityKeyPair,
    spk_store: SignedPreKeyStore,
    spk_last_rotation: SystemTime,
    otpk_store: OneTimePreKeyStore,
    config: ProtocolConfig,
}

impl Device {
    /// Generates a fresh device: identity key, initial signed prekey, and a
    /// full batch of one-time prekeys.
    ///
    /// Any random-source failure aborts the whole construction; no partial
    /// device is returned.
    pub fn new(config: Option<ProtocolConfig>) -> Result<Self, Error> {
        let config = config.unwrap_or_default();

        let identity = IdentityKeyPair::generate()?;
        let spk_store = SignedPreKeyStore::new(config.max_signed_prekeys)?;

        let mut otpk_store = OneTimePreKeyStore::new();
        otpk_store.generate_keys(config.one_time_prekey_batch)?;

        Ok(Self {
            identity,
            spk_store,
            spk_last_rotation: SystemTime::now(),
            otpk_store,
            config,
        })
    }

    /// Returns the lifecycle policy for this device.
    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    /// Returns this device's identity key pair.
    pub fn identity(&self) -> &IdentityKeyPair {
        &self.identity
    }

    /// Fingerprint id of this device's identity key. Also serves as the
    /// device id under which bundles are published.
    pub fn identity_key_id(&self) -> String {
        self.identity.key_id()
    }

    /// Number of one-time prekeys still held locally.
    pub fn one_time_prekey_count(&self) -> usize {
        self.otpk_store.count()
    }

    /// Assembles the public portions of this device's keys for upload.
    pub fn published_bundle(&self) -> Result<PublishedBundle, Error> {
        let spk = self.spk_store.current()?;

        let mut one_time_prekeys: Vec<OneTimePreKeyPublic> = self
            .otpk_store
            .public_keys()
            .into_iter()
            .map(|(id, key)| OneTimePreKeyPublic {
                id,
                public_key: key.to_bytes(),
            })
            .collect();
        one_time_prekeys.sort_by_key(|key| key.id);

        Ok(PublishedBundle {
            identity_key_id: self.identity.key_id(),
            identity_dh_public: self.identity.dh_key_public().to_bytes(),
            identity_signing_public: self.identity.signing_key_public().to_bytes(),
            signed_prekey: SignedPreKeyPublic {
                id: spk.id(),
                public_key: spk.public_key().to_bytes(),
                signature: spk.signature(&self.identity).to_bytes(),
            },
            one_time_prekeys,
        })
    }

    /// Uploads the public bundle to the directory.
    ///
    /// A failed publish leaves every private key in place; the caller
    /// retries with backoff and the next attempt re-sends the same keys.
    pub fn publish(&self, directory: &dyn KeyBundleDirectory) -> Result<(), Error> {
        let bundle = self.published_bundle()?;
        directory.publish_bundle(&bundle.identity_key_id, &bundle)
    }

    /// Rotates the signed prekey when the configured interval has elapsed.
    ///
    /// Returns the new key's id, public half and signature for publication,
    /// or `None` when rotation is not yet due. Old signed prekeys stay in
    /// the store (up to the retention bound) so envelopes produced against
    /// a stale bundle keep decrypting.
    pub fn rotate_signed_prekey_if_due(
        &mut self,
    ) -> Result<Option<(u32, X25519PublicKey, Signature)>, Error> {
        let now = SystemTime::now();
        let elapsed = now
            .duration_since(self.spk_last_rotation)
            .unwrap_or_default();

        if elapsed < self.config.signed_prekey_rotation_interval {
            return Ok(None);
        }

        let spk = self.spk_store.rotate()?;
        self.spk_last_rotation = now;
        tracing::debug!(spk_id = spk.id(), "Rotated signed prekey");

        Ok(Some((
            spk.id(),
            spk.public_key(),
            spk.signature(&self.identity),
        )))
    }

    /// Generates a fresh one-time prekey batch when the directory-reported
    /// remaining count has dropped below `threshold`.
    ///
    /// Returns the new public keys for publication, or `None` when the pool
    /// is still healthy.
    pub fn replenish_if_low(
        &mut self,
        remaining_count: usize,
        threshold: usize,
    ) -> Result<Option<HashMap<u32, X25519PublicKey>>, Error> {
        if remaining_count >= threshold {
            return Ok(None);
        }

        let batch = self.otpk_store.generate_keys(self.config.one_time_prekey_batch)?;
        tracing::debug!(
            remaining_count,
            generated = batch.len(),
            "Replenished one-time prekey pool"
        );

        Ok(Some(batch))
    }

    /// Responder side of session establishment: reconstructs the session
    /// secret from an envelope's key ids and this device's private material.
    ///
    /// The named one-time prekey is used but not yet removed; the caller
    /// calls [`Device::discard_one_time_prekey`] once the first payload
    /// authenticates, so a corrupted envelope cannot burn a prekey and
    /// block redelivery of the genuine one.
    pub(crate) fn respond(
        &self,
        x3dh: &X3dh,
        signed_prekey_id: u32,
        one_time_prekey_id: Option<u32>,
        their_identity_public: &X25519PublicKey,
        their_ephemeral_public: &X25519PublicKey,
    ) -> Result<SessionSecret, Error> {
        let spk = self.spk_store.get(signed_prekey_id).ok_or_else(|| {
            Error::PreKey(format!("Unknown signed prekey id {signed_prekey_id}"))
        })?;

        let otpk = match one_time_prekey_id {
            Some(id) => Some(self.otpk_store.get(id).cloned().ok_or_else(|| {
                Error::PreKey(format!("One-time prekey {id} not found or already consumed"))
            })?),
            None => None,
        };

        x3dh.respond(
            &self.identity,
            spk,
            otpk,
            their_identity_public,
            their_ephemeral_public,
        )
    }

    /// Permanently removes a consumed one-time prekey.
    ///
    /// Called after the session established with it has authenticated its
    /// first payload; the key is wiped and never usable again.
    pub(crate) fn discard_one_time_prekey(&mut self, id: u32) {
        if self.otpk_store.take(id).is_some() {
            tracing::debug!(otpk_id = id, "Discarded consumed one-time prekey");
        }
    }

}

impl Zeroize for Device {
    fn zeroize(&mut self) {
        self.identity.zeroize();
        self.spk_store.zeroize();
        self.otpk_store.zeroize();
    }
}

impl ZeroizeOnDrop for Device {}
