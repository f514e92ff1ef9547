use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::envelope::base64_array;
use crate::x3dh::SessionSecret;
use crate::{Error, X25519PublicKey};

/// The key-agreement header shared by both sides of a session.
///
/// Identifies the responder key material the agreement consumed and carries
/// the initiator's ephemeral key. Attached to every envelope so a recipient
/// without an established session can reconstruct the secret; a recipient
/// that already holds the session ignores it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionHeader {
    /// Fingerprint id of the responder's identity key.
    pub recipient_identity_key_id: String,
    /// Id of the responder's signed prekey used by the agreement.
    pub signed_prekey_id: u32,
    /// Id of the responder's one-time prekey consumed by the agreement,
    /// when the pool was not exhausted.
    pub one_time_prekey_id: Option<u32>,
    /// The initiator's ephemeral public key.
    #[serde(with = "base64_array")]
    pub ephemeral_public: [u8; 32],
}

/// Established state for one recipient pairing.
///
/// Created by the first successful key agreement with a recipient and
/// persisted in the session store. Invalidated only by an explicit trust
/// reset or a detected safety-number mismatch.
#[derive(Clone, Serialize, Deserialize)]
pub struct Session {
    recipient_id: String,
    #[serde(with = "base64_array")]
    recipient_identity_public: [u8; 32],
    #[serde(with = "base64_array")]
    secret: [u8; 32],
    header: SessionHeader,
    counter: u64,
    created_at_secs: u64,
}

impl Session {
    pub(crate) fn new(
        recipient_id: String,
        recipient_identity_public: X25519PublicKey,
        secret: SessionSecret,
        header: SessionHeader,
    ) -> Self {
        let created_at_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        Self {
            recipient_id,
            recipient_identity_public: recipient_identity_public.to_bytes(),
            secret: *secret.as_bytes(),
            header,
            counter: 0,
            created_at_secs,
        }
    }

    /// Identifier of the other device in this pairing.
    pub fn recipient_id(&self) -> &str {
        &self.recipient_id
    }

    /// The other device's identity public key as seen at establishment.
    ///
    /// Compared against later bundle fetches to detect identity-key
    /// substitution.
    pub fn recipient_identity_public(&self) -> X25519PublicKey {
        X25519PublicKey::from(self.recipient_identity_public)
    }

    /// The agreement header attached to outgoing envelopes.
    pub fn header(&self) -> &SessionHeader {
        &self.header
    }

    /// Messages processed under this session so far.
    pub fn counter(&self) -> u64 {
        self.counter
    }

    /// When this session was established.
    pub fn created_at(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(self.created_at_secs)
    }

    pub(crate) fn secret(&self) -> &[u8; 32] {
        &self.secret
    }

    /// Bumps the running message counter.
    pub(crate) fn advance(&mut self) {
        self.counter = self.counter.wrapping_add(1);
    }

    /// Data bound into every AEAD operation under this session, tying the
    /// ciphertext to the agreement that produced the key.
    pub(crate) fn associated_data(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(self.header.recipient_identity_key_id.len() + 32);
        data.extend_from_slice(self.header.recipient_identity_key_id.as_bytes());
        data.extend_from_slice(&self.header.ephemeral_public);
        data
    }

    /// Serializes the session for the encrypted-at-rest keystore.
    pub fn serialize(&self) -> Result<Vec<u8>, Error> {
        serde_json::to_vec(self).map_err(|err| Error::Serde(err.to_string()))
    }

    /// Restores a session previously produced by [`Session::serialize`].
    pub fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        serde_json::from_slice(bytes).map_err(|err| Error::Serde(err.to_string()))
    }
}

// Session's Debug must never print the secret.
impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("recipient_id", &self.recipient_id)
            .field("counter", &self.counter)
            .field("created_at_secs", &self.created_at_secs)
            .finish_non_exhaustive()
    }
}

impl Zeroize for Session {
    fn zeroize(&mut self) {
        self.secret.zeroize();
        self.recipient_identity_public.zeroize();
        self.recipient_id.zeroize();
        self.counter = 0;
    }
}

impl ZeroizeOnDrop for Session {}
