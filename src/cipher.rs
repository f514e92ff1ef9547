use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::crypto::{NONCE_LEN, aead_decrypt, aead_encrypt, random_bytes};
use crate::directory::KeyBundleDirectory;
use crate::session::{Session, SessionHeader};
use crate::store::SessionStore;
use crate::x3dh::X3dh;
use crate::{Device, Envelope, Error, ProtocolConfig, X25519PublicKey};

/// Encrypts and decrypts message payloads, establishing sessions on demand.
///
/// Holds the session store and a lock table keyed by recipient id. The lock
/// guarantees at most one session per recipient: two callers racing to
/// message a recipient with no session serialize on the lock, the first
/// establishes and persists the session, the second finds and reuses it.
pub struct MessageCipher<S: SessionStore> {
    sessions: S,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    x3dh: X3dh,
}

impl<S: SessionStore> MessageCipher<S> {
    /// Creates a cipher over the given session store.
    pub fn new(sessions: S, config: &ProtocolConfig) -> Self {
        Self {
            sessions,
            locks: Mutex::new(HashMap::new()),
            x3dh: X3dh::new(&config.protocol_info),
        }
    }

    /// Returns the underlying session store.
    pub fn sessions(&self) -> &S {
        &self.sessions
    }

    /// Resets trust for `recipient_id` by discarding its session. The next
    /// message re-runs key agreement against a fresh bundle fetch.
    pub fn invalidate_session(&self, recipient_id: &str) -> Result<(), Error> {
        self.sessions.delete(recipient_id)
    }

    /// Encrypts `plaintext` for `recipient_id`.
    ///
    /// Reuses the persisted session when one exists; otherwise fetches the
    /// recipient's bundle from the directory, runs key agreement, and
    /// persists exactly one new session before encrypting. An abandoned
    /// establishment (directory failure, verification failure) writes
    /// nothing.
    pub fn encrypt_for_recipient(
        &self,
        device: &Device,
        directory: &dyn KeyBundleDirectory,
        recipient_id: &str,
        plaintext: &[u8],
    ) -> Result<Envelope, Error> {
        let lock = self.recipient_lock(recipient_id)?;
        let _guard = lock
            .lock()
            .map_err(|_| Error::Store("Recipient lock poisoned".to_string()))?;

        let mut session = match self.sessions.load(recipient_id)? {
            Some(session) => session,
            None => self.establish_outbound(device, directory, recipient_id)?,
        };

        let nonce: [u8; NONCE_LEN] = random_bytes()?;
        let ciphertext = aead_encrypt(
            session.secret(),
            &nonce,
            plaintext,
            &session.associated_data(),
        )?;

        session.advance();
        self.sessions.save(&session)?;

        let header = session.header();
        Ok(Envelope::new(
            ciphertext,
            X25519PublicKey::from(header.ephemeral_public),
            header.recipient_identity_key_id.clone(),
            header.signed_prekey_id,
            header.one_time_prekey_id,
            nonce,
        ))
    }

    /// Decrypts an envelope received from `sender_id`.
    ///
    /// Uses the persisted session when one exists. Otherwise the envelope's
    /// key ids select this device's private material and the session is
    /// reconstructed; the named one-time prekey is discarded and the
    /// session persisted only after the payload authenticates. Failure is
    /// final for this envelope; no alternate keys are tried.
    pub fn decrypt(
        &self,
        device: &mut Device,
        sender_id: &str,
        sender_identity_public: &X25519PublicKey,
        envelope: &Envelope,
    ) -> Result<Vec<u8>, Error> {
        let lock = self.recipient_lock(sender_id)?;
        let _guard = lock
            .lock()
            .map_err(|_| Error::Store("Recipient lock poisoned".to_string()))?;

        if let Some(mut session) = self.sessions.load(sender_id)? {
            let plaintext = aead_decrypt(
                session.secret(),
                envelope.nonce(),
                envelope.ciphertext(),
                &session.associated_data(),
            )
            .inspect_err(|_| {
                tracing::warn!(sender_id, "Envelope failed authentication under existing session");
            })?;

            session.advance();
            self.sessions.save(&session)?;
            return Ok(plaintext);
        }

        if envelope.recipient_identity_key_id() != device.identity_key_id() {
            return Err(Error::PreKey(
                "Envelope addressed to a different identity key".to_string(),
            ));
        }

        let secret = device.respond(
            &self.x3dh,
            envelope.signed_prekey_id(),
            envelope.one_time_prekey_id(),
            sender_identity_public,
            &envelope.ephemeral_public_key(),
        )?;

        let mut session = Session::new(
            sender_id.to_string(),
            *sender_identity_public,
            secret,
            SessionHeader {
                recipient_identity_key_id: envelope.recipient_identity_key_id().to_string(),
                signed_prekey_id: envelope.signed_prekey_id(),
                one_time_prekey_id: envelope.one_time_prekey_id(),
                ephemeral_public: envelope.ephemeral_public_key().to_bytes(),
            },
        );

        let plaintext = aead_decrypt(
            session.secret(),
            envelope.nonce(),
            envelope.ciphertext(),
            &session.associated_data(),
        )
        .inspect_err(|_| {
            tracing::warn!(sender_id, "First envelope from sender failed authentication");
        })?;

        // The agreement is proven good; only now is the one-time prekey
        // gone for real and the session persisted.
        if let Some(id) = envelope.one_time_prekey_id() {
            device.discard_one_time_prekey(id);
        }
        session.advance();
        self.sessions.save(&session)?;
        tracing::debug!(sender_id, "Established inbound session");

        Ok(plaintext)
    }

    fn establish_outbound(
        &self,
        device: &Device,
        directory: &dyn KeyBundleDirectory,
        recipient_id: &str,
    ) -> Result<Session, Error> {
        let bundle = directory.fetch_bundle(recipient_id)?;
        let result = self.x3dh.initiate(device.identity(), &bundle)?;

        let header = SessionHeader {
            recipient_identity_key_id: bundle.identity_key_id().to_string(),
            signed_prekey_id: bundle.spk_public().0,
            one_time_prekey_id: bundle.otpk_public().map(|(id, _)| id),
            ephemeral_public: result.ephemeral_public().to_bytes(),
        };

        let recipient_identity_public = bundle.ik_public();
        let session = Session::new(
            recipient_id.to_string(),
            recipient_identity_public,
            result.shared_secret(),
            header,
        );
        tracing::debug!(recipient_id, "Established outbound session");

        Ok(session)
    }

    fn recipient_lock(&self, recipient_id: &str) -> Result<Arc<Mutex<()>>, Error> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| Error::Store("Lock table poisoned".to_string()))?;

        Ok(locks
            .entry(recipient_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone())
    }
}
