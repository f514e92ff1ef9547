use ed25519_dalek::ed25519::SignatureBytes;
use ed25519_dalek::{Signature, VerifyingKey};
use x25519_dalek::SharedSecret;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::{derive_key, random_seed};
use crate::keys::{IdentityKeyPair, OneTimePreKey, SignedPreKey};
use crate::{Error, X25519PublicKey, X25519Secret};

const SALT: &[u8] = b"Cachet-E2E-X3DH";

/// A session secret derived from X3DH key agreement.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionSecret(pub(crate) Box<[u8; 32]>);

impl SessionSecret {
    pub(crate) fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// The initiator's result of an X3DH key agreement.
///
/// Carries the derived secret and the ephemeral public key that must travel
/// with the first envelope so the responder can run the symmetric side. The
/// ephemeral private half is dropped (and wiped) inside [`X3dh::initiate`]
/// and is never persisted.
pub struct InitiationResult {
    shared_secret: SessionSecret,
    ephemeral_public: X25519PublicKey,
}

impl core::fmt::Debug for InitiationResult {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InitiationResult")
            .field("ephemeral_public", &self.ephemeral_public)
            .finish_non_exhaustive()
    }
}

impl InitiationResult {
    /// Returns the ephemeral public key to transmit to the responder.
    pub fn ephemeral_public(&self) -> X25519PublicKey {
        self.ephemeral_public
    }

    /// Consumes the result and returns the shared secret.
    pub fn shared_secret(self) -> SessionSecret {
        self.shared_secret
    }
}

/// One device's public key material as served by the directory for a single
/// bundle fetch.
///
/// Contains the identity key (DH and signing halves plus fingerprint id),
/// the current signed prekey with its signature, and at most one one-time
/// prekey which the directory retired when it answered the fetch.
pub struct ServerPrekeyBundle {
    pub(crate) identity_key_id: String,
    pub(crate) ik_public: X25519PublicKey,
    pub(crate) signing_key_public: VerifyingKey,
    pub(crate) spk_public: (u32, X25519PublicKey),
    pub(crate) signature: Signature,
    pub(crate) otpk_public: Option<(u32, X25519PublicKey)>,
}

impl ServerPrekeyBundle {
    /// Creates a bundle from already-parsed keys.
    pub fn new(
        identity_key_id: String,
        ik_public: X25519PublicKey,
        signing_key_public: VerifyingKey,
        signature: Signature,
        spk_public: (u32, X25519PublicKey),
        otpk_public: Option<(u32, X25519PublicKey)>,
    ) -> Self {
        Self {
            identity_key_id,
            ik_public,
            signing_key_public,
            spk_public,
            signature,
            otpk_public,
        }
    }

    /// Creates a bundle from raw byte arrays, as decoded off the wire.
    pub fn try_from_bytes(
        identity_key_id: String,
        ik_public: [u8; 32],
        signing_key_public: [u8; 32],
        signature: [u8; 64],
        spk_public: (u32, [u8; 32]),
        otpk_public: Option<(u32, [u8; 32])>,
    ) -> Result<Self, Error> {
        Ok(Self {
            identity_key_id,
            ik_public: X25519PublicKey::from(ik_public),
            signing_key_public: VerifyingKey::from_bytes(&signing_key_public)
                .map_err(|err| Error::Serde(err.to_string()))?,
            spk_public: (spk_public.0, X25519PublicKey::from(spk_public.1)),
            signature: Signature::from_bytes(&SignatureBytes::from(signature)),
            otpk_public: otpk_public.map(|(id, otpk)| (id, X25519PublicKey::from(otpk))),
        })
    }

    /// Verifies that the signed prekey was produced by the owner of the
    /// bundle's identity key.
    ///
    /// Must pass before any session secret is derived from this bundle.
    pub fn verify(&self) -> Result<(), Error> {
        let encoded_key = self.spk_public.1.to_bytes();
        self.signing_key_public
            .verify_strict(&encoded_key, &self.signature)
            .map_err(|_| Error::SignatureVerificationFailed)
    }

    /// Fingerprint id of the bundle owner's identity key.
    #[inline]
    pub fn identity_key_id(&self) -> &str {
        &self.identity_key_id
    }

    /// Public X25519 identity key of the bundle owner.
    #[inline]
    pub fn ik_public(&self) -> X25519PublicKey {
        self.ik_public
    }

    /// Public Ed25519 verification key of the bundle owner.
    #[inline]
    pub fn signing_key_public(&self) -> VerifyingKey {
        self.signing_key_public
    }

    /// Signed prekey id and public key.
    #[inline]
    pub fn spk_public(&self) -> (u32, X25519PublicKey) {
        self.spk_public
    }

    /// Signature over the signed prekey's public value.
    #[inline]
    pub fn signature(&self) -> Signature {
        self.signature
    }

    /// One-time prekey id and public key, when the pool was not exhausted.
    #[inline]
    pub fn otpk_public(&self) -> Option<(u32, X25519PublicKey)> {
        self.otpk_public
    }
}

/// X3DH (Extended Triple Diffie-Hellman) key agreement.
///
/// Combines several Diffie-Hellman exchanges so two devices can establish a
/// shared secret even though the responder is offline when the initiator
/// starts the session.
pub struct X3dh {
    info: Vec<u8>,
}

impl X3dh {
    /// Creates an X3DH instance bound to the given protocol info string.
    ///
    /// The info is fed into HKDF, so deployments with different info values
    /// derive unrelated secrets from identical key material.
    pub fn new(info: &[u8]) -> Self {
        Self {
            info: info.to_vec(),
        }
    }

    /// Initiator side of the agreement.
    ///
    /// Verifies the responder's signed prekey, generates a fresh ephemeral
    /// pair, runs the DH combinations and derives the session secret. A
    /// bundle without a one-time prekey still succeeds; the weaker forward
    /// secrecy for that session is logged for the replenishment policy.
    pub fn initiate(
        &self,
        own_identity: &IdentityKeyPair,
        their_bundle: &ServerPrekeyBundle,
    ) -> Result<InitiationResult, Error> {
        their_bundle.verify()?;

        if their_bundle.otpk_public().is_none() {
            tracing::warn!(
                recipient = their_bundle.identity_key_id(),
                "Prekey bundle carried no one-time prekey; proceeding without it"
            );
        }

        let ephemeral = X25519Secret::from(random_seed()?);
        let ephemeral_public = ephemeral.public_key();

        // DH1 = DH(IKa, SPKb)
        let dh1 = own_identity.dh(&their_bundle.spk_public().1);
        // DH2 = DH(EKa, IKb)
        let dh2 = ephemeral.dh(&their_bundle.ik_public());
        // DH3 = DH(EKa, SPKb)
        let dh3 = ephemeral.dh(&their_bundle.spk_public().1);
        // DH4 = DH(EKa, OPKb)
        let dh4 = their_bundle
            .otpk_public()
            .map(|(_, otpk)| ephemeral.dh(&otpk));

        let shared_secret = self.derive_secret(dh1, dh2, dh3, dh4)?;

        Ok(InitiationResult {
            shared_secret,
            ephemeral_public,
        })
    }

    /// Responder side of the agreement.
    ///
    /// Runs the same DH combinations from the responder's private material
    /// and the initiator's transmitted keys, deriving the identical secret.
    /// The one-time prekey, when present, is consumed by this call.
    pub fn respond(
        &self,
        own_identity: &IdentityKeyPair,
        signed_prekey: &SignedPreKey,
        one_time_prekey: Option<OneTimePreKey>,
        their_identity_public: &X25519PublicKey,
        their_ephemeral_public: &X25519PublicKey,
    ) -> Result<SessionSecret, Error> {
        // DH1 = DH(SPKb, IKa)
        let dh1 = signed_prekey.dh(their_identity_public);
        // DH2 = DH(IKb, EKa)
        let dh2 = own_identity.dh(their_ephemeral_public);
        // DH3 = DH(SPKb, EKa)
        let dh3 = signed_prekey.dh(their_ephemeral_public);
        // DH4 = DH(OPKb, EKa)
        let dh4 = match one_time_prekey {
            Some(otpk) => Some(otpk.dh(their_ephemeral_public)?),
            None => None,
        };

        self.derive_secret(dh1, dh2, dh3, dh4)
    }

    /// Concatenates the DH outputs in the fixed order
    /// DH1 || DH2 || DH3 || DH4 and runs HKDF-SHA256 over them.
    fn derive_secret(
        &self,
        dh1: SharedSecret,
        dh2: SharedSecret,
        dh3: SharedSecret,
        dh4: Option<SharedSecret>,
    ) -> Result<SessionSecret, Error> {
        let mut key_material = Box::new([0u8; 128]);

        key_material[0..32].copy_from_slice(dh1.as_bytes());
        key_material[32..64].copy_from_slice(dh2.as_bytes());
        key_material[64..96].copy_from_slice(dh3.as_bytes());
        if let Some(dh4) = dh4 {
            key_material[96..128].copy_from_slice(dh4.as_bytes());
        }

        let secret = derive_key(key_material.as_mut_slice(), SALT, &self.info)?;

        Ok(SessionSecret(secret))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn responder_material() -> (IdentityKeyPair, SignedPreKey, OneTimePreKey) {
        (
            IdentityKeyPair::generate().unwrap(),
            SignedPreKey::new(1).unwrap(),
            OneTimePreKey::new(1).unwrap(),
        )
    }

    fn bundle_for(
        identity: &IdentityKeyPair,
        spk: &SignedPreKey,
        otpk: Option<&OneTimePreKey>,
    ) -> ServerPrekeyBundle {
        ServerPrekeyBundle::new(
            identity.key_id(),
            identity.dh_key_public(),
            identity.signing_key_public(),
            spk.signature(identity),
            (spk.id(), spk.public_key()),
            otpk.map(|key| (key.id(), key.public_key())),
        )
    }

    #[test]
    fn test_both_sides_derive_the_same_secret() {
        let alice_identity = IdentityKeyPair::generate().unwrap();
        let (bob_identity, bob_spk, bob_otpk) = responder_material();
        let bundle = bundle_for(&bob_identity, &bob_spk, Some(&bob_otpk));

        let x3dh = X3dh::new(b"Test-Protocol-Info");
        let alice_result = x3dh.initiate(&alice_identity, &bundle).unwrap();

        let bob_secret = x3dh
            .respond(
                &bob_identity,
                &bob_spk,
                Some(bob_otpk),
                &alice_identity.dh_key_public(),
                &alice_result.ephemeral_public(),
            )
            .unwrap();

        assert_eq!(alice_result.shared_secret.0, bob_secret.0);
    }

    #[test]
    fn test_agreement_without_one_time_prekey() {
        let alice_identity = IdentityKeyPair::generate().unwrap();
        let (bob_identity, bob_spk, _) = responder_material();
        let bundle = bundle_for(&bob_identity, &bob_spk, None);

        let x3dh = X3dh::new(b"Test-Protocol-Info");
        let alice_result = x3dh.initiate(&alice_identity, &bundle).unwrap();

        let bob_secret = x3dh
            .respond(
                &bob_identity,
                &bob_spk,
                None,
                &alice_identity.dh_key_public(),
                &alice_result.ephemeral_public(),
            )
            .unwrap();

        assert_eq!(alice_result.shared_secret.0, bob_secret.0);
    }

    #[test]
    fn test_forged_bundle_is_rejected_before_derivation() {
        let alice_identity = IdentityKeyPair::generate().unwrap();
        let (bob_identity, bob_spk, _) = responder_material();

        // Signature from a different identity than the bundle claims.
        let impostor = IdentityKeyPair::generate().unwrap();
        let forged = ServerPrekeyBundle::new(
            bob_identity.key_id(),
            bob_identity.dh_key_public(),
            bob_identity.signing_key_public(),
            bob_spk.signature(&impostor),
            (bob_spk.id(), bob_spk.public_key()),
            None,
        );

        let x3dh = X3dh::new(b"Test-Protocol-Info");
        assert_eq!(
            x3dh.initiate(&alice_identity, &forged).unwrap_err(),
            Error::SignatureVerificationFailed
        );
    }

    #[test]
    fn test_different_info_strings_derive_different_secrets() {
        let alice_identity = IdentityKeyPair::generate().unwrap();
        let (bob_identity, bob_spk, bob_otpk) = responder_material();
        let bundle = bundle_for(&bob_identity, &bob_spk, Some(&bob_otpk));

        let result_1 = X3dh::new(b"Protocol-Info-1")
            .initiate(&alice_identity, &bundle)
            .unwrap();
        let result_2 = X3dh::new(b"Protocol-Info-2")
            .initiate(&alice_identity, &bundle)
            .unwrap();

        assert_ne!(result_1.shared_secret.0, result_2.shared_secret.0);
    }

    #[test]
    fn test_bundle_round_trip_through_raw_bytes() {
        let (bob_identity, bob_spk, bob_otpk) = responder_material();
        let bundle = bundle_for(&bob_identity, &bob_spk, Some(&bob_otpk));

        let reparsed = ServerPrekeyBundle::try_from_bytes(
            bundle.identity_key_id().to_string(),
            bundle.ik_public().to_bytes(),
            bundle.signing_key_public().to_bytes(),
            bundle.signature().to_bytes(),
            (bundle.spk_public().0, bundle.spk_public().1.to_bytes()),
            bundle.otpk_public().map(|(id, key)| (id, key.to_bytes())),
        )
        .unwrap();

        assert!(reparsed.verify().is_ok());
        assert_eq!(reparsed.identity_key_id(), bundle.identity_key_id());
    }
}
