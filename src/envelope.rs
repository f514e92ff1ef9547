use serde::{Deserialize, Serialize};

use crate::crypto::NONCE_LEN;
use crate::{Error, X25519PublicKey};

/// Base64 encoding for byte vectors in the wire format.
pub(crate) mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(&encoded).map_err(serde::de::Error::custom)
    }
}

/// Base64 encoding for fixed-width byte arrays in the wire format.
pub(crate) mod base64_array {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer, const N: usize>(
        bytes: &[u8; N],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(
        deserializer: D,
    ) -> Result<[u8; N], D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let decoded = STANDARD.decode(&encoded).map_err(serde::de::Error::custom)?;
        <[u8; N]>::try_from(decoded.as_slice()).map_err(|_| {
            serde::de::Error::custom(format!("expected {N} bytes, got {}", decoded.len()))
        })
    }
}

/// One encrypted message as relayed by the server.
///
/// Opaque to the relay. Carries the ciphertext plus everything the
/// recipient needs to locate or reconstruct its side of the session: the
/// sender's ephemeral key, the ids of the recipient key material consumed
/// by the agreement, and the AEAD nonce. Immutable once produced.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(with = "base64_bytes")]
    ciphertext: Vec<u8>,
    #[serde(with = "base64_array")]
    ephemeral_public_key: [u8; 32],
    recipient_identity_key_id: String,
    signed_prekey_id: u32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    one_time_prekey_id: Option<u32>,
    #[serde(with = "base64_array")]
    nonce: [u8; NONCE_LEN],
}

impl Envelope {
    pub(crate) fn new(
        ciphertext: Vec<u8>,
        ephemeral_public_key: X25519PublicKey,
        recipient_identity_key_id: String,
        signed_prekey_id: u32,
        one_time_prekey_id: Option<u32>,
        nonce: [u8; NONCE_LEN],
    ) -> Self {
        Self {
            ciphertext,
            ephemeral_public_key: ephemeral_public_key.to_bytes(),
            recipient_identity_key_id,
            signed_prekey_id,
            one_time_prekey_id,
            nonce,
        }
    }

    /// The encrypted payload.
    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    /// Sender's ephemeral public key from the key agreement.
    pub fn ephemeral_public_key(&self) -> X25519PublicKey {
        X25519PublicKey::from(self.ephemeral_public_key)
    }

    /// Fingerprint id of the recipient identity key this envelope targets.
    pub fn recipient_identity_key_id(&self) -> &str {
        &self.recipient_identity_key_id
    }

    /// Id of the recipient signed prekey used by the agreement.
    pub fn signed_prekey_id(&self) -> u32 {
        self.signed_prekey_id
    }

    /// Id of the one-time prekey consumed by the agreement, if one was
    /// available.
    pub fn one_time_prekey_id(&self) -> Option<u32> {
        self.one_time_prekey_id
    }

    /// AEAD nonce for this message.
    pub fn nonce(&self) -> &[u8; NONCE_LEN] {
        &self.nonce
    }

    /// Encodes the envelope to its JSON wire form.
    pub fn to_wire(&self) -> Result<Vec<u8>, Error> {
        serde_json::to_vec(self).map_err(|err| Error::Serde(err.to_string()))
    }

    /// Decodes an envelope from its JSON wire form.
    pub fn from_wire(bytes: &[u8]) -> Result<Self, Error> {
        serde_json::from_slice(bytes).map_err(|err| Error::Serde(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Envelope {
        Envelope::new(
            vec![1, 2, 3, 4],
            X25519PublicKey::from([9u8; 32]),
            "identity-id".to_string(),
            7,
            Some(42),
            [5u8; NONCE_LEN],
        )
    }

    #[test]
    fn test_wire_round_trip() {
        let envelope = sample();
        let wire = envelope.to_wire().unwrap();
        assert_eq!(Envelope::from_wire(&wire).unwrap(), envelope);
    }

    #[test]
    fn test_wire_fields_are_base64_strings() {
        let wire = sample().to_wire().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&wire).unwrap();

        assert!(value["ciphertext"].is_string());
        assert!(value["ephemeral_public_key"].is_string());
        assert!(value["nonce"].is_string());
        assert_eq!(value["one_time_prekey_id"], 42);
    }

    #[test]
    fn test_missing_one_time_prekey_id_is_omitted() {
        let envelope = Envelope::new(
            vec![1],
            X25519PublicKey::from([9u8; 32]),
            "identity-id".to_string(),
            7,
            None,
            [5u8; NONCE_LEN],
        );
        let value: serde_json::Value =
            serde_json::from_slice(&envelope.to_wire().unwrap()).unwrap();

        assert!(value.get("one_time_prekey_id").is_none());

        let restored = Envelope::from_wire(&envelope.to_wire().unwrap()).unwrap();
        assert_eq!(restored.one_time_prekey_id(), None);
    }

    #[test]
    fn test_truncated_key_is_rejected() {
        let wire = sample().to_wire().unwrap();
        let mut value: serde_json::Value = serde_json::from_slice(&wire).unwrap();
        value["ephemeral_public_key"] = serde_json::Value::String("AAEC".to_string());

        let reencoded = serde_json::to_vec(&value).unwrap();
        assert!(Envelope::from_wire(&reencoded).is_err());
    }
}
