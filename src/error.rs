/// Errors that can occur during protocol operations.
#[derive(thiserror::Error, Debug, Clone, Eq, PartialEq)]
pub enum Error {
    /// The operating system's secure random source failed.
    ///
    /// Fatal for the operation that hit it: key generation aborts rather
    /// than falling back to a weaker generator.
    #[error("Secure random source unavailable")]
    RandomnessUnavailable,

    /// A signed prekey's signature did not verify against the identity key
    /// that claims to own it. The bundle must be rejected; no session can
    /// be established with this material.
    #[error("Signed prekey signature verification failed")]
    SignatureVerificationFailed,

    /// The key bundle directory could not be reached or refused the
    /// request. Retryable by the caller with backoff; local key material is
    /// untouched.
    #[error("Key bundle directory unavailable: {0}")]
    DirectoryUnavailable(String),

    /// Authenticated decryption failed: wrong key, corrupted ciphertext, or
    /// tag mismatch. Retrying with the same inputs cannot succeed.
    #[error("Message authentication or decryption failed")]
    DecryptionFailed,

    /// A prekey id named in an envelope or bundle is unknown or was already
    /// consumed.
    #[error("Pre-key error: {0}")]
    PreKey(String),

    /// The session store rejected or failed an operation.
    #[error("Session store error: {0}")]
    Store(String),

    /// A cryptographic operation other than decryption failed.
    #[error("Cryptographic operation failed: {0}")]
    Crypto(String),

    /// Serialization or deserialization failed.
    #[error("Serialization/deserialization failed: {0}")]
    Serde(String),
}
