use aes_gcm_siv::aead::Aead;
use aes_gcm_siv::{Aes256GcmSiv, KeyInit, Nonce};
use hkdf::Hkdf;
use rand::TryRngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::Error;

/// AEAD nonce length in bytes (AES-GCM-SIV, 96-bit nonce).
pub const NONCE_LEN: usize = 12;

/// Fills and returns an `N`-byte array from the OS secure random source.
///
/// Fails with [`Error::RandomnessUnavailable`] if the source does; there is
/// no fallback generator.
pub fn random_bytes<const N: usize>() -> Result<[u8; N], Error> {
    let mut bytes = [0u8; N];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|_| Error::RandomnessUnavailable)?;
    Ok(bytes)
}

/// Generates a cryptographically secure random 32-byte seed for key
/// generation. Boxed so the seed never lands on the stack by value.
pub(crate) fn random_seed() -> Result<Box<[u8; 32]>, Error> {
    let mut seed = Box::new([0u8; 32]);
    OsRng
        .try_fill_bytes(seed.as_mut_slice())
        .map_err(|_| Error::RandomnessUnavailable)?;
    Ok(seed)
}

/// SHA-256 digest of `data`.
pub fn hash(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Derives 32 bytes of key material from `ikm` via HKDF-SHA256.
///
/// The input key material is wiped before returning.
pub(crate) fn derive_key(
    ikm: &mut [u8],
    salt: &[u8],
    info: &[u8],
) -> Result<Box<[u8; 32]>, Error> {
    let hkdf = Hkdf::<Sha256>::new(Some(salt), ikm);
    ikm.zeroize();

    let mut okm = Box::new([0u8; 32]);
    hkdf.expand(info, okm.as_mut_slice())
        .map_err(|_| Error::Crypto("HKDF expansion failed".to_string()))?;

    Ok(okm)
}

/// Encrypts `plaintext` under `key` with AES-256-GCM-SIV.
pub fn aead_encrypt(
    key: &[u8; 32],
    nonce: &[u8; NONCE_LEN],
    plaintext: &[u8],
    associated_data: &[u8],
) -> Result<Vec<u8>, Error> {
    let key = aes_gcm_siv::Key::<Aes256GcmSiv>::from_slice(key);
    let cipher = Aes256GcmSiv::new(key);

    cipher
        .encrypt(
            Nonce::from_slice(nonce),
            aes_gcm_siv::aead::Payload {
                msg: plaintext,
                aad: associated_data,
            },
        )
        .map_err(|_| Error::Crypto("AEAD encryption failed".to_string()))
}

/// Decrypts and authenticates `ciphertext`.
///
/// Any failure (wrong key, corrupted data, tag mismatch) is reported as
/// [`Error::DecryptionFailed`] with no partial plaintext.
pub fn aead_decrypt(
    key: &[u8; 32],
    nonce: &[u8; NONCE_LEN],
    ciphertext: &[u8],
    associated_data: &[u8],
) -> Result<Vec<u8>, Error> {
    let key = aes_gcm_siv::Key::<Aes256GcmSiv>::from_slice(key);
    let cipher = Aes256GcmSiv::new(key);

    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            aes_gcm_siv::aead::Payload {
                msg: ciphertext,
                aad: associated_data,
            },
        )
        .map_err(|_| Error::DecryptionFailed)
}
