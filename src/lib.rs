//! End-to-end encryption core for pairwise messaging.
//!
//! Two devices with no prior trust relationship establish a shared secret
//! through X3DH key agreement against a published prekey bundle, then
//! exchange AEAD-encrypted envelopes through a relay that never sees
//! plaintext or private keys. The server-side key bundle directory and the
//! on-device session store are trait seams with in-memory implementations.

mod error;
pub use error::Error;

mod config;
pub use config::ProtocolConfig;

mod types;
pub use types::*;

mod crypto;
pub use crypto::{NONCE_LEN, aead_decrypt, aead_encrypt, hash, random_bytes};

mod keys;
pub use keys::*;

mod x3dh;
pub use x3dh::*;

mod device;
pub use device::Device;

mod directory;
pub use directory::*;

mod envelope;
pub use envelope::Envelope;

mod session;
pub use session::*;

mod store;
pub use store::*;

mod cipher;
pub use cipher::MessageCipher;

mod safety;
pub use safety::safety_number;
