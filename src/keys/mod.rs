mod identity;
pub use identity::*;

mod signed_prekey;
pub use signed_prekey::*;

mod one_time;
pub use one_time::OneTimePreKey;
pub(crate) use one_time::OneTimePreKeyStore;
