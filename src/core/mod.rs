//! Core identifiers, signing and key custody.

pub mod key;
pub mod keystore;

pub use key::{sign_hmac_sha256, Hash32, Keypair, Pubkey, Signature, HASH_LEN, SIGNATURE_LEN};
pub use keystore::KeyStore;
