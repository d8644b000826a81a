//! 32-byte hashes, ed25519 key pairs and signatures.
//!
//! Everything on the wire is little-endian bytes; the text encodings
//! (base58 for keys and signatures, base64 for transactions) only appear at
//! the JSON boundary.

use std::fmt;

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

pub const HASH_LEN: usize = 32;
pub const SIGNATURE_LEN: usize = 64;
pub const KEYPAIR_LEN: usize = 64;

/// Opaque 32-byte value: blockhashes, account addresses, mints.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Hash32(pub [u8; HASH_LEN]);

/// An account address is a 32-byte hash on this chain.
pub type Pubkey = Hash32;

impl Hash32 {
    pub const ZERO: Hash32 = Hash32([0u8; HASH_LEN]);

    pub fn new(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    pub fn from_base58(text: &str) -> Result<Self> {
        let decoded = bs58::decode(text)
            .into_vec()
            .map_err(|e| Error::Deserialize(format!("invalid base58: {}", e)))?;
        Self::from_slice(&decoded)
    }

    pub fn to_base58(&self) -> String {
        bs58::encode(&self.0).into_string()
    }

    pub fn from_base64(text: &str) -> Result<Self> {
        use base64::Engine;
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(text)
            .map_err(|e| Error::Deserialize(format!("invalid base64: {}", e)))?;
        Self::from_slice(&decoded)
    }

    pub fn to_base64(&self) -> String {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.encode(self.0)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let array: [u8; HASH_LEN] = bytes
            .try_into()
            .map_err(|_| Error::Deserialize(format!("expected {} bytes, got {}", HASH_LEN, bytes.len())))?;
        Ok(Self(array))
    }

    /// Program-derived address:
    /// `first32(SHA256(base || nonce_le_u64 || program || "ProgramDerivedAddress"))`.
    pub fn derive_program_address(base: &Pubkey, program: &Pubkey, nonce: u64) -> Pubkey {
        let mut hasher = Sha256::new();
        hasher.update(base.0);
        hasher.update(nonce.to_le_bytes());
        hasher.update(program.0);
        hasher.update(b"ProgramDerivedAddress");
        let digest = hasher.finalize();
        let mut out = [0u8; HASH_LEN];
        out.copy_from_slice(&digest[..HASH_LEN]);
        Hash32(out)
    }
}

impl fmt::Display for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_base58())
    }
}

impl fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_base58())
    }
}

/// Ed25519 key pair. The secret seed never leaves this type.
#[derive(Clone)]
pub struct Keypair {
    signing: SigningKey,
}

impl Keypair {
    pub fn generate() -> Self {
        let mut secret = [0u8; 32];
        rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut secret);
        Self {
            signing: SigningKey::from_bytes(&secret),
        }
    }

    pub fn from_secret_bytes(secret: &[u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(secret),
        }
    }

    pub fn pubkey(&self) -> Pubkey {
        Hash32(self.signing.verifying_key().to_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.signing.sign(message).to_bytes())
    }

    /// Persisted form: 64 integers, secret seed followed by public key.
    pub fn to_json_array(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(KEYPAIR_LEN);
        bytes.extend_from_slice(&self.signing.to_bytes());
        bytes.extend_from_slice(&self.pubkey().0);
        bytes
    }

    pub fn from_json_array(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEYPAIR_LEN {
            return Err(Error::Deserialize(format!(
                "key pair file must contain {} bytes, got {}",
                KEYPAIR_LEN,
                bytes.len()
            )));
        }
        let secret: [u8; 32] = bytes[..32].try_into().expect("checked length");
        let keypair = Self::from_secret_bytes(&secret);
        if keypair.pubkey().0 != bytes[32..] {
            return Err(Error::Deserialize(
                "key pair public half does not match the secret seed".into(),
            ));
        }
        Ok(keypair)
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Keypair({})", self.pubkey())
    }
}

/// 64-byte ed25519 signature.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature(pub [u8; SIGNATURE_LEN]);

impl Signature {
    pub fn to_base58(&self) -> String {
        bs58::encode(&self.0).into_string()
    }

    pub fn from_base58(text: &str) -> Result<Self> {
        let decoded = bs58::decode(text)
            .into_vec()
            .map_err(|e| Error::Deserialize(format!("invalid base58: {}", e)))?;
        let array: [u8; SIGNATURE_LEN] = decoded.as_slice().try_into().map_err(|_| {
            Error::Deserialize(format!(
                "expected {} signature bytes, got {}",
                SIGNATURE_LEN,
                decoded.len()
            ))
        })?;
        Ok(Self(array))
    }

    pub fn verify(&self, message: &[u8], pubkey: &Pubkey) -> bool {
        let Ok(key) = VerifyingKey::from_bytes(&pubkey.0) else {
            return false;
        };
        let signature = ed25519_dalek::Signature::from_bytes(&self.0);
        key.verify(message, &signature).is_ok()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_base58())
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_base58())
    }
}

/// HMAC-SHA256 tag, used for CEX REST and WS authentication.
pub fn sign_hmac_sha256(message: &[u8], secret: &[u8]) -> [u8; 32] {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret).expect("hmac accepts any key length");
    mac.update(message);
    mac.finalize().into_bytes().into()
}
