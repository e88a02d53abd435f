//! ECDSA wallet primitives on secp256k1.
//!
//! Public keys travel as the raw 64-byte (X, Y) concatenation, hex encoded;
//! signatures as the 64-byte compact (r, s) form, hex encoded. Messages are
//! always 32-byte SHA-256 digests.

use rand::{CryptoRng, Rng};
use secp256k1::ecdsa::Signature;
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};

use crate::{ChainError, Hash256, PubKeyHashHex, PubKeyHex, Result, SignatureHex};

/// An ECDSA key pair controlling asset shares
#[derive(Debug, Clone)]
pub struct Wallet {
    secret_key: SecretKey,
    public_key: PublicKey,
}

impl Wallet {
    /// Generates a fresh key pair from the given randomness source
    #[must_use]
    pub fn generate<R: Rng + CryptoRng>(rng: &mut R) -> Self {
        let secp = Secp256k1::new();
        let (secret_key, public_key) = secp.generate_keypair(rng);
        Self {
            secret_key,
            public_key,
        }
    }

    /// Rebuilds a wallet from a hex-encoded secret key
    ///
    /// # Errors
    ///
    /// Returns an error if the hex does not decode to a valid secret key
    pub fn from_secret_hex(secret_hex: &str) -> Result<Self> {
        let bytes =
            hex::decode(secret_hex).map_err(|e| ChainError::Crypto(e.to_string()))?;
        let secret_key =
            SecretKey::from_slice(&bytes).map_err(|e| ChainError::Crypto(e.to_string()))?;
        let secp = Secp256k1::new();
        let public_key = PublicKey::from_secret_key(&secp, &secret_key);
        Ok(Self {
            secret_key,
            public_key,
        })
    }

    /// Raw 64-byte (X, Y) public key, without the SEC1 prefix byte
    #[must_use]
    pub fn pubkey_bytes(&self) -> [u8; 64] {
        let uncompressed = self.public_key.serialize_uncompressed();
        let mut raw = [0u8; 64];
        raw.copy_from_slice(&uncompressed[1..]);
        raw
    }

    /// Hex encoding of the raw public key
    #[must_use]
    pub fn pubkey_hex(&self) -> PubKeyHex {
        hex::encode(self.pubkey_bytes())
    }

    /// Hex SHA-256 over the raw public-key bytes; the address form recorded
    /// in outputs
    #[must_use]
    pub fn pubkey_hash(&self) -> PubKeyHashHex {
        Hash256::sha256(&self.pubkey_bytes()).to_string()
    }

    /// Hex encoding of the secret key, for persistence records
    #[must_use]
    pub fn secret_hex(&self) -> String {
        hex::encode(self.secret_key.secret_bytes())
    }

    /// Signs a 32-byte message hash, returning the compact signature as hex
    #[must_use]
    pub fn sign(&self, msg_hash: &Hash256) -> SignatureHex {
        let secp = Secp256k1::new();
        let message = Message::from_digest(*msg_hash.as_bytes());
        let signature = secp.sign_ecdsa(&message, &self.secret_key);
        hex::encode(signature.serialize_compact())
    }
}

/// Verifies a compact ECDSA signature against a raw hex public key and a
/// message hash. Any malformed component verifies as false.
#[must_use]
pub fn verify_signature(pubkey_hex: &str, msg_hash: &Hash256, signature_hex: &str) -> bool {
    fn check(pubkey_hex: &str, msg_hash: &Hash256, signature_hex: &str) -> Option<bool> {
        let raw = hex::decode(pubkey_hex).ok()?;
        if raw.len() != 64 {
            return None;
        }
        let mut sec1 = [0u8; 65];
        sec1[0] = 0x04;
        sec1[1..].copy_from_slice(&raw);
        let public_key = PublicKey::from_slice(&sec1).ok()?;

        let sig_bytes = hex::decode(signature_hex).ok()?;
        let signature = Signature::from_compact(&sig_bytes).ok()?;

        let secp = Secp256k1::verification_only();
        let message = Message::from_digest(*msg_hash.as_bytes());
        Some(secp.verify_ecdsa(&message, &signature, &public_key).is_ok())
    }

    check(pubkey_hex, msg_hash, signature_hex).unwrap_or(false)
}

/// Hex SHA-256 of a hex-encoded raw public key; `None` when the hex is
/// malformed
#[must_use]
pub fn pubkey_hash_hex(pubkey_hex: &str) -> Option<PubKeyHashHex> {
    let raw = hex::decode(pubkey_hex).ok()?;
    Some(Hash256::sha256(&raw).to_string())
}
