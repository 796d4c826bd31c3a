//! WireGuard keypair generation.
//!
//! The Panel mints keys for peers the caller didn't already supply a
//! `public_key` for — the Agent never sees a private key for a peer it
//! doesn't own.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use x25519_dalek::{PublicKey, StaticSecret};

pub struct Keypair {
    pub private_key: String,
    pub public_key: String,
}

pub fn generate() -> Keypair {
    let secret = StaticSecret::random_from_rng(OsRng);
    let public = PublicKey::from(&secret);
    Keypair {
        private_key: STANDARD.encode(secret.to_bytes()),
        public_key: STANDARD.encode(public.to_bytes()),
    }
}

/// A preshared key is 32 opaque random bytes, not a curve point — no
/// clamping or public-key derivation applies.
pub fn generate_preshared_key() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    STANDARD.encode(bytes)
}
