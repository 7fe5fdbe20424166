//! MT5 Web API challenge-response codec.
//!
//! The digest is MD5 because that is what the MT5 server computes. It is a
//! wire compatibility requirement and must only change together with the
//! server.

use std::fmt;

use md5::{Digest, Md5};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::api::error::HandshakeError;

/// Suffix mixed into the password hash before it becomes the shared key.
const FINGERPRINT_SALT: &[u8] = b"WebAPI";

/// Length of the client nonce in bytes (32 hex chars on the wire).
const CLIENT_RANDOM_LEN: usize = 16;

/// Shared authentication key derived from the manager password.
/// Never transmitted; `Debug` does not print it.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SecretFingerprint([u8; 16]);

impl SecretFingerprint {
    pub(crate) fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Debug for SecretFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretFingerprint(..)")
    }
}

/// `md5(md5(utf16le(secret)) || "WebAPI")`
pub fn derive_secret_fingerprint(secret: &str) -> SecretFingerprint {
    let utf16: Vec<u8> = secret.encode_utf16().flat_map(u16::to_le_bytes).collect();
    let password_md5 = Md5::digest(&utf16);

    let mut hasher = Md5::new();
    hasher.update(password_md5);
    hasher.update(FINGERPRINT_SALT);
    SecretFingerprint(hasher.finalize().into())
}

/// Answer to the server nonce: `hex(md5(fingerprint || bytes(srv_rand)))`
pub fn compute_challenge_response(
    fingerprint: &SecretFingerprint,
    srv_rand_hex: &str,
) -> Result<String, HandshakeError> {
    let srv_rand = hex::decode(srv_rand_hex)
        .map_err(|e| HandshakeError::MalformedChallenge(format!("srv_rand is not hex: {}", e)))?;
    Ok(hex::encode(keyed_digest(fingerprint, &srv_rand)))
}

/// Fresh client nonce from the OS CSPRNG, hex encoded.
pub fn generate_client_random() -> String {
    let mut bytes = [0u8; CLIENT_RANDOM_LEN];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Check the server's `cli_rand_answer` against our own computation.
/// Malformed hex on either side is simply a mismatch.
pub fn validate_server_proof(
    fingerprint: &SecretFingerprint,
    cli_rand_hex: &str,
    server_proof_hex: &str,
) -> bool {
    let (Ok(cli_rand), Ok(proof)) = (hex::decode(cli_rand_hex), hex::decode(server_proof_hex)) else {
        return false;
    };
    constant_time_eq(&keyed_digest(fingerprint, &cli_rand), &proof)
}

fn keyed_digest(fingerprint: &SecretFingerprint, nonce: &[u8]) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update(fingerprint.as_bytes());
    hasher.update(nonce);
    hasher.finalize().into()
}

/// Constant-time comparison; length mismatch returns early since the
/// expected length is public.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}
