//! Password KDF: `scrypt` with literal `workfactor`/`blocksize`/`parallelism`
//! parameters matching §6's configuration keys one-to-one.
//!
//! The stored `password` attribute is a self-describing string
//! (`$scrypt$ln=..,r=..,p=..$salt$hash`, hex-encoded rather than base64 to
//! avoid pulling in a dependency beyond `scrypt` itself) so a snapshot
//! round-trip never needs side-channel storage of KDF parameters.
//! `authenticate` re-derives with the *stored* parameters, not the caller's
//! current config, so historical users stay verifiable across a parameter
//! change, and the final comparison is constant-time.

use rand::RngCore;
use scrypt::{Params, scrypt};
use vocsdb_errors::DispatchError;

use crate::config::PasswordConfig;

const SALT_LEN: usize = 16;
const PREFIX: &str = "$scrypt$";

/// Hash `cleartext` under `cfg`'s KDF parameters, returning the
/// self-describing stored string.
///
/// # Errors
///
/// Returns a `Processing` error if `cfg`'s parameters are not valid scrypt
/// parameters, or if the derivation itself fails.
pub fn hash_password(cleartext: &str, cfg: &PasswordConfig) -> Result<String, DispatchError> {
    let mut salt = [0u8; SALT_LEN];
    rand::rng().fill_bytes(&mut salt);
    derive_and_encode(cleartext, &salt, cfg.workfactor, cfg.blocksize, cfg.parallel, cfg.length)
}

fn derive_and_encode(
    cleartext: &str,
    salt: &[u8],
    workfactor: u8,
    blocksize: u32,
    parallel: u32,
    length: usize,
) -> Result<String, DispatchError> {
    let params = Params::new(workfactor, blocksize, parallel, length)
        .map_err(|e| DispatchError::processing(format!("invalid scrypt parameters: {e}")))?;
    let mut derived = vec![0u8; length];
    scrypt(cleartext.as_bytes(), salt, &params, &mut derived)
        .map_err(|e| DispatchError::processing(format!("scrypt derivation failed: {e}")))?;
    Ok(format!(
        "{PREFIX}ln={workfactor},r={blocksize},p={parallel}${}${}",
        hex_encode(salt),
        hex_encode(&derived)
    ))
}

/// `true` iff `cleartext` re-derives to the key embedded in `stored`, using
/// `stored`'s own parameters. Malformed `stored` values never match.
#[must_use]
pub fn verify_password(cleartext: &str, stored: &str) -> bool {
    let Some(parsed) = ParsedHash::parse(stored) else {
        return false;
    };
    let params = match Params::new(
        parsed.workfactor,
        parsed.blocksize,
        parsed.parallel,
        parsed.hash.len(),
    ) {
        Ok(p) => p,
        Err(_) => return false,
    };
    let mut derived = vec![0u8; parsed.hash.len()];
    if scrypt(cleartext.as_bytes(), &parsed.salt, &params, &mut derived).is_err() {
        return false;
    }
    constant_time_eq(&derived, &parsed.hash)
}

struct ParsedHash {
    workfactor: u8,
    blocksize: u32,
    parallel: u32,
    salt: Vec<u8>,
    hash: Vec<u8>,
}

impl ParsedHash {
    fn parse(stored: &str) -> Option<Self> {
        let rest = stored.strip_prefix(PREFIX)?;
        let mut parts = rest.splitn(3, '$');
        let params_part = parts.next()?;
        let salt_hex = parts.next()?;
        let hash_hex = parts.next()?;

        let mut workfactor = None;
        let mut blocksize = None;
        let mut parallel = None;
        for kv in params_part.split(',') {
            let (key, value) = kv.split_once('=')?;
            match key {
                "ln" => workfactor = value.parse::<u8>().ok(),
                "r" => blocksize = value.parse::<u32>().ok(),
                "p" => parallel = value.parse::<u32>().ok(),
                _ => return None,
            }
        }

        Some(Self {
            workfactor: workfactor?,
            blocksize: blocksize?,
            parallel: parallel?,
            salt: hex_decode(salt_hex)?,
            hash: hex_decode(hash_hex)?,
        })
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(s.get(i..i + 2)?, 16).ok())
        .collect()
}

/// Fixed-time byte comparison: always walks every byte of both slices
/// regardless of where they first differ, and compares lengths without a
/// short-circuiting early return.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> PasswordConfig {
        PasswordConfig {
            workfactor: 10,
            blocksize: 1,
            parallel: 1,
            length: 32,
        }
    }

    #[test]
    fn s4_authenticate_matches_only_correct_password() {
        let stored = hash_password("p@ss", &cfg()).unwrap();
        assert!(verify_password("p@ss", &stored));
        assert!(!verify_password("wrong", &stored));
    }

    #[test]
    fn stored_hash_never_equals_cleartext() {
        let stored = hash_password("p@ss", &cfg()).unwrap();
        assert_ne!(stored, "p@ss");
        assert!(stored.starts_with(PREFIX));
    }

    #[test]
    fn verify_survives_kdf_parameter_change() {
        let stored = hash_password("p@ss", &cfg()).unwrap();
        let mut newer = cfg();
        newer.workfactor = 14;
        // authenticate uses the stored parameters, not `newer`.
        assert!(verify_password("p@ss", &stored));
    }

    #[test]
    fn malformed_stored_value_never_matches() {
        assert!(!verify_password("anything", "not-a-hash"));
    }
}
