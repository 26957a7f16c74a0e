//! ISO/IEC 29500 (ECMA-376) iterated password hashing.
//!
//! Both package encryption and worksheet/workbook protection stretch a password as:
//!
//! 1. `H0 = Hash(salt || UTF-16LE(password))`
//! 2. `spinCount` rounds mixing in a little-endian 32-bit round counter
//!
//! The two features disagree on where the counter goes, see [`IteratorPlacement`].

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use zeroize::Zeroizing;

use crate::error::{OffcryptoError, Result};
use crate::hash::{HashAlgorithm, HashAlgorithmId};

/// Default spin count Excel writes for worksheet and workbook protection.
pub const SHEET_PROTECTION_SPIN_COUNT: u32 = 100_000;

/// Where the round counter is placed in each spin round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IteratorPlacement {
    /// `H(n+1) = Hash(LE32(n) || H(n))`. Used for `EncryptedPackage` key derivation.
    Prefix,
    /// `H(n+1) = Hash(H(n) || LE32(n))`. Used for `sheetProtection` / `workbookProtection`
    /// password hashes.
    Suffix,
}

/// A base64 hash/salt pair, as stored in protection metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedPasswordHash {
    pub hash_value: String,
    pub salt_value: String,
}

/// Encode a password as UTF-16LE with no BOM and no terminator.
pub fn password_to_utf16le(password: &str) -> Zeroizing<Vec<u8>> {
    let mut out = Zeroizing::new(Vec::with_capacity(password.len().saturating_mul(2)));
    for unit in password.encode_utf16() {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out
}

/// Run the iterated hash over an already-encoded password.
///
/// Runs exactly `spin_count` rounds after the initial hash; every round depends on the previous
/// one.
pub fn iterated_hash(
    password_utf16le: &[u8],
    salt: &[u8],
    hash_alg: HashAlgorithm,
    spin_count: u32,
    placement: IteratorPlacement,
) -> Zeroizing<Vec<u8>> {
    let mut h = Zeroizing::new(hash_alg.digest_parts(&[salt, password_utf16le]));

    for i in 0..spin_count {
        let counter = i.to_le_bytes();
        let next = Zeroizing::new(match placement {
            IteratorPlacement::Prefix => hash_alg.digest_parts(&[&counter, &h]),
            IteratorPlacement::Suffix => hash_alg.digest_parts(&[&h, &counter]),
        });
        // Overwrite in place; every round has the same digest length.
        h.copy_from_slice(&next);
    }

    h
}

/// Derive the protection hash for `password`.
///
/// `salt_value` is base64 and is returned unchanged next to the new hash so callers always
/// persist a matched pair. Unlike [`crate::hash::digest`], an unrecognized algorithm name is an
/// error here.
pub fn derive_password_hash(
    password: &str,
    algorithm: &str,
    salt_value: &str,
    spin_count: u32,
) -> Result<DerivedPasswordHash> {
    let salt = STANDARD
        .decode(salt_value.trim())
        .map_err(|source| OffcryptoError::MalformedSaltEncoding { source })?;
    let hash_alg = HashAlgorithmId::parse(algorithm).require()?;

    let password = password_to_utf16le(password);
    let h = iterated_hash(
        &password,
        &salt,
        hash_alg,
        spin_count,
        IteratorPlacement::Suffix,
    );

    Ok(DerivedPasswordHash {
        hash_value: STANDARD.encode(&h[..]),
        salt_value: salt_value.to_string(),
    })
}

/// Parse a textual spin count (e.g. a `spinCount` XML attribute).
pub fn parse_spin_count(value: &str) -> Result<u32> {
    let invalid = || OffcryptoError::InvalidSpinCount {
        value: value.to_string(),
    };
    let parsed: i64 = value.trim().parse().map_err(|_| invalid())?;
    u32::try_from(parsed).map_err(|_| invalid())
}
