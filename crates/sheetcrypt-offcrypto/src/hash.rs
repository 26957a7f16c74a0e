//! Hash algorithm registry.
//!
//! Algorithm names reach this crate from untrusted metadata (`hashAlgorithm="SHA512"` in Agile
//! `EncryptionInfo`, `algorithmName="SHA-512"` in worksheet protection). [`HashAlgorithmId`]
//! keeps unfamiliar names as an explicit [`HashAlgorithmId::Unrecognized`] arm instead of failing
//! at parse time; code that actually needs a digest calls [`HashAlgorithmId::require`].

use core::fmt;
use core::str::FromStr;

use digest::Digest;

use crate::error::{OffcryptoError, Result};

// CryptoAPI `ALG_ID` values for the hash algorithms Standard encryption can name.
const CALG_MD5: u32 = 0x0000_8003;
const CALG_SHA1: u32 = 0x0000_8004;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    Md4,
    Md5,
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    pub const ALL: [HashAlgorithm; 6] = [
        HashAlgorithm::Md4,
        HashAlgorithm::Md5,
        HashAlgorithm::Sha1,
        HashAlgorithm::Sha256,
        HashAlgorithm::Sha384,
        HashAlgorithm::Sha512,
    ];

    /// Look up an algorithm by name.
    ///
    /// Matching ignores ASCII case, surrounding whitespace, `-` and `_`, so `SHA-1`, `SHA1` and
    /// `sha_1` all name the same algorithm.
    pub fn from_name(name: &str) -> Option<Self> {
        let normalized = name
            .trim()
            .to_ascii_lowercase()
            .replace(['-', '_'], "");
        match normalized.as_str() {
            "md4" => Some(HashAlgorithm::Md4),
            "md5" => Some(HashAlgorithm::Md5),
            "sha1" => Some(HashAlgorithm::Sha1),
            "sha256" => Some(HashAlgorithm::Sha256),
            "sha384" => Some(HashAlgorithm::Sha384),
            "sha512" => Some(HashAlgorithm::Sha512),
            _ => None,
        }
    }

    /// Map a CryptoAPI `AlgIDHash`. Standard encryption writes `0` to mean SHA-1.
    pub fn from_cryptoapi_alg_id(alg_id_hash: u32) -> Option<Self> {
        match alg_id_hash {
            0 | CALG_SHA1 => Some(HashAlgorithm::Sha1),
            CALG_MD5 => Some(HashAlgorithm::Md5),
            _ => None,
        }
    }

    /// Canonical name, as written into protection metadata.
    pub fn name(self) -> &'static str {
        match self {
            HashAlgorithm::Md4 => "MD4",
            HashAlgorithm::Md5 => "MD5",
            HashAlgorithm::Sha1 => "SHA-1",
            HashAlgorithm::Sha256 => "SHA-256",
            HashAlgorithm::Sha384 => "SHA-384",
            HashAlgorithm::Sha512 => "SHA-512",
        }
    }

    pub fn digest_len(self) -> usize {
        match self {
            HashAlgorithm::Md4 | HashAlgorithm::Md5 => 16,
            HashAlgorithm::Sha1 => 20,
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha384 => 48,
            HashAlgorithm::Sha512 => 64,
        }
    }

    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        self.digest_parts(&[data])
    }

    /// Hash the concatenation of `parts` without building the concatenated buffer.
    pub fn digest_parts(self, parts: &[&[u8]]) -> Vec<u8> {
        fn run<D: Digest>(parts: &[&[u8]]) -> Vec<u8> {
            let mut hasher = D::new();
            for part in parts {
                hasher.update(part);
            }
            hasher.finalize().to_vec()
        }

        match self {
            HashAlgorithm::Md4 => run::<md4::Md4>(parts),
            HashAlgorithm::Md5 => run::<md5::Md5>(parts),
            HashAlgorithm::Sha1 => run::<sha1::Sha1>(parts),
            HashAlgorithm::Sha256 => run::<sha2::Sha256>(parts),
            HashAlgorithm::Sha384 => run::<sha2::Sha384>(parts),
            HashAlgorithm::Sha512 => run::<sha2::Sha512>(parts),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A hash algorithm name as read from document metadata.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashAlgorithmId {
    Known(HashAlgorithm),
    /// A name outside the registry, kept verbatim for diagnostics.
    Unrecognized(String),
}

impl HashAlgorithmId {
    pub fn parse(name: &str) -> Self {
        match HashAlgorithm::from_name(name) {
            Some(alg) => HashAlgorithmId::Known(alg),
            None => HashAlgorithmId::Unrecognized(name.to_string()),
        }
    }

    pub fn known(&self) -> Option<HashAlgorithm> {
        match self {
            HashAlgorithmId::Known(alg) => Some(*alg),
            HashAlgorithmId::Unrecognized(_) => None,
        }
    }

    /// Convert into a usable algorithm, failing with
    /// [`OffcryptoError::UnsupportedHashAlgorithm`] for unrecognized names.
    pub fn require(self) -> Result<HashAlgorithm> {
        match self {
            HashAlgorithmId::Known(alg) => Ok(alg),
            HashAlgorithmId::Unrecognized(name) => {
                Err(OffcryptoError::UnsupportedHashAlgorithm { name })
            }
        }
    }
}

impl FromStr for HashAlgorithmId {
    type Err = core::convert::Infallible;

    fn from_str(s: &str) -> core::result::Result<Self, Self::Err> {
        Ok(HashAlgorithmId::parse(s))
    }
}

impl From<HashAlgorithm> for HashAlgorithmId {
    fn from(alg: HashAlgorithm) -> Self {
        HashAlgorithmId::Known(alg)
    }
}

/// Hash `data` with the algorithm called `algorithm`.
///
/// Returns `None` when the name is not in the registry. This never fails: it is used to probe
/// algorithm labels from metadata, where an unfamiliar label is not by itself an error.
pub fn digest(algorithm: &str, data: &[u8]) -> Option<Vec<u8>> {
    HashAlgorithm::from_name(algorithm).map(|alg| alg.digest(data))
}
