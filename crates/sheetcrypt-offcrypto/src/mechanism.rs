//! Encryption mechanism detection from the `EncryptionVersionInfo` header.

use core::fmt;

use crate::error::{OffcryptoError, Result};

/// The leading `(major, minor)` pair of an `EncryptionInfo` stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VersionHeader {
    pub major: u16,
    pub minor: u16,
}

impl VersionHeader {
    /// Read the first four bytes as two little-endian `u16`s.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let b = bytes.get(..4)?;
        Some(Self {
            major: u16::from_le_bytes([b[0], b[1]]),
            minor: u16::from_le_bytes([b[2], b[3]]),
        })
    }

    pub fn mechanism(self) -> EncryptionMechanism {
        match (self.major, self.minor) {
            (4, 4) => EncryptionMechanism::Agile,
            (2..=4, 2) => EncryptionMechanism::Standard,
            (3 | 4, 3) => EncryptionMechanism::Extensible,
            (1, 1) => EncryptionMechanism::Binary,
            _ => EncryptionMechanism::Unknown,
        }
    }
}

impl fmt::Display for VersionHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Encryption scheme a container declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncryptionMechanism {
    /// RC4 binary document encryption (version 1.1).
    Binary,
    /// ECMA-376 Standard encryption (binary `EncryptionHeader`, AES + SHA-1).
    Standard,
    /// ECMA-376 Extensible encryption (third-party cryptographic providers).
    Extensible,
    /// ECMA-376 Agile encryption (XML descriptor).
    Agile,
    Unknown,
}

impl EncryptionMechanism {
    pub fn as_str(self) -> &'static str {
        match self {
            EncryptionMechanism::Binary => "binary",
            EncryptionMechanism::Standard => "standard",
            EncryptionMechanism::Extensible => "extensible",
            EncryptionMechanism::Agile => "agile",
            EncryptionMechanism::Unknown => "unknown",
        }
    }

    /// Whether this crate can decrypt packages using the mechanism.
    pub fn is_supported(self) -> bool {
        matches!(
            self,
            EncryptionMechanism::Standard | EncryptionMechanism::Agile
        )
    }
}

impl fmt::Display for EncryptionMechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a version header without applying any support policy.
pub fn classify(header: &[u8]) -> EncryptionMechanism {
    VersionHeader::parse(header)
        .map(VersionHeader::mechanism)
        .unwrap_or(EncryptionMechanism::Unknown)
}

/// Classify a version header and reject mechanisms that cannot be decrypted.
///
/// A mechanism that was identified but is not implemented is reported as
/// [`OffcryptoError::UnsupportedEncryptionMechanism`] (carrying the mechanism); a header that
/// could not be identified at all is [`OffcryptoError::UnknownEncryptionMechanism`].
pub fn detect(header: &[u8]) -> Result<EncryptionMechanism> {
    match classify(header) {
        EncryptionMechanism::Unknown => Err(OffcryptoError::UnknownEncryptionMechanism),
        mechanism if mechanism.is_supported() => Ok(mechanism),
        mechanism => Err(OffcryptoError::UnsupportedEncryptionMechanism { mechanism }),
    }
}
