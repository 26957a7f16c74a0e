use thiserror::Error;

use crate::mechanism::EncryptionMechanism;

/// Result type for this crate.
pub type Result<T> = std::result::Result<T, OffcryptoError>;

/// Errors returned while hashing passwords or decrypting an `EncryptedPackage`.
///
/// Variants never carry the password or any derived key material, so they are safe to show to
/// end users and to log.
#[derive(Debug, Error)]
pub enum OffcryptoError {
    // --- Mechanism detection -------------------------------------------------------------------
    #[error("unknown encryption mechanism")]
    UnknownEncryptionMechanism,

    #[error("unsupported encryption mechanism `{mechanism}`")]
    UnsupportedEncryptionMechanism { mechanism: EncryptionMechanism },

    // --- Container / EncryptionInfo structure --------------------------------------------------
    #[error("malformed container: {context}")]
    MalformedContainer { context: &'static str },

    #[error("missing required OLE stream `{stream}`")]
    MissingStream { stream: &'static str },

    #[error("truncated data while reading {context}")]
    Truncated { context: &'static str },

    #[error("invalid EncryptionInfo: {context}")]
    InvalidEncryptionInfo { context: &'static str },

    #[error("<{element}> is missing required attribute `{attr}`")]
    MissingAttribute {
        element: &'static str,
        attr: &'static str,
    },

    #[error("<{element}> has an invalid `{attr}` attribute")]
    InvalidAttribute {
        element: &'static str,
        attr: &'static str,
    },

    #[error("invalid base64 in `{attr}`: {source}")]
    InvalidBase64 {
        attr: &'static str,
        #[source]
        source: base64::DecodeError,
    },

    #[error("unsupported encryption algorithm id 0x{0:08X}")]
    UnsupportedAlgorithm(u32),

    #[error("unsupported cipher `{cipher}`; only AES in ChainingModeCBC is supported")]
    UnsupportedCipher { cipher: String },

    #[error("invalid AES key length {len}; expected 16, 24, or 32 bytes")]
    InvalidKeyLength { len: usize },

    #[error("{field} ciphertext length {len} is not a multiple of 16 bytes")]
    CiphertextNotBlockAligned { field: &'static str, len: usize },

    #[error("EncryptedPackage stream is too short ({len} bytes)")]
    EncryptedPackageTooShort { len: usize },

    #[error("EncryptedPackage declares {declared} bytes but only {available} bytes decrypt")]
    EncryptedPackageSizeMismatch { declared: u64, available: u64 },

    // --- Password hashing ----------------------------------------------------------------------
    #[error("invalid base64 salt value: {source}")]
    MalformedSaltEncoding {
        #[source]
        source: base64::DecodeError,
    },

    #[error("unsupported hash algorithm `{name}`")]
    UnsupportedHashAlgorithm { name: String },

    #[error("unsupported CryptoAPI hash algorithm id 0x{alg_id_hash:08X}; Standard encryption requires SHA-1")]
    UnsupportedHashAlgorithmId { alg_id_hash: u32 },

    #[error("invalid spin count `{value}`")]
    InvalidSpinCount { value: String },

    // --- Limits --------------------------------------------------------------------------------
    #[error("spinCount {spin_count} exceeds maximum allowed {max}")]
    SpinCountTooLarge { spin_count: u32, max: u32 },

    #[error("EncryptedPackage declares {declared} bytes, above the configured limit of {max}")]
    OutputTooLarge { declared: u64, max: u64 },

    // --- Verification --------------------------------------------------------------------------
    #[error("wrong password (verifier mismatch)")]
    WrongPassword,

    #[error("integrity check failed (HMAC mismatch); the package may be corrupted")]
    IntegrityMismatch,

    #[error("I/O error while {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Stable classification of [`OffcryptoError`] for callers that report errors across an API
/// boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    UnknownEncryptionMechanism,
    UnsupportedEncryptionMechanism,
    MalformedContainer,
    MalformedSaltEncoding,
    UnsupportedHashAlgorithm,
    InvalidSpinCount,
    WrongPassword,
    IntegrityCheckFailed,
    LimitExceeded,
}

impl OffcryptoError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OffcryptoError::UnknownEncryptionMechanism => ErrorKind::UnknownEncryptionMechanism,
            OffcryptoError::UnsupportedEncryptionMechanism { .. }
            | OffcryptoError::UnsupportedAlgorithm(_)
            | OffcryptoError::UnsupportedCipher { .. } => ErrorKind::UnsupportedEncryptionMechanism,
            OffcryptoError::MalformedContainer { .. }
            | OffcryptoError::MissingStream { .. }
            | OffcryptoError::Truncated { .. }
            | OffcryptoError::InvalidEncryptionInfo { .. }
            | OffcryptoError::MissingAttribute { .. }
            | OffcryptoError::InvalidAttribute { .. }
            | OffcryptoError::InvalidBase64 { .. }
            | OffcryptoError::InvalidKeyLength { .. }
            | OffcryptoError::CiphertextNotBlockAligned { .. }
            | OffcryptoError::EncryptedPackageTooShort { .. }
            | OffcryptoError::EncryptedPackageSizeMismatch { .. }
            | OffcryptoError::Io { .. } => ErrorKind::MalformedContainer,
            OffcryptoError::MalformedSaltEncoding { .. } => ErrorKind::MalformedSaltEncoding,
            OffcryptoError::UnsupportedHashAlgorithm { .. }
            | OffcryptoError::UnsupportedHashAlgorithmId { .. } => {
                ErrorKind::UnsupportedHashAlgorithm
            }
            OffcryptoError::InvalidSpinCount { .. } => ErrorKind::InvalidSpinCount,
            OffcryptoError::SpinCountTooLarge { .. } | OffcryptoError::OutputTooLarge { .. } => {
                ErrorKind::LimitExceeded
            }
            OffcryptoError::WrongPassword => ErrorKind::WrongPassword,
            OffcryptoError::IntegrityMismatch => ErrorKind::IntegrityCheckFailed,
        }
    }
}
