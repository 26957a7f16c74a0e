use sheetcrypt_offcrypto::OffcryptoError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtectionError {
    #[error("protection passwords must be 1 to 255 characters long (got {len})")]
    PasswordLength { len: usize },

    #[error("invalid legacy password hash `{value}`")]
    InvalidLegacyHash { value: String },

    #[error("password does not match")]
    PasswordMismatch,

    #[error(transparent)]
    Hash(#[from] OffcryptoError),
}
