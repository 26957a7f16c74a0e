//! `sheetcrypt-model` holds the worksheet/workbook protection state of a spreadsheet and the
//! password hashing used to gate it.
//!
//! Protection passwords are stored either as Excel's legacy 16-bit hash or as an ISO
//! (`algorithmName` / `hashValue` / `saltValue` / `spinCount`) hash derived by
//! [`sheetcrypt_offcrypto::derive_password_hash`]. Both forms round-trip through `serde`.

mod error;
mod protection;
mod serde_defaults;

pub use error::ProtectionError;
pub use protection::{
    hash_legacy_password, hash_protection_password, verify_legacy_password, ProtectionOptions,
    ProtectionPassword, SheetProtection, SheetProtectionAction, WorkbookProtection,
    DEFAULT_PROTECTION_ALGORITHM, MAX_PASSWORD_LEN, MAX_PROTECTION_SPIN_COUNT,
    PROTECTION_SALT_LEN,
};
