/// Serde helper for `#[serde(default = "crate::serde_defaults::default_true")]`.
pub(crate) const fn default_true() -> bool {
    true
}

/// Serde helper for ISO password spin counts written without a value.
pub(crate) const fn default_spin_count() -> u32 {
    sheetcrypt_offcrypto::SHEET_PROTECTION_SPIN_COUNT
}
