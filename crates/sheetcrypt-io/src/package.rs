//! In-memory Open Packaging Convention (ZIP) package.

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};

/// Default cap on the inflated size of a single part.
pub const MAX_PACKAGE_PART_BYTES: u64 = 256 * 1024 * 1024;
/// Default cap on the inflated size of the whole package.
pub const MAX_PACKAGE_TOTAL_BYTES: u64 = 512 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackageLimits {
    pub max_part_bytes: u64,
    pub max_total_bytes: u64,
}

impl Default for PackageLimits {
    fn default() -> Self {
        Self {
            max_part_bytes: MAX_PACKAGE_PART_BYTES,
            max_total_bytes: MAX_PACKAGE_TOTAL_BYTES,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("part `{part}` is too large ({size} bytes, limit {max})")]
    PartTooLarge { part: String, size: u64, max: u64 },
    #[error("package is too large ({total} bytes inflated, limit {max})")]
    PackageTooLarge { total: u64, max: u64 },
}

/// ZIP parts keyed by name. Unknown parts are kept byte-for-byte.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Package {
    parts: BTreeMap<String, Vec<u8>>,
}

impl Package {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PackageError> {
        Self::from_bytes_limited(bytes, PackageLimits::default())
    }

    pub fn from_bytes_limited(bytes: &[u8], limits: PackageLimits) -> Result<Self, PackageError> {
        let mut zip = zip::ZipArchive::new(Cursor::new(bytes))?;
        let mut parts = BTreeMap::new();
        let mut total: u64 = 0;

        for i in 0..zip.len() {
            let file = zip.by_index(i)?;
            if !file.is_file() {
                continue;
            }
            let name = file.name().to_string();

            let remaining = limits.max_total_bytes.saturating_sub(total);
            let cap = limits.max_part_bytes.min(remaining);
            let buf = read_capped(file, cap)?;
            let size = buf.len() as u64;
            if size > cap {
                if cap == limits.max_part_bytes {
                    return Err(PackageError::PartTooLarge {
                        part: name,
                        size,
                        max: limits.max_part_bytes,
                    });
                }
                return Err(PackageError::PackageTooLarge {
                    total: total.saturating_add(size),
                    max: limits.max_total_bytes,
                });
            }
            total += size;
            parts.insert(name, buf);
        }

        Ok(Self { parts })
    }

    /// Look up a part, tolerating a leading `/`.
    pub fn part(&self, name: &str) -> Option<&[u8]> {
        let name = name.strip_prefix('/').unwrap_or(name);
        self.parts.get(name).map(Vec::as_slice)
    }

    pub fn parts(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.parts
            .iter()
            .map(|(name, bytes)| (name.as_str(), bytes.as_slice()))
    }

    pub fn part_names(&self) -> impl Iterator<Item = &str> {
        self.parts.keys().map(String::as_str)
    }

    pub fn set_part(&mut self, name: impl Into<String>, bytes: Vec<u8>) {
        let name = name.into();
        let name = match name.strip_prefix('/') {
            Some(stripped) => stripped.to_string(),
            None => name,
        };
        self.parts.insert(name, bytes);
    }

    pub fn remove_part(&mut self, name: &str) -> Option<Vec<u8>> {
        let name = name.strip_prefix('/').unwrap_or(name);
        self.parts.remove(name)
    }

    pub fn write_to<W: Write>(&self, mut w: W) -> Result<(), PackageError> {
        let bytes = self.write_to_bytes()?;
        w.write_all(&bytes)?;
        Ok(())
    }

    pub fn write_to_bytes(&self) -> Result<Vec<u8>, PackageError> {
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::FileOptions::<()>::default()
            .compression_method(zip::CompressionMethod::Deflated);

        for (name, bytes) in &self.parts {
            zip.start_file(name.as_str(), options)?;
            zip.write_all(bytes)?;
        }
        Ok(zip.finish()?.into_inner())
    }
}

/// Read at most `cap + 1` bytes so oversized parts are detected without inflating them fully.
fn read_capped<R: Read>(reader: R, cap: u64) -> Result<Vec<u8>, std::io::Error> {
    let mut buf = Vec::new();
    reader.take(cap.saturating_add(1)).read_to_end(&mut buf)?;
    Ok(buf)
}

/// Whether `bytes` start with a ZIP local file header (or the end record of an empty archive).
pub(crate) fn looks_like_zip(bytes: &[u8]) -> bool {
    bytes.starts_with(b"PK\x03\x04") || bytes.starts_with(b"PK\x05\x06")
}
