use std::hash::Hasher;

use fnv::FnvHasher;

/// A stable record identifier derived from the collection, the file's path
/// relative to the collection root, and the record's position in the file.
///
/// Ids are persisted, so they are an FNV-1a hash over explicit bytes and
/// stay the same across builds and platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId(u64);

impl RecordId {
    pub fn new(collection: &str, relative_path: &str, ordinal: usize) -> Self {
        let mut hasher = FnvHasher::default();
        hasher.write(collection.as_bytes());
        hasher.write(&[0xff]);
        hasher.write(relative_path.as_bytes());
        hasher.write(&[0xff]);
        hasher.write(&(ordinal as u64).to_le_bytes());
        Self(hasher.finish())
    }

    pub fn numeric(self) -> u64 {
        self.0
    }

    /// Full 16-digit hex form, as stored in the index.
    pub fn hex(self) -> String {
        format!("{:016x}", self.0)
    }

    /// Leading hex digits for display; `len` is clamped to 6..=16.
    pub fn short(self, len: usize) -> String {
        let mut hex = self.hex();
        hex.truncate(len.clamp(6, 16));
        hex
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.short(6))
    }
}
