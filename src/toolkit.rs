//! The contract the indexer expects from a chemistry toolkit.
//!
//! Parsing native formats and computing canonical encodings is owned by the
//! toolkit. The rest of the crate only sees [`ParsedStructure`] values and
//! the opaque [`EncodedStructure`] the toolkit derives from them.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Whether a structure is a single molecule or a reaction.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum StructureKind {
    Molecule,
    Reaction,
}

impl StructureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Molecule => "molecule",
            Self::Reaction => "reaction",
        }
    }
}

impl std::fmt::Display for StructureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// File formats recognized by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Molfile,
    Sdf,
    Rxnfile,
    Smiles,
}

impl FileFormat {
    /// Classify a path by its (case-insensitive) extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "mol" => Some(Self::Molfile),
            "sdf" | "sd" => Some(Self::Sdf),
            "rxn" => Some(Self::Rxnfile),
            "smi" | "smiles" => Some(Self::Smiles),
            _ => None,
        }
    }
}

/// A structure as handed back by the toolkit after parsing.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedStructure {
    pub kind: StructureKind,
    /// Title carried by the source format, if any.
    pub name: Option<String>,
    /// Native text of the structure (molfile, rxnfile or SMILES).
    pub text: String,
    /// Data items attached to the structure, in file order.
    pub properties: Vec<(String, Vec<u8>)>,
    /// File the structure was read from.
    pub source: Option<PathBuf>,
    /// Position of the structure within its source file.
    pub ordinal: usize,
}

impl ParsedStructure {
    /// Look up a property by name, returning it as text when it is UTF-8.
    pub fn property_text(&self, name: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|(key, _)| key == name)
            .and_then(|(_, value)| std::str::from_utf8(value).ok())
    }
}

/// The toolkit's searchable encoding of a structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedStructure {
    /// Enough to rebuild the structure with [`Toolkit::decode`].
    pub bytes: Vec<u8>,
    /// Exact-match key; equal structures share a key.
    pub key: String,
    /// Screening tokens. If `q` is a substructure of `t`, every token of
    /// `q` is also a token of `t`.
    pub fingerprint: Vec<String>,
}

pub trait Toolkit: Send + Sync {
    /// Determine the format of a file without reading it.
    fn format_of(&self, path: &Path) -> Option<FileFormat>;

    /// Parse every structure contained in a file.
    ///
    /// Fails with [`crate::Error::UnknownFileFormat`] when the file is not a
    /// format this toolkit understands.
    fn parse_file(&self, path: &Path) -> Result<Vec<ParsedStructure>>;

    /// Parse a single structure given inline, e.g. a query structure.
    fn parse_str(
        &self,
        text: &str,
        kind: StructureKind,
    ) -> Result<ParsedStructure>;

    fn encode(&self, structure: &ParsedStructure) -> Result<EncodedStructure>;

    /// Rebuild a structure from [`EncodedStructure::bytes`].
    fn decode(
        &self,
        kind: StructureKind,
        bytes: &[u8],
    ) -> Result<ParsedStructure>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_extension() {
        assert_eq!(
            FileFormat::from_path(Path::new("a/b/aspirin.mol")),
            Some(FileFormat::Molfile)
        );
        assert_eq!(
            FileFormat::from_path(Path::new("lib.SDF")),
            Some(FileFormat::Sdf)
        );
        assert_eq!(
            FileFormat::from_path(Path::new("x.rxn")),
            Some(FileFormat::Rxnfile)
        );
        assert_eq!(
            FileFormat::from_path(Path::new("set.smiles")),
            Some(FileFormat::Smiles)
        );
        assert_eq!(FileFormat::from_path(Path::new("notes.txt")), None);
        assert_eq!(FileFormat::from_path(Path::new("Makefile")), None);
    }

    #[test]
    fn property_text_lookup() {
        let parsed = ParsedStructure {
            kind: StructureKind::Molecule,
            name: None,
            text: "C".into(),
            properties: vec![
                ("CAS".into(), b"64-17-5".to_vec()),
                ("RAW".into(), vec![0xff, 0xfe]),
            ],
            source: None,
            ordinal: 0,
        };
        assert_eq!(parsed.property_text("CAS"), Some("64-17-5"));
        assert_eq!(parsed.property_text("RAW"), None);
        assert_eq!(parsed.property_text("MISSING"), None);
    }
}
