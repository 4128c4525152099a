//! Record schemas: the closed set of fields each record type exposes.

use std::{collections::HashSet, fmt::Debug, hash::Hash};

use crate::{
    error::{Error, Result},
    field::{Field, FieldKind, FieldSource},
    toolkit::StructureKind,
};

/// Prefix reserved for fields the backend adds on its own.
pub const RESERVED_PREFIX: &str = "__";

pub trait Schema:
    Debug + Clone + Copy + PartialEq + Eq + Hash + Send + Sync + 'static
{
    /// Stable name of the schema, used for index directories and errors.
    const TYPE_NAME: &'static str;

    /// The kind of structure records of this schema hold.
    const KIND: StructureKind;

    /// Every declared field, in document order.
    const FIELDS: &'static [Field<Self>];

    /// The field holding the record's structure.
    const STRUCTURE: Field<Self>;

    fn field(name: &str) -> Option<Field<Self>> {
        Self::FIELDS.iter().find(|f| f.name() == name).copied()
    }
}

/// Check the invariants every schema must hold: names are non-empty,
/// unique and not reserved, and the structure field is declared with the
/// schema's structure kind.
pub fn validate<S: Schema>() -> Result<()> {
    let mut seen = HashSet::new();
    for field in S::FIELDS {
        let name = field.name();
        if name.is_empty() || name.starts_with(RESERVED_PREFIX) {
            return Err(Error::InvalidConfiguration(format!(
                "schema '{}' declares an invalid field name '{name}'",
                S::TYPE_NAME
            )));
        }
        if !seen.insert(name) {
            return Err(Error::InvalidConfiguration(format!(
                "schema '{}' declares field '{name}' twice",
                S::TYPE_NAME
            )));
        }
    }

    let structure = S::STRUCTURE;
    if !S::FIELDS.contains(&structure)
        || structure.kind().structure_kind() != Some(S::KIND)
    {
        return Err(Error::InvalidConfiguration(format!(
            "schema '{}' has no {} structure field",
            S::TYPE_NAME,
            S::KIND
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MoleculeSchema {}

impl MoleculeSchema {
    pub const NAME: Field<Self> = Field::text("name", FieldSource::Name);
    pub const STRUCTURE: Field<Self> = Field::molecule("structure");
    pub const SOURCE: Field<Self> =
        Field::text("source", FieldSource::SourcePath);
    pub const SYNONYMS: Field<Self> =
        Field::text("synonyms", FieldSource::Property("SYNONYMS"))
            .multi_valued();
    pub const CAS: Field<Self> =
        Field::text("cas", FieldSource::Property("CAS"));
}

impl Schema for MoleculeSchema {
    const TYPE_NAME: &'static str = "molecules";
    const KIND: StructureKind = StructureKind::Molecule;
    const FIELDS: &'static [Field<Self>] = &[
        Self::NAME,
        Self::STRUCTURE,
        Self::SOURCE,
        Self::SYNONYMS,
        Self::CAS,
    ];
    const STRUCTURE: Field<Self> = MoleculeSchema::STRUCTURE;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReactionSchema {}

impl ReactionSchema {
    pub const NAME: Field<Self> = Field::text("name", FieldSource::Name);
    pub const STRUCTURE: Field<Self> = Field::reaction("structure");
    pub const SOURCE: Field<Self> =
        Field::text("source", FieldSource::SourcePath);
}

impl Schema for ReactionSchema {
    const TYPE_NAME: &'static str = "reactions";
    const KIND: StructureKind = StructureKind::Reaction;
    const FIELDS: &'static [Field<Self>] =
        &[Self::NAME, Self::STRUCTURE, Self::SOURCE];
    const STRUCTURE: Field<Self> = ReactionSchema::STRUCTURE;
}

/// Text fields of a schema, which the backend indexes verbatim.
pub fn text_fields<S: Schema>() -> impl Iterator<Item = Field<S>> {
    S::FIELDS
        .iter()
        .copied()
        .filter(|f| f.kind() == FieldKind::Text)
}
