//! Molecule and reaction records.

use std::collections::BTreeMap;

use crate::{
    document::{DocumentRepresentation, build_document},
    error::{Error, Result},
    field::{FieldSource, FieldValue},
    schema::{MoleculeSchema, ReactionSchema, Schema},
    toolkit::{EncodedStructure, ParsedStructure, Toolkit},
};

pub type MoleculeRecord = Record<MoleculeSchema>;
pub type ReactionRecord = Record<ReactionSchema>;

/// A document ready for indexing, plus the properties no field claims.
///
/// Records are immutable once built. Records returned by a similarity
/// search carry their score.
#[derive(Debug, Clone, PartialEq)]
pub struct Record<S> {
    id: Option<String>,
    document: DocumentRepresentation<S>,
    custom_properties: BTreeMap<String, Vec<u8>>,
    score: Option<f64>,
}

impl<S: Schema> Record<S> {
    /// Build a record from a structure the toolkit parsed.
    ///
    /// Fails if the structure is of the wrong kind for `S` or if a required
    /// field has no value.
    pub fn from_parsed(
        parsed: &ParsedStructure,
        toolkit: &dyn Toolkit,
    ) -> Result<Self> {
        if parsed.kind != S::KIND {
            return Err(Error::FieldValueMismatch {
                field: S::STRUCTURE.name(),
                found: parsed.kind.as_str(),
            });
        }
        let document = build_document::<S>(parsed, toolkit)?;

        let claimed: Vec<&str> = S::FIELDS
            .iter()
            .filter_map(|f| match f.source() {
                FieldSource::Property(key) => Some(key),
                _ => None,
            })
            .collect();
        let custom_properties = parsed
            .properties
            .iter()
            .filter(|(key, _)| !claimed.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Ok(Self {
            id: None,
            document,
            custom_properties,
            score: None,
        })
    }

    /// Reassemble a record from stored parts. The structure field must be
    /// present.
    pub fn from_parts(
        id: Option<String>,
        document: DocumentRepresentation<S>,
        custom_properties: BTreeMap<String, Vec<u8>>,
    ) -> Result<Self> {
        let structure =
            document.get(S::STRUCTURE).and_then(FieldValue::as_structure);
        if structure.is_none() {
            return Err(Error::MissingRequiredField(S::STRUCTURE.name()));
        }
        Ok(Self {
            id,
            document,
            custom_properties,
            score: None,
        })
    }

    pub fn with_id(self, id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..self
        }
    }

    pub fn with_score(self, score: Option<f64>) -> Self {
        Self { score, ..self }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn document(&self) -> &DocumentRepresentation<S> {
        &self.document
    }

    pub fn custom_properties(&self) -> &BTreeMap<String, Vec<u8>> {
        &self.custom_properties
    }

    /// Similarity to the query that found this record.
    pub fn score(&self) -> Option<f64> {
        self.score
    }

    pub fn name(&self) -> Option<&str> {
        S::field("name").and_then(|f| self.document.text(f))
    }

    pub fn structure(&self) -> Option<&EncodedStructure> {
        self.document
            .get(S::STRUCTURE)
            .and_then(FieldValue::as_structure)
    }

    /// Rebuild the toolkit structure from its stored encoding.
    pub fn materialize(
        &self,
        toolkit: &dyn Toolkit,
    ) -> Result<ParsedStructure> {
        let encoded = self
            .structure()
            .ok_or(Error::MissingRequiredField(S::STRUCTURE.name()))?;
        toolkit.decode(S::KIND, &encoded.bytes)
    }

    pub fn into_parts(
        self,
    ) -> (
        Option<String>,
        DocumentRepresentation<S>,
        BTreeMap<String, Vec<u8>>,
    ) {
        (self.id, self.document, self.custom_properties)
    }
}
