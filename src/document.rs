//! Field-name to value mappings backed by a schema.

use std::{collections::BTreeMap, marker::PhantomData};

use crate::{
    error::{Error, Result},
    field::{Field, FieldValue},
    schema::Schema,
    toolkit::{ParsedStructure, Toolkit},
};

/// The indexable view of one record.
///
/// Every key is the name of a field declared by `S`, and every value fits
/// that field's kind and cardinality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRepresentation<S> {
    fields: BTreeMap<&'static str, FieldValue>,
    _schema: PhantomData<fn() -> S>,
}

impl<S: Schema> Default for DocumentRepresentation<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Schema> DocumentRepresentation<S> {
    pub fn new() -> Self {
        Self {
            fields: BTreeMap::new(),
            _schema: PhantomData,
        }
    }

    /// Set a field's value, replacing any previous one.
    pub fn insert(&mut self, field: Field<S>, value: FieldValue) -> Result<()> {
        if !field.accepts(&value) {
            return Err(Error::FieldValueMismatch {
                field: field.name(),
                found: value.type_name(),
            });
        }
        self.fields.insert(field.name(), value);
        Ok(())
    }

    /// Rebuild a document from name/value pairs, e.g. as read back from a
    /// backend. Names the schema does not declare are rejected.
    pub fn from_map<I, K>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, FieldValue)>,
        K: AsRef<str>,
    {
        let mut document = Self::new();
        for (name, value) in entries {
            let name = name.as_ref();
            let field = S::field(name).ok_or_else(|| Error::UnknownField {
                schema: S::TYPE_NAME,
                field: name.to_string(),
            })?;
            document.insert(field, value)?;
        }
        Ok(document)
    }

    pub fn fields_map(&self) -> &BTreeMap<&'static str, FieldValue> {
        &self.fields
    }

    pub fn get(&self, field: Field<S>) -> Option<&FieldValue> {
        self.fields.get(field.name())
    }

    pub fn text(&self, field: Field<S>) -> Option<&str> {
        self.get(field).and_then(FieldValue::as_text)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn into_map(self) -> BTreeMap<&'static str, FieldValue> {
        self.fields
    }
}

/// Build the document for a parsed structure by asking every declared field
/// of `S` for its value.
///
/// Properties that no field claims are left alone; records carry them
/// separately as custom properties.
pub fn build_document<S: Schema>(
    parsed: &ParsedStructure,
    toolkit: &dyn Toolkit,
) -> Result<DocumentRepresentation<S>> {
    let mut document = DocumentRepresentation::new();
    for field in S::FIELDS {
        match field.value_from(parsed) {
            Some(value) => {
                let (_, encoded) = field.contribute(value, toolkit)?;
                document.insert(*field, encoded)?;
            }
            None if field.is_required() => {
                return Err(Error::MissingRequiredField(field.name()));
            }
            None => {}
        }
    }
    Ok(document)
}
