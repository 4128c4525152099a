//! Typed field descriptors bound to a record schema.

use std::{marker::PhantomData, path::Path};

use crate::{
    error::{Error, Result},
    schema::Schema,
    toolkit::{EncodedStructure, ParsedStructure, StructureKind, Toolkit},
};

/// What a field stores, which decides its encoding and the operators it
/// accepts in conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Text,
    Molecule,
    Reaction,
}

impl FieldKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Molecule => "molecule",
            Self::Reaction => "reaction",
        }
    }

    /// The structure kind a searchable structure field holds.
    pub fn structure_kind(self) -> Option<StructureKind> {
        match self {
            Self::Text => None,
            Self::Molecule => Some(StructureKind::Molecule),
            Self::Reaction => Some(StructureKind::Reaction),
        }
    }
}

/// Where a field's value comes from on a parsed structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldSource {
    /// The title the source format carries.
    Name,
    /// The structure itself.
    Structure,
    /// The path of the file the structure was read from.
    SourcePath,
    /// A named data item, e.g. an SD file property.
    Property(&'static str),
}

/// A raw value pulled from a parsed structure, before encoding.
#[derive(Debug, Clone)]
pub enum RecordValue<'a> {
    Text(&'a str),
    Texts(Vec<&'a str>),
    Structure(&'a ParsedStructure),
}

/// An encoded value ready to be handed to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    TextList(Vec<String>),
    Structure(EncodedStructure),
}

impl FieldValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::TextList(_) => "text list",
            Self::Structure(_) => "structure",
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_structure(&self) -> Option<&EncodedStructure> {
        match self {
            Self::Structure(encoded) => Some(encoded),
            _ => None,
        }
    }

    /// All text values, whether the field is single- or multi-valued.
    pub fn texts(&self) -> Vec<&str> {
        match self {
            Self::Text(text) => vec![text.as_str()],
            Self::TextList(texts) => texts.iter().map(String::as_str).collect(),
            Self::Structure(_) => Vec::new(),
        }
    }
}

/// A named field of schema `S`.
///
/// `S` is never instantiated; it only ties the field to one schema so that
/// conditions and documents cannot mix fields from different schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Field<S> {
    name: &'static str,
    kind: FieldKind,
    source: FieldSource,
    multi_valued: bool,
    required: bool,
    _schema: PhantomData<fn() -> S>,
}

impl<S> Field<S> {
    pub const fn text(name: &'static str, source: FieldSource) -> Self {
        Self {
            name,
            kind: FieldKind::Text,
            source,
            multi_valued: false,
            required: false,
            _schema: PhantomData,
        }
    }

    pub const fn molecule(name: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::Molecule,
            source: FieldSource::Structure,
            multi_valued: false,
            required: true,
            _schema: PhantomData,
        }
    }

    pub const fn reaction(name: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::Reaction,
            source: FieldSource::Structure,
            multi_valued: false,
            required: true,
            _schema: PhantomData,
        }
    }

    pub const fn multi_valued(self) -> Self {
        Self {
            multi_valued: true,
            ..self
        }
    }

    pub const fn required(self) -> Self {
        Self {
            required: true,
            ..self
        }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }

    pub const fn kind(&self) -> FieldKind {
        self.kind
    }

    pub const fn source(&self) -> FieldSource {
        self.source
    }

    pub const fn is_multi_valued(&self) -> bool {
        self.multi_valued
    }

    pub const fn is_required(&self) -> bool {
        self.required
    }
}

impl<S: Schema> Field<S> {
    /// Pull the raw value for this field from a parsed structure.
    ///
    /// Multi-valued property fields split the property text into one value
    /// per non-empty line.
    pub fn value_from<'a>(
        &self,
        parsed: &'a ParsedStructure,
    ) -> Option<RecordValue<'a>> {
        let present = |text: &'a str| (!text.trim().is_empty()).then_some(text);
        match self.source {
            FieldSource::Name => {
                parsed.name.as_deref().and_then(present).map(RecordValue::Text)
            }
            FieldSource::Structure => Some(RecordValue::Structure(parsed)),
            FieldSource::SourcePath => parsed
                .source
                .as_deref()
                .and_then(Path::to_str)
                .map(RecordValue::Text),
            FieldSource::Property(key) => {
                let text = parsed.property_text(key).and_then(present)?;
                if self.multi_valued {
                    Some(RecordValue::Texts(
                        text.lines()
                            .map(str::trim)
                            .filter(|l| !l.is_empty())
                            .collect(),
                    ))
                } else {
                    Some(RecordValue::Text(text))
                }
            }
        }
    }

    /// Encode a raw value into this field's slot of a document.
    ///
    /// Text passes through unchanged; structures are encoded by the
    /// toolkit.
    pub fn contribute(
        &self,
        value: RecordValue<'_>,
        toolkit: &dyn Toolkit,
    ) -> Result<(&'static str, FieldValue)> {
        let mismatch = |found| Error::FieldValueMismatch {
            field: self.name,
            found,
        };

        let encoded = match (self.kind, value) {
            (FieldKind::Text, RecordValue::Text(text)) if self.multi_valued => {
                FieldValue::TextList(vec![text.to_string()])
            }
            (FieldKind::Text, RecordValue::Text(text)) => {
                FieldValue::Text(text.to_string())
            }
            (FieldKind::Text, RecordValue::Texts(texts))
                if self.multi_valued =>
            {
                FieldValue::TextList(
                    texts.into_iter().map(str::to_string).collect(),
                )
            }
            (FieldKind::Text, RecordValue::Texts(_)) => {
                return Err(mismatch("text list"));
            }
            (FieldKind::Text, RecordValue::Structure(_)) => {
                return Err(mismatch("structure"));
            }
            (kind, RecordValue::Structure(parsed)) => {
                if kind.structure_kind() != Some(parsed.kind) {
                    return Err(mismatch(parsed.kind.as_str()));
                }
                FieldValue::Structure(toolkit.encode(parsed)?)
            }
            (_, RecordValue::Text(_)) => return Err(mismatch("text")),
            (_, RecordValue::Texts(_)) => return Err(mismatch("text list")),
        };

        Ok((self.name, encoded))
    }

    /// Whether an already encoded value fits this field.
    pub fn accepts(&self, value: &FieldValue) -> bool {
        match (self.kind, value) {
            (FieldKind::Text, FieldValue::Text(_)) => !self.multi_valued,
            (FieldKind::Text, FieldValue::TextList(_)) => self.multi_valued,
            (
                FieldKind::Molecule | FieldKind::Reaction,
                FieldValue::Structure(_),
            ) => true,
            _ => false,
        }
    }
}
