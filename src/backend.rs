//! The bulk-submission seam between the indexing pipeline and a search
//! engine.
//!
//! The pipeline only ever talks to a [`BulkBackend`]. A backend accepts a
//! batch of records and answers with one [`ItemOutcome`] per record, or
//! fails the whole request with a [`BackendError`].

use std::collections::BTreeMap;

use crate::{
    condition::Condition,
    document::DocumentRepresentation,
    field::FieldValue,
    record::Record,
    schema::Schema,
};

/// A failure of a whole backend request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// The request never reached the engine or its answer was lost.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The engine refused the request as a whole.
    #[error("request rejected: {0}")]
    Rejected(String),

    /// The engine accepted the request but could not persist it.
    #[error("storage failure: {0}")]
    Storage(String),
}

impl From<tantivy::TantivyError> for BackendError {
    fn from(err: tantivy::TantivyError) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Result for one record of a bulk request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Accepted { id: String },
    Rejected { reason: String },
}

impl ItemOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

/// Per-item answer to a bulk request, in request order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkResponse {
    pub items: Vec<ItemOutcome>,
}

impl BulkResponse {
    /// Positions and reasons of rejected items.
    pub fn rejections(&self) -> impl Iterator<Item = (usize, &str)> {
        self.items.iter().enumerate().filter_map(|(i, item)| match item {
            ItemOutcome::Rejected { reason } => Some((i, reason.as_str())),
            ItemOutcome::Accepted { .. } => None,
        })
    }
}

/// A document as read back from a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: String,
    pub fields: Vec<(String, FieldValue)>,
    pub custom_properties: BTreeMap<String, Vec<u8>>,
    /// Set when the document was found by a similarity term.
    pub score: Option<f64>,
}

impl StoredDocument {
    /// Decode back into a record of schema `S`, rejecting fields `S` does
    /// not declare.
    pub fn into_record<S: Schema>(self) -> crate::Result<Record<S>> {
        let document = DocumentRepresentation::from_map(self.fields)?;
        Ok(
            Record::from_parts(Some(self.id), document, self.custom_properties)?
                .with_score(self.score),
        )
    }
}

/// Forward-only paging over a point-in-time view of a collection.
pub trait Scroll: Send {
    /// The next page of documents; an empty page means the scroll is done.
    fn next_page(&mut self) -> Result<Vec<StoredDocument>, BackendError>;
}

pub trait BulkBackend<S: Schema>: Send + Sync {
    /// Make sure the collection can receive documents.
    fn ensure_collection(&self, collection: &str) -> Result<(), BackendError>;

    /// Write a batch of records, replacing any with the same id.
    ///
    /// The response has exactly one item per record, in order.
    fn submit(
        &self,
        collection: &str,
        records: &[Record<S>],
    ) -> Result<BulkResponse, BackendError>;

    /// Remove every document of a collection. Returns whether the engine
    /// acknowledged the request, which does not promise the deletion is
    /// already visible.
    fn delete_all(&self, collection: &str) -> Result<bool, BackendError>;

    fn open_scroll(
        &self,
        collection: &str,
        page_size: usize,
    ) -> Result<Box<dyn Scroll>, BackendError>;

    /// Documents of a collection matching `condition`, at most `limit`.
    ///
    /// When the condition holds a similarity term, only documents reaching
    /// its threshold are returned, best score first, each with its score.
    fn search(
        &self,
        collection: &str,
        condition: &Condition<S>,
        limit: usize,
    ) -> crate::Result<Vec<StoredDocument>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::Error,
        schema::MoleculeSchema,
        toolkit::EncodedStructure,
    };

    #[test]
    fn rejections_report_positions() {
        let response = BulkResponse {
            items: vec![
                ItemOutcome::Accepted { id: "a".into() },
                ItemOutcome::Rejected {
                    reason: "bad".into(),
                },
                ItemOutcome::Accepted { id: "c".into() },
            ],
        };
        assert_eq!(response.rejections().collect::<Vec<_>>(), vec![(1, "bad")]);
        assert!(!response.items[1].is_accepted());
    }

    #[test]
    fn stored_document_decodes_into_record() {
        let stored = StoredDocument {
            id: "r1".into(),
            fields: vec![
                ("name".into(), FieldValue::Text("methane".into())),
                (
                    "structure".into(),
                    FieldValue::Structure(EncodedStructure {
                        bytes: b"C".to_vec(),
                        key: "k".into(),
                        fingerprint: vec!["C:1".into()],
                    }),
                ),
            ],
            custom_properties: BTreeMap::new(),
            score: Some(0.5),
        };
        let record = stored.clone().into_record::<MoleculeSchema>().unwrap();
        assert_eq!(record.id(), Some("r1"));
        assert_eq!(record.name(), Some("methane"));
        assert_eq!(record.score(), Some(0.5));

        let mut unknown = stored;
        unknown.fields.push(("colour".into(), FieldValue::Text("x".into())));
        assert!(matches!(
            unknown.into_record::<MoleculeSchema>(),
            Err(Error::UnknownField { .. })
        ));
    }
}
