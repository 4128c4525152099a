//! A [`BulkBackend`] over an embedded Tantivy index.
//!
//! Each schema gets its own index. Collections share it and are told apart
//! by a `__collection` term. Text fields are indexed verbatim (no
//! tokenization), so term conditions compare whole values. A text value
//! that reads as a finite number is also indexed as an `f64` under
//! `t__num` for numeric ranges. A structure field `s` is stored under `s`
//! and indexed twice: its exact-match key under `s__key` and its screening
//! tokens under `s__fp`.
//!
//! A similarity term is screened by requiring a minimum number of shared
//! screening tokens, then every candidate is scored against its stored
//! tokens and kept when it reaches the threshold.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet},
    marker::PhantomData,
    ops::Bound,
    path::Path,
    sync::{
        Arc,
        Mutex,
        MutexGuard,
        atomic::{AtomicU64, Ordering},
    },
    time::{SystemTime, UNIX_EPOCH},
};

use tantivy::{
    DocAddress,
    Index,
    IndexReader,
    IndexWriter,
    Searcher,
    TantivyDocument,
    Term,
    collector::{Count, DocSetCollector},
    query::{
        AllQuery,
        BooleanQuery,
        EmptyQuery,
        Occur,
        Query,
        RangeQuery,
        RegexQuery,
        TermQuery,
    },
    schema::{
        Field as IndexField,
        INDEXED,
        IndexRecordOption,
        STORED,
        STRING,
        Schema as IndexSchema,
        Value,
    },
};
use tracing::{debug, warn};

use crate::{
    backend::{
        BackendError,
        BulkBackend,
        BulkResponse,
        ItemOutcome,
        Scroll,
        StoredDocument,
    },
    condition::{Condition, Number, Operator, Similarity, TermValue},
    error::{Error, Result},
    field::{Field, FieldKind, FieldValue},
    record::Record,
    schema::Schema,
    toolkit::{EncodedStructure, Toolkit},
};

/// Field names the backend adds to every document.
pub mod fields {
    pub const UID: &str = "__uid";
    pub const ID: &str = "__id";
    pub const COLLECTION: &str = "__collection";
    pub const PROPERTIES: &str = "__props";
}

const KEY_SUFFIX: &str = "__key";
const FINGERPRINT_SUFFIX: &str = "__fp";
const NUMBER_SUFFIX: &str = "__num";
const WRITER_MEMORY: usize = 50_000_000;

#[derive(Debug, Clone, Copy)]
enum Slot {
    Text {
        value: IndexField,
        number: IndexField,
    },
    Structure {
        bytes: IndexField,
        key: IndexField,
        fingerprint: IndexField,
    },
}

/// Resolved field handles for one schema.
#[derive(Debug)]
struct Handles {
    uid: IndexField,
    id: IndexField,
    collection: IndexField,
    properties: IndexField,
    slots: HashMap<&'static str, Slot>,
}

fn build_schema<S: Schema>() -> IndexSchema {
    let mut builder = IndexSchema::builder();
    builder.add_text_field(fields::UID, STRING);
    builder.add_text_field(fields::ID, STRING | STORED);
    builder.add_text_field(fields::COLLECTION, STRING | STORED);
    builder.add_bytes_field(fields::PROPERTIES, STORED);

    for field in S::FIELDS {
        let name = field.name();
        match field.kind() {
            FieldKind::Text => {
                builder.add_text_field(name, STRING | STORED);
                builder
                    .add_f64_field(&format!("{name}{NUMBER_SUFFIX}"), INDEXED);
            }
            FieldKind::Molecule | FieldKind::Reaction => {
                builder.add_bytes_field(name, STORED);
                builder.add_text_field(
                    &format!("{name}{KEY_SUFFIX}"),
                    STRING | STORED,
                );
                builder.add_text_field(
                    &format!("{name}{FINGERPRINT_SUFFIX}"),
                    STRING | STORED,
                );
            }
        }
    }
    builder.build()
}

fn resolve_handles<S: Schema>(schema: &IndexSchema) -> Result<Handles> {
    let mut slots = HashMap::new();
    for field in S::FIELDS {
        let name = field.name();
        let slot = match field.kind() {
            FieldKind::Text => Slot::Text {
                value: schema.get_field(name)?,
                number: schema.get_field(&format!("{name}{NUMBER_SUFFIX}"))?,
            },
            FieldKind::Molecule | FieldKind::Reaction => Slot::Structure {
                bytes: schema.get_field(name)?,
                key: schema.get_field(&format!("{name}{KEY_SUFFIX}"))?,
                fingerprint: schema
                    .get_field(&format!("{name}{FINGERPRINT_SUFFIX}"))?,
            },
        };
        slots.insert(name, slot);
    }
    Ok(Handles {
        uid: schema.get_field(fields::UID)?,
        id: schema.get_field(fields::ID)?,
        collection: schema.get_field(fields::COLLECTION)?,
        properties: schema.get_field(fields::PROPERTIES)?,
        slots,
    })
}

impl Handles {
    fn uid_term(&self, collection: &str, id: &str) -> Term {
        Term::from_field_text(self.uid, &format!("{collection}\u{0}{id}"))
    }

    fn collection_query(&self, collection: &str) -> TermQuery {
        TermQuery::new(
            Term::from_field_text(self.collection, collection),
            IndexRecordOption::Basic,
        )
    }

    fn to_document<S: Schema>(
        &self,
        collection: &str,
        id: &str,
        record: &Record<S>,
    ) -> std::result::Result<TantivyDocument, String> {
        if id.is_empty() {
            return Err("record id is empty".into());
        }
        if record.structure().is_none() {
            return Err(format!("missing '{}'", S::STRUCTURE.name()));
        }

        let mut doc = TantivyDocument::new();
        doc.add_text(self.uid, format!("{collection}\u{0}{id}"));
        doc.add_text(self.id, id);
        doc.add_text(self.collection, collection);

        for (name, value) in record.document().fields_map() {
            let slot = self
                .slots
                .get(name)
                .ok_or_else(|| format!("field '{name}' is not indexed"))?;
            match (slot, value) {
                (
                    Slot::Text {
                        value: field,
                        number,
                    },
                    FieldValue::Text(text),
                ) => {
                    add_text_value(&mut doc, *field, *number, text);
                }
                (
                    Slot::Text {
                        value: field,
                        number,
                    },
                    FieldValue::TextList(texts),
                ) => {
                    for text in texts {
                        add_text_value(&mut doc, *field, *number, text);
                    }
                }
                (
                    Slot::Structure {
                        bytes,
                        key,
                        fingerprint,
                    },
                    FieldValue::Structure(encoded),
                ) => {
                    doc.add_bytes(*bytes, encoded.bytes.as_slice());
                    doc.add_text(*key, &encoded.key);
                    for token in &encoded.fingerprint {
                        doc.add_text(*fingerprint, token);
                    }
                }
                (_, other) => {
                    return Err(format!(
                        "field '{name}' cannot hold a {} value",
                        other.type_name()
                    ));
                }
            }
        }

        let properties = serde_json::to_vec(record.custom_properties())
            .map_err(|e| format!("custom properties: {e}"))?;
        doc.add_bytes(self.properties, properties.as_slice());
        Ok(doc)
    }

    fn read<S: Schema>(
        &self,
        doc: &TantivyDocument,
    ) -> std::result::Result<StoredDocument, BackendError> {
        let text = |field: IndexField| {
            doc.get_first(field)
                .and_then(|v| v.as_str())
                .map(str::to_string)
        };
        let texts = |field: IndexField| -> Vec<String> {
            doc.get_all(field)
                .filter_map(|v| v.as_str())
                .map(str::to_string)
                .collect()
        };

        let mut stored_fields = Vec::new();
        for field in S::FIELDS {
            let Some(slot) = self.slots.get(field.name()) else {
                continue;
            };
            let value = match *slot {
                Slot::Text { value, .. } if field.is_multi_valued() => {
                    let values = texts(value);
                    (!values.is_empty()).then_some(FieldValue::TextList(values))
                }
                Slot::Text { value, .. } => text(value).map(FieldValue::Text),
                Slot::Structure {
                    bytes,
                    key,
                    fingerprint,
                } => doc
                    .get_first(bytes)
                    .and_then(|v| v.as_bytes())
                    .map(|raw| {
                        FieldValue::Structure(EncodedStructure {
                            bytes: raw.to_vec(),
                            key: text(key).unwrap_or_default(),
                            fingerprint: texts(fingerprint),
                        })
                    }),
            };
            if let Some(value) = value {
                stored_fields.push((field.name().to_string(), value));
            }
        }

        let custom_properties = match doc
            .get_first(self.properties)
            .and_then(|v| v.as_bytes())
        {
            Some(raw) => serde_json::from_slice(raw)
                .map_err(|e| BackendError::Storage(e.to_string()))?,
            None => BTreeMap::new(),
        };

        Ok(StoredDocument {
            id: text(self.id).unwrap_or_default(),
            fields: stored_fields,
            custom_properties,
            score: None,
        })
    }
}

fn add_text_value(
    doc: &mut TantivyDocument,
    value: IndexField,
    number: IndexField,
    text: &str,
) {
    doc.add_text(value, text);
    if let Some(parsed) = as_number(text) {
        doc.add_f64(number, parsed);
    }
}

/// A text value read as a finite number, with -0 folded into 0.
fn as_number(text: &str) -> Option<f64> {
    let parsed: f64 = text.trim().parse().ok()?;
    parsed.is_finite().then_some(parsed + 0.0)
}

/// Tantivy-backed store for records of schema `S`.
pub struct TantivyBackend<S> {
    index: Index,
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    handles: Arc<Handles>,
    toolkit: Arc<dyn Toolkit>,
    _schema: PhantomData<fn() -> S>,
}

impl<S: Schema> TantivyBackend<S> {
    /// Open or create the index at the given directory.
    pub fn open(dir: &Path, toolkit: Arc<dyn Toolkit>) -> Result<Self> {
        std::fs::create_dir_all(dir)?;

        let mmap_dir = tantivy::directory::MmapDirectory::open(dir)
            .map_err(|e| tantivy::TantivyError::SystemError(e.to_string()))?;
        let index = if Index::exists(&mmap_dir)
            .map_err(|e| tantivy::TantivyError::SystemError(e.to_string()))?
        {
            Index::open(mmap_dir)?
        } else {
            Index::create(
                mmap_dir,
                build_schema::<S>(),
                tantivy::IndexSettings::default(),
            )?
        };

        Self::from_index(index, toolkit)
    }

    /// Create an in-memory index (for testing).
    pub fn open_in_ram(toolkit: Arc<dyn Toolkit>) -> Result<Self> {
        Self::from_index(Index::create_in_ram(build_schema::<S>()), toolkit)
    }

    fn from_index(index: Index, toolkit: Arc<dyn Toolkit>) -> Result<Self> {
        crate::schema::validate::<S>()?;
        let handles = resolve_handles::<S>(&index.schema())?;
        let reader = index.reader()?;
        let writer = index.writer(WRITER_MEMORY)?;
        Ok(Self {
            index,
            reader,
            writer: Mutex::new(writer),
            handles: Arc::new(handles),
            toolkit,
            _schema: PhantomData,
        })
    }

    /// Number of documents currently visible in a collection.
    pub fn count(&self, collection: &str) -> Result<usize> {
        self.reader.reload()?;
        let searcher = self.reader.searcher();
        Ok(searcher.search(&self.handles.collection_query(collection), &Count)?)
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    fn lock_writer(
        &self,
    ) -> std::result::Result<MutexGuard<'_, IndexWriter>, BackendError> {
        self.writer
            .lock()
            .map_err(|_| BackendError::Storage("index writer poisoned".into()))
    }

    fn commit(
        &self,
        mut writer: MutexGuard<'_, IndexWriter>,
    ) -> std::result::Result<(), BackendError> {
        if let Err(err) = writer.commit() {
            // Drop the failed batch so it cannot ride along with a later
            // commit.
            if let Err(rollback) = writer.rollback() {
                warn!(error = %rollback, "index writer rollback failed");
            }
            return Err(err.into());
        }
        drop(writer);
        self.reader.reload()?;
        Ok(())
    }

    /// Translate a condition into a Tantivy query.
    pub fn compile(&self, condition: &Condition<S>) -> Result<Box<dyn Query>> {
        match condition {
            Condition::And(first, second) => {
                Ok(Box::new(BooleanQuery::new(vec![
                    (Occur::Must, self.compile(first)?),
                    (Occur::Must, self.compile(second)?),
                ])))
            }
            Condition::Or(first, second) => {
                Ok(Box::new(BooleanQuery::new(vec![
                    (Occur::Should, self.compile(first)?),
                    (Occur::Should, self.compile(second)?),
                ])))
            }
            Condition::Term {
                field,
                operator,
                value,
            } => {
                let positive =
                    self.compile_term(*field, operator.positive(), value)?;
                if operator.is_negated() {
                    let all: Box<dyn Query> = Box::new(AllQuery);
                    Ok(Box::new(BooleanQuery::new(vec![
                        (Occur::Must, all),
                        (Occur::MustNot, positive),
                    ])))
                } else {
                    Ok(positive)
                }
            }
        }
    }

    fn compile_term(
        &self,
        field: Field<S>,
        operator: Operator,
        value: &TermValue,
    ) -> Result<Box<dyn Query>> {
        let slot = self.handles.slots.get(field.name()).copied().ok_or_else(
            || Error::UnknownField {
                schema: S::TYPE_NAME,
                field: field.name().to_string(),
            },
        )?;

        match (slot, operator, value) {
            (
                Slot::Text { value: f, .. },
                Operator::Equals,
                TermValue::Text(text),
            ) => Ok(Box::new(term_query(f, text))),
            (
                Slot::Text { value: f, .. },
                Operator::Contains,
                TermValue::Text(text),
            ) => {
                let pattern = format!(".*{}.*", regex::escape(text));
                Ok(Box::new(RegexQuery::from_pattern(&pattern, f)?))
            }
            (
                Slot::Text { value: f, .. },
                Operator::Prefix,
                TermValue::Text(text),
            ) => {
                let pattern = format!("{}.*", regex::escape(text));
                Ok(Box::new(RegexQuery::from_pattern(&pattern, f)?))
            }
            // A range query needs at least one bound.
            (
                Slot::Text { value: f, .. },
                Operator::Range,
                TermValue::Range {
                    from: None,
                    to: None,
                },
            ) => Ok(Box::new(RegexQuery::from_pattern(".*", f)?)),
            (
                Slot::Text { value: f, .. },
                Operator::Range,
                TermValue::Range { from, to },
            ) => {
                let bound = |b: &Option<String>| match b {
                    Some(text) => {
                        Bound::Included(Term::from_field_text(f, text))
                    }
                    None => Bound::Unbounded,
                };
                Ok(Box::new(RangeQuery::new(bound(from), bound(to))))
            }
            (
                Slot::Text { number, .. },
                Operator::Range,
                TermValue::NumericRange { from, to },
            ) => {
                let term = |n: f64| Term::from_field_f64(number, n);
                // Indexed numbers are finite, so f64::MIN opens the low side.
                let lower =
                    Bound::Included(term(from.map_or(f64::MIN, Number::get)));
                let upper = to.map_or(Bound::Unbounded, |n| {
                    Bound::Included(term(n.get()))
                });
                Ok(Box::new(RangeQuery::new(lower, upper)))
            }
            (
                Slot::Structure { key, .. },
                Operator::Equals,
                TermValue::Text(text),
            ) => {
                let encoded = self.encode_query(field, text)?;
                Ok(Box::new(term_query(key, &encoded.key)))
            }
            (
                Slot::Structure { fingerprint, .. },
                Operator::Contains,
                TermValue::Text(text),
            ) => {
                let encoded = self.encode_query(field, text)?;
                if encoded.fingerprint.is_empty() {
                    return Ok(Box::new(AllQuery));
                }
                Ok(Box::new(BooleanQuery::new(token_clauses(
                    fingerprint,
                    &encoded.fingerprint,
                    Occur::Must,
                ))))
            }
            (
                Slot::Structure { fingerprint, .. },
                Operator::Similar,
                TermValue::Similarity(similarity),
            ) => {
                let tokens = self.query_tokens(field, similarity)?;
                if tokens.is_empty() {
                    return Ok(Box::new(EmptyQuery));
                }
                let tokens: Vec<String> = tokens.into_iter().collect();
                Ok(Box::new(BooleanQuery::with_minimum_required_clauses(
                    token_clauses(fingerprint, &tokens, Occur::Should),
                    similarity.min_shared(tokens.len()),
                )))
            }
            _ => Err(Error::InvalidOperatorKind {
                field: field.name(),
                operator: operator.tag(),
            }),
        }
    }

    /// Distinct screening tokens of a similarity query structure.
    fn query_tokens(
        &self,
        field: Field<S>,
        similarity: &Similarity,
    ) -> Result<BTreeSet<String>> {
        let encoded = self.encode_query(field, &similarity.structure)?;
        Ok(encoded.fingerprint.into_iter().collect())
    }

    fn encode_query(
        &self,
        field: Field<S>,
        text: &str,
    ) -> Result<EncodedStructure> {
        let kind = field.kind().structure_kind().ok_or_else(|| {
            Error::MalformedCondition(format!(
                "'{}' is not a structure field",
                field.name()
            ))
        })?;
        let parsed = self.toolkit.parse_str(text, kind)?;
        self.toolkit.encode(&parsed)
    }
}

fn term_query(field: IndexField, text: &str) -> TermQuery {
    TermQuery::new(
        Term::from_field_text(field, text),
        IndexRecordOption::Basic,
    )
}

fn token_clauses(
    field: IndexField,
    tokens: &[String],
    occur: Occur,
) -> Vec<(Occur, Box<dyn Query>)> {
    tokens
        .iter()
        .map(|token| {
            let query: Box<dyn Query> = Box::new(term_query(field, token));
            (occur, query)
        })
        .collect()
}

/// Screening tokens of the stored structure in `field`.
fn stored_tokens<'a>(doc: &'a StoredDocument, field: &str) -> HashSet<&'a str> {
    doc.fields
        .iter()
        .find(|(name, _)| name == field)
        .and_then(|(_, value)| match value {
            FieldValue::Structure(encoded) => Some(&encoded.fingerprint),
            _ => None,
        })
        .map(|tokens| tokens.iter().map(String::as_str).collect())
        .unwrap_or_default()
}

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

/// Id for a record submitted without one.
fn generated_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    let seq = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{nanos:016x}{seq:08x}")
}

impl<S: Schema> BulkBackend<S> for TantivyBackend<S> {
    fn ensure_collection(
        &self,
        collection: &str,
    ) -> std::result::Result<(), BackendError> {
        if collection.is_empty() {
            return Err(BackendError::Rejected(
                "collection name is empty".into(),
            ));
        }
        Ok(())
    }

    fn submit(
        &self,
        collection: &str,
        records: &[Record<S>],
    ) -> std::result::Result<BulkResponse, BackendError> {
        let writer = self.lock_writer()?;
        let mut items = Vec::with_capacity(records.len());

        for record in records {
            let id = record.id().map_or_else(generated_id, str::to_string);
            let document = self.handles.to_document(collection, &id, record);
            let outcome = match document {
                Ok(doc) => {
                    writer.delete_term(self.handles.uid_term(collection, &id));
                    match writer.add_document(doc) {
                        Ok(_) => ItemOutcome::Accepted { id },
                        Err(e) => ItemOutcome::Rejected {
                            reason: e.to_string(),
                        },
                    }
                }
                Err(reason) => ItemOutcome::Rejected { reason },
            };
            items.push(outcome);
        }

        self.commit(writer)?;
        Ok(BulkResponse { items })
    }

    fn delete_all(
        &self,
        collection: &str,
    ) -> std::result::Result<bool, BackendError> {
        let writer = self.lock_writer()?;
        writer.delete_term(Term::from_field_text(
            self.handles.collection,
            collection,
        ));
        self.commit(writer)?;
        debug!(collection, "deleted collection records");
        Ok(true)
    }

    fn open_scroll(
        &self,
        collection: &str,
        page_size: usize,
    ) -> std::result::Result<Box<dyn Scroll>, BackendError> {
        self.reader.reload()?;
        let searcher = self.reader.searcher();
        let scope = self.handles.collection_query(collection);
        let mut addresses: Vec<DocAddress> = searcher
            .search(&scope, &DocSetCollector)?
            .into_iter()
            .collect();
        addresses.sort();

        Ok(Box::new(TantivyScroll::<S> {
            searcher,
            addresses: addresses.into_iter(),
            page_size: page_size.max(1),
            handles: Arc::clone(&self.handles),
            _schema: PhantomData,
        }))
    }

    fn search(
        &self,
        collection: &str,
        condition: &Condition<S>,
        limit: usize,
    ) -> Result<Vec<StoredDocument>> {
        let similarity = condition.similarity()?;
        let scope: Box<dyn Query> =
            Box::new(self.handles.collection_query(collection));
        let query = BooleanQuery::new(vec![
            (Occur::Must, scope),
            (Occur::Must, self.compile(condition)?),
        ]);

        self.reader.reload()?;
        let searcher = self.reader.searcher();
        let mut addresses: Vec<DocAddress> =
            searcher.search(&query, &DocSetCollector)?.into_iter().collect();
        addresses.sort();

        let Some((field, similarity)) = similarity else {
            let mut results = Vec::with_capacity(addresses.len().min(limit));
            for address in addresses.into_iter().take(limit) {
                let doc: TantivyDocument = searcher.doc(address)?;
                results.push(self.handles.read::<S>(&doc)?);
            }
            return Ok(results);
        };

        let query_tokens = self.query_tokens(field, similarity)?;
        let mut scored = Vec::new();
        for address in addresses {
            let doc: TantivyDocument = searcher.doc(address)?;
            let mut stored = self.handles.read::<S>(&doc)?;
            let target = stored_tokens(&stored, field.name());
            let shared = target
                .iter()
                .filter(|token| query_tokens.contains(**token))
                .count();
            let score =
                similarity.score(query_tokens.len(), target.len(), shared);
            if similarity.matches(score) {
                stored.score = Some(score);
                scored.push(stored);
            }
        }

        let score = |doc: &StoredDocument| doc.score.unwrap_or_default();
        scored.sort_by(|a, b| {
            score(b).total_cmp(&score(a)).then_with(|| a.id.cmp(&b.id))
        });
        scored.truncate(limit);
        debug!(
            collection,
            metric = similarity.metric.name(),
            hits = scored.len(),
            "scored similarity candidates"
        );
        Ok(scored)
    }
}

impl<S> std::fmt::Debug for TantivyBackend<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TantivyBackend").finish_non_exhaustive()
    }
}

/// Pages over the documents a searcher saw when the scroll was opened.
struct TantivyScroll<S> {
    searcher: Searcher,
    addresses: std::vec::IntoIter<DocAddress>,
    page_size: usize,
    handles: Arc<Handles>,
    _schema: PhantomData<fn() -> S>,
}

impl<S: Schema> Scroll for TantivyScroll<S> {
    fn next_page(
        &mut self,
    ) -> std::result::Result<Vec<StoredDocument>, BackendError> {
        let mut page = Vec::with_capacity(self.page_size);
        for address in self.addresses.by_ref().take(self.page_size) {
            let doc: TantivyDocument = self.searcher.doc(address)?;
            page.push(self.handles.read::<S>(&doc)?);
        }
        Ok(page)
    }
}
