//! chemdex - index chemical structure files into a local search engine.
//!
//! chemdex walks directories of molfiles, SD files, rxnfiles and SMILES
//! lists, turns every structure into a typed record and writes the records
//! in batches to a [Tantivy](https://github.com/quickwit-oss/tantivy) index.
//! Stored records can be streamed back or searched with [`Condition`]
//! trees, which also have a stable JSON encoding.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use chemdex::{
//!     Condition, IndexerConfig, MdlToolkit, MoleculeSchema, Record,
//!     Repository, StructureKind, TantivyBackend, Toolkit,
//! };
//!
//! let toolkit: Arc<dyn Toolkit> = Arc::new(MdlToolkit);
//! let backend =
//!     TantivyBackend::<MoleculeSchema>::open_in_ram(toolkit.clone()).unwrap();
//! let repo = Repository::new(
//!     Arc::new(backend),
//!     IndexerConfig::new("library").unwrap(),
//! );
//!
//! let parsed = toolkit.parse_str("CCO ethanol", StructureKind::Molecule);
//! let record = Record::from_parsed(&parsed.unwrap(), &*toolkit).unwrap();
//! repo.index_record(record).unwrap();
//!
//! let query = Condition::equals(MoleculeSchema::NAME, "ethanol").unwrap();
//! for record in repo.search(&query, 10).unwrap() {
//!     println!("{:?}", record.name());
//! }
//! ```

pub mod backend;
pub mod condition;
pub mod config;
pub mod config_db;
pub mod data_dir;
pub mod document;
pub mod error;
pub mod field;
pub mod ingestion;
pub mod mdl;
pub mod pipeline;
pub mod record;
pub mod record_id;
pub mod schema;
pub mod tantivy_index;
pub mod toolkit;
pub mod walker;

pub use backend::{BackendError, BulkBackend};
pub use condition::{Condition, Metric, Operator, Similarity, TermValue};
pub use config::IndexerConfig;
pub use config_db::ConfigDb;
pub use data_dir::DataDir;
pub use document::DocumentRepresentation;
pub use error::{Error, Result};
pub use field::{Field, FieldKind, FieldValue};
pub use ingestion::{TreeIndexer, TreeReport};
pub use mdl::MdlToolkit;
pub use pipeline::{BatchOutcome, BatchStatus, IndexReport, Repository};
pub use record::{MoleculeRecord, ReactionRecord, Record};
pub use record_id::RecordId;
pub use schema::{MoleculeSchema, ReactionSchema, Schema};
pub use tantivy_index::TantivyBackend;
pub use toolkit::{StructureKind, Toolkit};
