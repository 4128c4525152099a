use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use globset::GlobSet;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::{
    backend::BulkBackend,
    error::{Error, Result},
    pipeline::{BatchOutcome, IndexReport, Repository},
    record::{MoleculeRecord, ReactionRecord, Record},
    record_id::RecordId,
    schema::{MoleculeSchema, ReactionSchema, Schema},
    toolkit::{ParsedStructure, StructureKind, Toolkit},
    walker::{self, DiscoveredFile},
};

/// A file the indexer could not use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// Summary of one directory run.
#[derive(Debug, Clone)]
pub struct TreeReport {
    pub files_seen: usize,
    pub skipped_files: Vec<SkippedFile>,
    /// Structures dropped because a required field had no value.
    pub skipped_records: usize,
    pub molecules: IndexReport,
    pub reactions: IndexReport,
}

impl TreeReport {
    pub fn records_indexed(&self) -> usize {
        self.molecules.accepted() + self.reactions.accepted()
    }
}

/// Records read from a directory tree, not yet indexed.
#[derive(Debug, Default)]
pub struct ParsedTree {
    pub files_seen: usize,
    pub skipped_files: Vec<SkippedFile>,
    pub skipped_records: usize,
    pub molecules: Vec<MoleculeRecord>,
    pub reactions: Vec<ReactionRecord>,
}

/// Everything pulled out of one file.
#[derive(Default)]
struct FileRecords {
    skipped: Option<SkippedFile>,
    skipped_records: usize,
    molecules: Vec<MoleculeRecord>,
    reactions: Vec<ReactionRecord>,
}

/// Walks a directory tree and feeds every structure it finds to the
/// molecule or reaction repository.
pub struct TreeIndexer<MB, RB> {
    toolkit: Arc<dyn Toolkit>,
    molecules: Repository<MoleculeSchema, MB>,
    reactions: Repository<ReactionSchema, RB>,
}

impl<MB, RB> TreeIndexer<MB, RB>
where
    MB: BulkBackend<MoleculeSchema> + 'static,
    RB: BulkBackend<ReactionSchema> + 'static,
{
    pub fn new(
        toolkit: Arc<dyn Toolkit>,
        molecules: Repository<MoleculeSchema, MB>,
        reactions: Repository<ReactionSchema, RB>,
    ) -> Self {
        Self {
            toolkit,
            molecules,
            reactions,
        }
    }

    pub fn molecules(&self) -> &Repository<MoleculeSchema, MB> {
        &self.molecules
    }

    pub fn reactions(&self) -> &Repository<ReactionSchema, RB> {
        &self.reactions
    }

    pub fn index_tree(
        &self,
        root: &Path,
        excludes: Option<&GlobSet>,
    ) -> Result<TreeReport> {
        self.index_tree_with(root, excludes, |_| {})
    }

    /// Index every file under `root`, calling `on_file` once per file as it
    /// is parsed.
    ///
    /// Files in unknown formats or that fail to parse are logged and
    /// reported as skipped; the walk goes on. A directory that cannot be
    /// read aborts the run.
    pub fn index_tree_with<F>(
        &self,
        root: &Path,
        excludes: Option<&GlobSet>,
        on_file: F,
    ) -> Result<TreeReport>
    where
        F: Fn(&DiscoveredFile) + Sync,
    {
        let tree = self.parse_tree(root, excludes, on_file)?;

        let batch_size = self.molecules.config().batch_size();
        let molecules =
            self.molecules.index_records(tree.molecules, batch_size)?;
        let batch_size = self.reactions.config().batch_size();
        let reactions =
            self.reactions.index_records(tree.reactions, batch_size)?;

        Ok(TreeReport {
            files_seen: tree.files_seen,
            skipped_files: tree.skipped_files,
            skipped_records: tree.skipped_records,
            molecules,
            reactions,
        })
    }

    /// Like [`index_tree_with`](Self::index_tree_with), but dispatches
    /// batches concurrently. `on_batch` sees every batch outcome of both
    /// repositories as it completes.
    pub async fn index_tree_async<F, B>(
        &self,
        root: &Path,
        excludes: Option<&GlobSet>,
        on_file: F,
        on_batch: B,
    ) -> Result<TreeReport>
    where
        F: Fn(&DiscoveredFile) + Sync,
        B: Fn(StructureKind, &BatchOutcome) + Send + Sync + 'static,
    {
        let tree = self.parse_tree(root, excludes, on_file)?;
        let on_batch = Arc::new(on_batch);

        let callback = Arc::clone(&on_batch);
        let molecules = self
            .molecules
            .index_records_with(
                tree.molecules,
                self.molecules.config().batch_size(),
                move |outcome| callback(StructureKind::Molecule, outcome),
            )
            .await?;
        let reactions = self
            .reactions
            .index_records_with(
                tree.reactions,
                self.reactions.config().batch_size(),
                move |outcome| on_batch(StructureKind::Reaction, outcome),
            )
            .await?;

        Ok(TreeReport {
            files_seen: tree.files_seen,
            skipped_files: tree.skipped_files,
            skipped_records: tree.skipped_records,
            molecules,
            reactions,
        })
    }

    /// Walk `root` and turn every file into records without indexing them.
    pub fn parse_tree<F>(
        &self,
        root: &Path,
        excludes: Option<&GlobSet>,
        on_file: F,
    ) -> Result<ParsedTree>
    where
        F: Fn(&DiscoveredFile) + Sync,
    {
        let files = walker::discover_files(root, excludes)?;
        info!(root = %root.display(), files = files.len(), "discovered files");

        // Parse in parallel; collect keeps walk order.
        let parsed: Vec<FileRecords> = files
            .par_iter()
            .map(|file| {
                let records = self.load_file(file);
                on_file(file);
                records
            })
            .collect();

        let mut tree = ParsedTree {
            files_seen: files.len(),
            ..ParsedTree::default()
        };
        for file in parsed {
            tree.skipped_files.extend(file.skipped);
            tree.skipped_records += file.skipped_records;
            tree.molecules.extend(file.molecules);
            tree.reactions.extend(file.reactions);
        }
        debug!(
            molecules = tree.molecules.len(),
            reactions = tree.reactions.len(),
            skipped = tree.skipped_files.len(),
            "parsed tree"
        );
        Ok(tree)
    }

    fn load_file(&self, file: &DiscoveredFile) -> FileRecords {
        let mut out = FileRecords::default();
        let structures = match self.toolkit.parse_file(&file.absolute_path) {
            Ok(structures) => structures,
            Err(e) => {
                warn!(
                    path = %file.relative_path.display(),
                    error = %e,
                    "skipping file"
                );
                out.skipped = Some(SkippedFile {
                    path: file.relative_path.clone(),
                    reason: e.to_string(),
                });
                return out;
            }
        };

        let relative = file.relative_str();
        for parsed in &structures {
            let built = match parsed.kind {
                StructureKind::Molecule => self
                    .build::<MoleculeSchema>(parsed, &relative)
                    .map(|r| out.molecules.push(r)),
                StructureKind::Reaction => self
                    .build::<ReactionSchema>(parsed, &relative)
                    .map(|r| out.reactions.push(r)),
            };
            if let Err(e) = built {
                warn!(
                    path = %file.relative_path.display(),
                    ordinal = parsed.ordinal,
                    error = %e,
                    "skipping record"
                );
                out.skipped_records += 1;
            }
        }
        out
    }

    fn build<S: Schema>(
        &self,
        parsed: &ParsedStructure,
        relative_path: &str,
    ) -> Result<Record<S>> {
        let collection = match S::KIND {
            StructureKind::Molecule => self.molecules.config().collection(),
            StructureKind::Reaction => self.reactions.config().collection(),
        };
        let record = Record::<S>::from_parsed(parsed, self.toolkit.as_ref())
            .map_err(|e| match e {
                Error::MissingRequiredField(_) => e,
                other => Error::Parse(other.to_string()),
            })?;
        let id = RecordId::new(collection, relative_path, parsed.ordinal);
        Ok(record.with_id(id.hex()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::IndexerConfig,
        mdl::{
            MdlToolkit,
            fixtures::{ESTERIFICATION_RXN, ETHANOL_MOL, TWO_RECORD_SDF},
        },
        tantivy_index::TantivyBackend,
    };

    type Indexer = TreeIndexer<
        TantivyBackend<MoleculeSchema>,
        TantivyBackend<ReactionSchema>,
    >;

    fn indexer() -> Indexer {
        let toolkit: Arc<dyn Toolkit> = Arc::new(MdlToolkit);
        let config = IndexerConfig::new("lab").unwrap();
        TreeIndexer::new(
            Arc::clone(&toolkit),
            Repository::new(
                Arc::new(
                    TantivyBackend::open_in_ram(Arc::clone(&toolkit)).unwrap(),
                ),
                config.clone().with_batch_size(2).unwrap(),
            ),
            Repository::new(
                Arc::new(
                    TantivyBackend::open_in_ram(Arc::clone(&toolkit)).unwrap(),
                ),
                config,
            ),
        )
    }

    #[test]
    fn indexes_valid_file_and_skips_unknown_format() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("ethanol.mol"), ETHANOL_MOL).unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "not chemistry").unwrap();

        let indexer = indexer();
        let report = indexer.index_tree(tmp.path(), None).unwrap();

        assert_eq!(report.files_seen, 2);
        assert_eq!(report.skipped_files.len(), 1);
        assert_eq!(report.skipped_files[0].path, PathBuf::from("notes.txt"));
        assert_eq!(report.records_indexed(), 1);
        assert_eq!(indexer.molecules().backend().count("lab").unwrap(), 1);
    }

    #[test]
    fn routes_molecules_and_reactions() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("set.sdf"), TWO_RECORD_SDF).unwrap();
        let sub = tmp.path().join("reactions");
        std::fs::create_dir(&sub).unwrap();
        std::fs::write(sub.join("ester.rxn"), ESTERIFICATION_RXN).unwrap();
        std::fs::write(sub.join("mixed.smi"), "CCO ethanol\nCC>>C=C\n")
            .unwrap();

        let indexer = indexer();
        let report = indexer.index_tree(tmp.path(), None).unwrap();

        assert!(report.skipped_files.is_empty());
        assert_eq!(report.molecules.accepted(), 3);
        assert_eq!(report.molecules.outcomes.len(), 2);
        assert_eq!(report.reactions.accepted(), 2);
        assert_eq!(indexer.reactions().backend().count("lab").unwrap(), 2);
    }

    #[test]
    fn ids_are_stable_across_runs() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("set.sdf"), TWO_RECORD_SDF).unwrap();

        let indexer = indexer();
        indexer.index_tree(tmp.path(), None).unwrap();
        indexer.index_tree(tmp.path(), None).unwrap();

        assert_eq!(indexer.molecules().backend().count("lab").unwrap(), 2);
        let ids: Vec<_> = indexer
            .molecules()
            .stream()
            .unwrap()
            .map(|r| r.unwrap().id().unwrap().to_string())
            .collect();
        assert!(ids.contains(&RecordId::new("lab", "set.sdf", 1).hex()));
    }

    #[test]
    fn broken_file_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("broken.mol"), "title\n").unwrap();
        std::fs::write(tmp.path().join("ok.smi"), "C methane\n").unwrap();

        let seen = std::sync::atomic::AtomicUsize::new(0);
        let report = indexer()
            .index_tree_with(tmp.path(), None, |_| {
                seen.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            })
            .unwrap();

        assert_eq!(seen.into_inner(), 2);
        assert_eq!(report.skipped_files.len(), 1);
        assert_eq!(report.skipped_files[0].path, PathBuf::from("broken.mol"));
        assert_eq!(report.records_indexed(), 1);
    }

    #[test]
    fn missing_root_aborts() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(matches!(
            indexer().index_tree(&tmp.path().join("absent"), None),
            Err(Error::Io(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn async_run_reports_every_batch() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("set.sdf"), TWO_RECORD_SDF).unwrap();
        std::fs::write(tmp.path().join("ester.rxn"), ESTERIFICATION_RXN)
            .unwrap();
        std::fs::write(tmp.path().join("more.smi"), "C methane\nN\n").unwrap();

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let indexer = indexer();
        let report = indexer
            .index_tree_async(tmp.path(), None, |_| {}, move |kind, outcome| {
                sink.lock().unwrap().push((kind, outcome.batch));
            })
            .await
            .unwrap();

        assert_eq!(report.molecules.accepted(), 4);
        assert_eq!(report.reactions.accepted(), 1);
        let mut seen = seen.lock().unwrap().clone();
        seen.sort_by_key(|(kind, batch)| (kind.as_str(), *batch));
        assert_eq!(
            seen,
            vec![
                (StructureKind::Molecule, 0),
                (StructureKind::Molecule, 1),
                (StructureKind::Reaction, 0),
            ]
        );
    }
}
