use std::{path::Path, sync::Arc};

use chemdex::{
    Condition, IndexerConfig, MdlToolkit, MoleculeSchema, ReactionSchema,
    Record, RecordId, Repository, Similarity, TantivyBackend, Toolkit,
    TreeIndexer,
    pipeline::PipelineState,
    walker,
};

const ORGANICS_SMI: &str = "\
# name follows the SMILES
CCO ethanol
CC(=O)O acetic acid
C methane
";

const REACTIONS_SMI: &str = "CCO.CC(=O)O>>CCOC(C)=O esterification\n";

const SUPPLIERS_SDF: &str = "ethanol
  chemdex

  3  2  0  0  0  0  0  0  0  0999 V2000
    0.0000    0.0000    0.0000 C   0  0  0  0  0  0  0  0  0  0  0  0
    1.2990    0.7500    0.0000 C   0  0  0  0  0  0  0  0  0  0  0  0
    2.5981   -0.0000    0.0000 O   0  0  0  0  0  0  0  0  0  0  0  0
  1  2  1  0
  2  3  1  0
M  END
> <CAS>
64-17-5

> <SUPPLIER>
Acme

$$$$
";

type Indexer =
    TreeIndexer<TantivyBackend<MoleculeSchema>, TantivyBackend<ReactionSchema>>;

fn open_indexer(
    index_root: &Path,
    collection: &str,
) -> Result<Indexer, Box<dyn std::error::Error>> {
    let toolkit: Arc<dyn Toolkit> = Arc::new(MdlToolkit);
    let molecules_dir = index_root.join("molecules");
    let reactions_dir = index_root.join("reactions");
    std::fs::create_dir_all(&molecules_dir)?;
    std::fs::create_dir_all(&reactions_dir)?;

    let config = IndexerConfig::new(collection)?.with_batch_size(2)?;
    Ok(TreeIndexer::new(
        Arc::clone(&toolkit),
        Repository::new(
            Arc::new(TantivyBackend::open(
                &molecules_dir,
                Arc::clone(&toolkit),
            )?),
            config.clone(),
        ),
        Repository::new(
            Arc::new(TantivyBackend::open(
                &reactions_dir,
                Arc::clone(&toolkit),
            )?),
            config,
        ),
    ))
}

fn write_tree(root: &Path) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::create_dir_all(root.join("reactions"))?;
    std::fs::create_dir_all(root.join(".cache"))?;
    std::fs::write(root.join("organics.smi"), ORGANICS_SMI)?;
    std::fs::write(root.join("suppliers.sdf"), SUPPLIERS_SDF)?;
    std::fs::write(root.join("reactions/ester.smi"), REACTIONS_SMI)?;
    std::fs::write(root.join("README.txt"), "lab notes")?;
    std::fs::write(root.join(".cache/stale.smi"), "C ignored")?;
    Ok(())
}

fn sorted_names(records: &[Record<MoleculeSchema>]) -> Vec<String> {
    let mut names: Vec<String> = records
        .iter()
        .filter_map(|r| r.name().map(str::to_string))
        .collect();
    names.sort();
    names
}

#[test]
fn index_tree_and_search() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempfile::tempdir()?;
    let tree = tmp.path().join("tree");
    write_tree(&tree)?;
    let indexer = open_indexer(&tmp.path().join("index"), "lab")?;

    let report = indexer.index_tree(&tree, None)?;
    assert_eq!(report.files_seen, 4);
    assert_eq!(report.skipped_files.len(), 1);
    assert_eq!(report.skipped_files[0].path, Path::new("README.txt"));
    assert_eq!(report.molecules.state, PipelineState::Completed);
    assert_eq!(report.molecules.accepted(), 4);
    assert_eq!(report.molecules.outcomes.len(), 2);
    assert_eq!(report.reactions.accepted(), 1);

    let molecules = indexer.molecules();
    let by_name = Condition::equals(MoleculeSchema::NAME, "ethanol")?;
    assert_eq!(molecules.search(&by_name, 10)?.len(), 2);

    let by_prefix = Condition::prefix(MoleculeSchema::NAME, "acet")?;
    assert_eq!(
        sorted_names(&molecules.search(&by_prefix, 10)?),
        vec!["acetic acid"]
    );

    let without_than =
        Condition::contains(MoleculeSchema::NAME, "than")?.not()?;
    assert_eq!(
        sorted_names(&molecules.search(&without_than, 10)?),
        vec!["acetic acid"]
    );

    let carbonyl = Condition::contains(MoleculeSchema::STRUCTURE, "C=O")?;
    assert_eq!(
        sorted_names(&molecules.search(&carbonyl, 10)?),
        vec!["acetic acid"]
    );

    // The SMILES line and the SD record draw ethanol in different orders.
    let exact = Condition::equals(MoleculeSchema::STRUCTURE, "OCC")?;
    assert_eq!(
        sorted_names(&molecules.search(&exact, 10)?),
        vec!["ethanol", "ethanol"]
    );

    let similar = Condition::similar(
        MoleculeSchema::STRUCTURE,
        Similarity::tanimoto("CCO", 0.5)?,
    )?;
    let hits = molecules.search(&similar, 10)?;
    let scores: Vec<_> = hits
        .iter()
        .map(|r| (r.name().unwrap_or_default(), r.score()))
        .collect();
    assert_eq!(
        scores,
        vec![
            ("ethanol", Some(1.0)),
            ("ethanol", Some(1.0)),
            ("acetic acid", Some(5.0 / 7.0)),
        ]
    );

    let by_cas = Condition::equals(MoleculeSchema::CAS, "64-17-5")?;
    let found = molecules.search(&by_cas, 10)?;
    assert_eq!(found.len(), 1);
    assert_eq!(
        found[0].custom_properties().get("SUPPLIER"),
        Some(&b"Acme".to_vec())
    );
    assert_eq!(
        found[0].id(),
        Some(RecordId::new("lab", "suppliers.sdf", 0).hex().as_str())
    );
    Ok(())
}

#[test]
fn conditions_survive_json() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempfile::tempdir()?;
    let tree = tmp.path().join("tree");
    write_tree(&tree)?;
    let indexer = open_indexer(&tmp.path().join("index"), "lab")?;
    indexer.index_tree(&tree, None)?;

    let condition = Condition::or(
        Condition::range(MoleculeSchema::NAME, Some("a"), Some("b"))?,
        Condition::equals(MoleculeSchema::NAME, "methane")?,
    );
    let json = condition.to_json_string();
    let decoded = Condition::<MoleculeSchema>::from_json_str(&json)?;
    assert_eq!(decoded, condition);

    let molecules = indexer.molecules();
    let direct = sorted_names(&molecules.search(&condition, 10)?);
    assert_eq!(direct, vec!["acetic acid", "methane"]);
    assert_eq!(sorted_names(&molecules.search(&decoded, 10)?), direct);
    Ok(())
}

#[test]
fn excludes_stream_and_clear() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempfile::tempdir()?;
    let tree = tmp.path().join("tree");
    write_tree(&tree)?;
    let index_root = tmp.path().join("index");

    {
        let indexer = open_indexer(&index_root, "lab")?;
        let excludes = walker::build_excludes(&["*.sdf"])?;
        let report = indexer.index_tree(&tree, Some(&excludes))?;
        assert_eq!(report.files_seen, 3);
        assert_eq!(report.molecules.accepted(), 3);
    }

    // Reopening sees what the first run committed.
    let indexer = open_indexer(&index_root, "lab")?;
    let streamed = indexer
        .molecules()
        .stream()?
        .collect::<Result<Vec<_>, _>>()?;
    assert_eq!(
        sorted_names(&streamed),
        vec!["acetic acid", "ethanol", "methane"]
    );

    assert!(indexer.molecules().delete_all_records()?);
    assert_eq!(indexer.molecules().stream()?.count(), 0);
    assert_eq!(indexer.reactions().stream()?.count(), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn async_indexing_matches_sync() -> Result<(), Box<dyn std::error::Error>>
{
    let tmp = tempfile::tempdir()?;
    let tree = tmp.path().join("tree");
    write_tree(&tree)?;
    let indexer = open_indexer(&tmp.path().join("index"), "lab")?;

    let report = indexer
        .index_tree_async(&tree, None, |_| {}, |_, _| {})
        .await?;
    assert_eq!(report.molecules.state, PipelineState::Completed);
    assert_eq!(report.molecules.accepted(), 4);
    assert_eq!(report.reactions.accepted(), 1);
    assert_eq!(indexer.molecules().backend().count("lab")?, 4);
    Ok(())
}
