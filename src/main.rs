use std::{
    path::Path,
    sync::{Arc, Mutex},
};

use chemdex::{
    ConfigDb, DataDir, Error, IndexReport, MdlToolkit, Repository, Result,
    TantivyBackend, Toolkit, TreeIndexer, TreeReport,
    condition::Condition,
    config::{self, IndexerConfig, Overrides, keys},
    field::FieldValue,
    record::Record,
    schema::{MoleculeSchema, ReactionSchema, Schema},
    walker,
};
use clap::Parser;
use kdam::{BarExt, tqdm};
use serde_json::{Map, Value, json};
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{
    ClearArgs, Cli, CollectionAction, Command, ConfigAction, DumpArgs,
    IndexArgs, SchemaArg, SearchArgs,
};

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("CHEMDEX_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

/// Both record indexes of a data directory.
struct Backends {
    toolkit: Arc<dyn Toolkit>,
    molecules: Arc<TantivyBackend<MoleculeSchema>>,
    reactions: Arc<TantivyBackend<ReactionSchema>>,
}

impl Backends {
    fn open(data_dir: &DataDir) -> Result<Self> {
        let toolkit: Arc<dyn Toolkit> = Arc::new(MdlToolkit);
        let molecules = TantivyBackend::open(
            &data_dir.index_dir::<MoleculeSchema>()?,
            Arc::clone(&toolkit),
        )?;
        let reactions = TantivyBackend::open(
            &data_dir.index_dir::<ReactionSchema>()?,
            Arc::clone(&toolkit),
        )?;
        Ok(Self {
            toolkit,
            molecules: Arc::new(molecules),
            reactions: Arc::new(reactions),
        })
    }

    fn indexer(
        &self,
        config: &IndexerConfig,
    ) -> TreeIndexer<
        TantivyBackend<MoleculeSchema>,
        TantivyBackend<ReactionSchema>,
    > {
        TreeIndexer::new(
            Arc::clone(&self.toolkit),
            Repository::new(Arc::clone(&self.molecules), config.clone()),
            Repository::new(Arc::clone(&self.reactions), config.clone()),
        )
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let config_db = ConfigDb::open(&data_dir.config_db())?;

    match cli.command {
        Command::Collection { action } => match action {
            CollectionAction::Add { path, name } => {
                collection_add(&config_db, &path, &name)?;
            }
            CollectionAction::Remove { name } => {
                collection_remove(&config_db, &data_dir, &name)?;
            }
            CollectionAction::List { json } => {
                collection_list(&config_db, json)?;
            }
        },
        Command::Index(args) => {
            cmd_index(&config_db, &data_dir, &args, cli.quiet)?;
        }
        Command::Search(args) => {
            cmd_search(&config_db, &data_dir, &args)?;
        }
        Command::Dump(args) => {
            cmd_dump(&config_db, &data_dir, &args)?;
        }
        Command::Clear(args) => {
            cmd_clear(&config_db, &data_dir, &args)?;
        }
        Command::Status(args) => {
            cmd_status(&config_db, &data_dir, args.json)?;
        }
        Command::Config { action } => match action {
            ConfigAction::Show { json } => config_show(&config_db, json)?,
            ConfigAction::Set { key, value } => {
                config_set(&config_db, &key, &value)?;
            }
            ConfigAction::Clear { key } => config_clear(&config_db, &key)?,
        },
        Command::Completions(args) => args.generate(),
    }

    Ok(())
}

fn collection_add(config_db: &ConfigDb, path: &Path, name: &str) -> Result<()> {
    IndexerConfig::new(name)?;
    if !path.is_dir() {
        return Err(Error::Config(format!(
            "path is not a directory: {}",
            path.display()
        )));
    }
    let abs_path = path.canonicalize().map_err(|e| {
        Error::Config(format!("cannot resolve path {}: {e}", path.display()))
    })?;

    if config_db.get_collection(name)?.is_some() {
        return Err(Error::Config(format!(
            "collection '{name}' already exists"
        )));
    }
    config_db.set_collection(name, &abs_path.to_string_lossy())?;

    println!("Added collection '{name}' -> {}", abs_path.display());
    Ok(())
}

fn collection_remove(
    config_db: &ConfigDb,
    data_dir: &DataDir,
    name: &str,
) -> Result<()> {
    if config_db.get_collection(name)?.is_none() {
        return Err(Error::NotFound {
            kind: "collection",
            name: name.to_string(),
        });
    }

    let backends = Backends::open(data_dir)?;
    let indexer = backends.indexer(&IndexerConfig::new(name)?);
    indexer.molecules().delete_all_records()?;
    indexer.reactions().delete_all_records()?;
    config_db.remove_collection(name)?;

    println!("Removed collection '{name}'");
    Ok(())
}

fn collection_list(config_db: &ConfigDb, json: bool) -> Result<()> {
    let collections = config_db.list_collections()?;

    if json {
        let entries: Vec<Value> = collections
            .iter()
            .map(|(name, path)| json!({ "name": name, "path": path }))
            .collect();
        println!("{}", Value::Array(entries));
    } else if collections.is_empty() {
        println!("No collections registered.");
    } else {
        for (name, path) in &collections {
            println!("{name}\t{path}");
        }
    }
    Ok(())
}

fn collection_root(config_db: &ConfigDb, name: &str) -> Result<String> {
    config_db
        .get_collection(name)?
        .ok_or_else(|| Error::NotFound {
            kind: "collection",
            name: name.to_string(),
        })
}

fn cmd_index(
    config_db: &ConfigDb,
    data_dir: &DataDir,
    args: &IndexArgs,
    quiet: bool,
) -> Result<()> {
    let collections = match &args.collection {
        Some(name) => vec![(name.clone(), collection_root(config_db, name)?)],
        None => config_db.list_collections()?,
    };
    if collections.is_empty() {
        eprintln!("No collections to index.");
        return Ok(());
    }

    let overrides = Overrides {
        batch_size: args.batch_size,
        max_in_flight: args.max_in_flight,
        page_size: None,
    };
    let excludes = if args.excludes.is_empty() {
        None
    } else {
        Some(walker::build_excludes(&args.excludes)?)
    };
    let backends = Backends::open(data_dir)?;
    let runtime = if args.async_dispatch {
        Some(
            tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?,
        )
    } else {
        None
    };

    for (name, path) in &collections {
        let root = Path::new(path);
        if !root.is_dir() {
            eprintln!(
                "Warning: collection '{name}' path does not exist: {path}"
            );
            continue;
        }
        let config = IndexerConfig::resolve(name, overrides, Some(config_db))?;
        let indexer = backends.indexer(&config);

        let bar = if quiet {
            None
        } else {
            let total = walker::discover_files(root, excludes.as_ref())?.len();
            Some(Mutex::new(tqdm!(total = total, desc = name.clone())))
        };
        let on_file = |_: &walker::DiscoveredFile| {
            if let Some(bar) = &bar
                && let Ok(mut bar) = bar.lock()
            {
                let _ = bar.update(1);
            }
        };

        let report = match &runtime {
            Some(runtime) => runtime.block_on(indexer.index_tree_async(
                root,
                excludes.as_ref(),
                on_file,
                |kind, outcome| {
                    tracing::debug!(
                        %kind,
                        batch = outcome.batch,
                        accepted = outcome.accepted(),
                        "batch done"
                    );
                },
            ))?,
            None => indexer.index_tree_with(root, excludes.as_ref(), on_file)?,
        };
        if bar.is_some() {
            eprintln!();
        }
        print_tree_report(name, &report);
    }
    Ok(())
}

fn print_tree_report(name: &str, report: &TreeReport) {
    eprintln!("Indexed collection '{name}':");
    eprintln!("  Files: {}", report.files_seen);
    for skipped in &report.skipped_files {
        eprintln!("  Skipped {}: {}", skipped.path.display(), skipped.reason);
    }
    if report.skipped_records > 0 {
        eprintln!("  Skipped records: {}", report.skipped_records);
    }
    print_index_report("Molecules", &report.molecules);
    print_index_report("Reactions", &report.reactions);
}

fn print_index_report(label: &str, report: &IndexReport) {
    eprintln!(
        "  {label}: {} indexed in {} batches ({:?})",
        report.accepted(),
        report.outcomes.len(),
        report.state
    );
    for failure in report.failures() {
        eprintln!(
            "    record {} rejected: {}",
            failure.record_index, failure.reason
        );
    }
    if let Some(fatal) = report.fatal()
        && let chemdex::BatchStatus::Fatal(reason) = &fatal.status
    {
        eprintln!("    batch {} failed: {reason}", fatal.batch);
    }
}

fn cmd_search(
    config_db: &ConfigDb,
    data_dir: &DataDir,
    args: &SearchArgs,
) -> Result<()> {
    collection_root(config_db, &args.collection)?;
    let backends = Backends::open(data_dir)?;
    let indexer = backends.indexer(&IndexerConfig::new(&args.collection)?);

    let results = match args.schema {
        SchemaArg::Molecule => {
            let condition = Condition::from_json_str(&args.condition)?;
            search_results(indexer.molecules().search(&condition, args.limit)?)
        }
        SchemaArg::Reaction => {
            let condition = Condition::from_json_str(&args.condition)?;
            search_results(indexer.reactions().search(&condition, args.limit)?)
        }
    };

    if args.json {
        println!("{}", Value::Array(results));
    } else if results.is_empty() {
        println!("No matches.");
    } else {
        for result in &results {
            let id = result["id"].as_str().unwrap_or_default();
            let name = result["fields"]["name"].as_str().unwrap_or("-");
            match result["score"].as_f64() {
                Some(score) => println!("{id}\t{name}\t{score:.3}"),
                None => println!("{id}\t{name}"),
            }
        }
    }
    Ok(())
}

fn search_results<S: Schema>(records: Vec<Record<S>>) -> Vec<Value> {
    records.iter().map(record_json).collect()
}

fn cmd_dump(
    config_db: &ConfigDb,
    data_dir: &DataDir,
    args: &DumpArgs,
) -> Result<()> {
    collection_root(config_db, &args.collection)?;
    let page_size = config::resolve_setting(
        keys::PAGE_SIZE,
        args.page_size,
        Some(config_db),
        config::DEFAULT_PAGE_SIZE,
    )?;
    let config =
        IndexerConfig::new(&args.collection)?.with_page_size(page_size)?;
    let backends = Backends::open(data_dir)?;
    let indexer = backends.indexer(&config);

    match args.schema {
        SchemaArg::Molecule => {
            for record in indexer.molecules().stream()? {
                println!("{}", record_json(&record?));
            }
        }
        SchemaArg::Reaction => {
            for record in indexer.reactions().stream()? {
                println!("{}", record_json(&record?));
            }
        }
    }
    Ok(())
}

/// One record as a JSON object. Structures are shown as their key and
/// their stored text.
fn record_json<S: Schema>(record: &Record<S>) -> Value {
    let mut fields = Map::new();
    for (name, value) in record.document().fields_map() {
        let value = match value {
            FieldValue::Text(text) => json!(text),
            FieldValue::TextList(texts) => json!(texts),
            FieldValue::Structure(encoded) => json!({
                "key": encoded.key,
                "text": String::from_utf8_lossy(&encoded.bytes),
            }),
        };
        fields.insert((*name).to_string(), value);
    }
    let properties: Map<String, Value> = record
        .custom_properties()
        .iter()
        .map(|(key, value)| {
            (key.clone(), json!(String::from_utf8_lossy(value)))
        })
        .collect();

    let mut json = json!({
        "id": record.id(),
        "type": S::TYPE_NAME,
        "fields": fields,
        "properties": properties,
    });
    if let Some(score) = record.score() {
        json["score"] = json!(score);
    }
    json
}

fn cmd_clear(
    config_db: &ConfigDb,
    data_dir: &DataDir,
    args: &ClearArgs,
) -> Result<()> {
    collection_root(config_db, &args.collection)?;
    let backends = Backends::open(data_dir)?;
    let indexer = backends.indexer(&IndexerConfig::new(&args.collection)?);

    let acknowledged = match args.schema {
        Some(SchemaArg::Molecule) => indexer.molecules().delete_all_records()?,
        Some(SchemaArg::Reaction) => indexer.reactions().delete_all_records()?,
        None => {
            indexer.molecules().delete_all_records()?
                & indexer.reactions().delete_all_records()?
        }
    };
    if acknowledged {
        println!("Cleared collection '{}'", args.collection);
    } else {
        eprintln!("Clear of '{}' was not acknowledged", args.collection);
    }
    Ok(())
}

fn cmd_status(
    config_db: &ConfigDb,
    data_dir: &DataDir,
    json: bool,
) -> Result<()> {
    let collections = config_db.list_collections()?;
    let backends = Backends::open(data_dir)?;

    let mut counts = Vec::with_capacity(collections.len());
    for (name, path) in &collections {
        counts.push((
            name,
            path,
            backends.molecules.count(name)?,
            backends.reactions.count(name)?,
        ));
    }

    if json {
        let entries: Vec<Value> = counts
            .iter()
            .map(|(name, path, molecules, reactions)| {
                json!({
                    "name": name,
                    "path": path,
                    "molecules": molecules,
                    "reactions": reactions,
                })
            })
            .collect();
        println!(
            "{}",
            json!({
                "data_dir": data_dir.root().display().to_string(),
                "collections": entries,
            })
        );
    } else {
        println!("Data directory: {}", data_dir.root().display());
        println!("Collections: {}", collections.len());
        for (name, path, molecules, reactions) in &counts {
            println!(
                "  {name}: {path} ({molecules} molecules, \
                 {reactions} reactions)"
            );
        }
    }
    Ok(())
}

fn setting_default(key: &str) -> usize {
    match key {
        keys::BATCH_SIZE => config::DEFAULT_BATCH_SIZE,
        keys::MAX_IN_FLIGHT => config::DEFAULT_MAX_IN_FLIGHT,
        _ => config::DEFAULT_PAGE_SIZE,
    }
}

fn known_key(key: &str) -> Result<&'static str> {
    keys::ALL.into_iter().find(|k| *k == key).ok_or_else(|| {
        Error::Config(format!(
            "unknown setting '{key}' (expected one of: {})",
            keys::ALL.join(", ")
        ))
    })
}

fn config_show(config_db: &ConfigDb, json: bool) -> Result<()> {
    let mut rows = Vec::new();
    for key in keys::ALL {
        let source = if std::env::var(keys::env_var(key)).is_ok() {
            "env"
        } else if config_db.get_setting(key)?.is_some() {
            "config"
        } else {
            "default"
        };
        let value = config::resolve_setting(
            key,
            None,
            Some(config_db),
            setting_default(key),
        )?;
        rows.push((key, value, source));
    }

    if json {
        let map: Map<String, Value> = rows
            .iter()
            .map(|(key, value, source)| {
                (
                    (*key).to_string(),
                    json!({ "value": value, "source": source }),
                )
            })
            .collect();
        println!("{}", Value::Object(map));
    } else {
        for (key, value, source) in &rows {
            println!("{key}\t{value}\t({source})");
        }
    }
    Ok(())
}

fn config_set(config_db: &ConfigDb, key: &str, value: &str) -> Result<()> {
    let key = known_key(key)?;
    let parsed = config::parse_positive(key, value)?;
    if key == keys::PAGE_SIZE {
        IndexerConfig::new("settings")?.with_page_size(parsed)?;
    }
    config_db.set_setting(key, &parsed.to_string())?;
    println!("Set {key} = {parsed}");
    Ok(())
}

fn config_clear(config_db: &ConfigDb, key: &str) -> Result<()> {
    let key = known_key(key)?;
    if !config_db.remove_setting(key)? {
        return Err(Error::NotFound {
            kind: "setting",
            name: key.to_string(),
        });
    }
    println!("Cleared {key}");
    Ok(())
}
