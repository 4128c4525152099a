use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

#[derive(Debug, Parser)]
#[command(
    name = "chemdex",
    about = "Index chemical structure files and search them by condition"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors, and hide progress bars
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage structure collections
    Collection {
        #[command(subcommand)]
        action: CollectionAction,
    },
    /// Index the files of one or all collections
    Index(IndexArgs),
    /// Search a collection with a JSON condition
    Search(SearchArgs),
    /// Print every stored record of a collection
    Dump(DumpArgs),
    /// Delete every stored record of a collection
    Clear(ClearArgs),
    /// Show system status and statistics
    Status(StatusArgs),
    /// Manage persisted indexer settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

/// Which record schema a command works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SchemaArg {
    Molecule,
    Reaction,
}

// -- Collection subcommands --

#[derive(Debug, Subcommand)]
pub enum CollectionAction {
    /// Register a directory as a named collection
    Add {
        /// Path to the directory
        path: PathBuf,
        /// Collection name
        #[arg(long)]
        name: String,
    },
    /// Remove a collection and all its indexed records
    Remove {
        /// Name of the collection to remove
        name: String,
    },
    /// List all registered collections
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

// -- Index --

#[derive(Debug, Parser)]
pub struct IndexArgs {
    /// Index only this collection
    #[arg(short = 'c', long)]
    pub collection: Option<String>,

    /// Records per bulk request
    #[arg(long, allow_negative_numbers = true)]
    pub batch_size: Option<i64>,

    /// Dispatch batches concurrently instead of one at a time
    #[arg(long = "async")]
    pub async_dispatch: bool,

    /// Concurrent batches when --async is given
    #[arg(long, allow_negative_numbers = true)]
    pub max_in_flight: Option<i64>,

    /// Glob of relative paths to leave out (repeatable)
    #[arg(short = 'x', long = "exclude")]
    pub excludes: Vec<String>,
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// Condition in its JSON encoding
    pub condition: String,

    /// Collection to search
    #[arg(short = 'c', long)]
    pub collection: String,

    /// Record schema the condition is written against
    #[arg(short, long, value_enum, default_value = "molecule")]
    pub schema: SchemaArg,

    /// Maximum number of records to return
    #[arg(short = 'n', long, default_value = "10")]
    pub limit: usize,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Dump --

#[derive(Debug, Parser)]
pub struct DumpArgs {
    /// Collection to dump
    #[arg(short = 'c', long)]
    pub collection: String,

    /// Record schema to dump
    #[arg(short, long, value_enum, default_value = "molecule")]
    pub schema: SchemaArg,

    /// Records fetched per page
    #[arg(long, allow_negative_numbers = true)]
    pub page_size: Option<i64>,
}

// -- Clear --

#[derive(Debug, Parser)]
pub struct ClearArgs {
    /// Collection to clear
    #[arg(short = 'c', long)]
    pub collection: String,

    /// Clear only this schema (default: both)
    #[arg(short, long, value_enum)]
    pub schema: Option<SchemaArg>,
}

// -- Status --

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Config subcommands --

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Show effective settings and where they come from
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Persist a setting
    Set {
        /// One of batch_size, max_in_flight, page_size
        key: String,
        value: String,
    },
    /// Remove a persisted setting
    Clear { key: String },
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "chemdex",
            &mut std::io::stdout(),
        );
    }
}
