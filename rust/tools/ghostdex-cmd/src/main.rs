use anyhow::Result;
use clap::{Args, Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "ghostdex-cmd")]
#[command(about = "Command-line utility for ghostdex term indexes")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    store: StoreArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Where the index lives and how it is read and written.
#[derive(Args, Clone)]
pub struct StoreArgs {
    /// Directory holding the stored units
    #[arg(long, global = true, default_value = ".ghostdex")]
    pub store: String,

    /// Worker threads for store I/O (defaults to the global pool)
    #[arg(long, global = true)]
    pub threads: Option<usize>,

    /// Print the in-flight store tasks after the command
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Build an index from `term<TAB>doc[<TAB>pos,...[<TAB>title]]` lines
    Build {
        /// Input file
        #[arg(short, long)]
        input: String,

        /// Index name
        #[arg(long, default_value = "index")]
        name: String,

        /// Minimum node size of the term table
        #[arg(long)]
        node_min: Option<usize>,

        /// Bin capacity for packed postings
        #[arg(long)]
        capacity: Option<usize>,
    },

    /// Print the postings of one or more terms as JSON
    Lookup {
        /// Index reference printed by `build`
        #[arg(long)]
        index: String,

        /// Terms to look up
        #[arg(required = true)]
        terms: Vec<String>,
    },

    /// Print a JSON summary of an index
    Inspect {
        /// Index reference printed by `build`
        #[arg(long)]
        index: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            input,
            name,
            node_min,
            capacity,
        } => commands::build::run(&cli.store, input, name, node_min, capacity),
        Commands::Lookup { index, terms } => commands::lookup::run(&cli.store, index, terms),
        Commands::Inspect { index } => commands::inspect::run(&cli.store, index),
    }
}
