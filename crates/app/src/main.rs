use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use tabula_core::Catalog;
use tabula_import::ImportProfile;
use tabula_storage::Store;

mod repl;

#[derive(Parser)]
#[command(
    name = "tabula",
    version,
    about = "Browse, categorize and query personal transaction files"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load one or more JSONL transaction files and browse interactively.
    Browse {
        /// Transaction files, one per period.
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Category catalog (JSON side file).
        #[arg(long)]
        categories: Option<PathBuf>,
    },
    /// Convert a bank CSV export into a JSONL transaction file.
    Convert {
        /// The raw CSV export.
        csv: PathBuf,
        /// Import profile (TOML) describing the bank's column layout.
        #[arg(long)]
        profile: PathBuf,
        /// Output JSONL path.
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Command::Browse { files, categories } => browse(files, categories),
        Command::Convert { csv, profile, output } => convert(csv, profile, output),
    }
}

fn browse(files: Vec<PathBuf>, categories: Option<PathBuf>) -> anyhow::Result<()> {
    let catalog = match categories {
        Some(path) => {
            let data = fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            Catalog::from_json_str(&data)
                .with_context(|| format!("loading categories from {}", path.display()))?
        }
        None => Catalog::default(),
    };
    tracing::debug!(categories = catalog.len(), "catalog ready");

    // A fatal load error (malformed file, balance mismatch, overlapping
    // periods) surfaces here and exits non-zero.
    let store = Store::load(&files)?;

    repl::run(store, catalog)
}

fn convert(csv: PathBuf, profile: PathBuf, output: PathBuf) -> anyhow::Result<()> {
    let profile_text = fs::read_to_string(&profile)
        .with_context(|| format!("reading {}", profile.display()))?;
    let profile = ImportProfile::from_toml(&profile_text)?;

    let file = fs::File::open(&csv).with_context(|| format!("opening {}", csv.display()))?;
    let set = tabula_import::import_csv(file, &profile, &csv.display().to_string())?;

    tabula_storage::write_set(&output, &set)?;
    println!("{} transactions written to {}", set.len(), output.display());
    Ok(())
}
