use std::collections::{BTreeSet, HashSet};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use benchdb::config::AppConfig;
use benchdb::identity::{IdentityProvider, Sha256Identity};
use benchdb::logging::{init_logging, OperationTimer};
use benchdb::models::{Collapse, Record};
use benchdb::runner::{CommandExtractor, RunReport};
use benchdb::validation::InputValidator;
use benchdb::{metrics, BenchDb};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database files or CSV files (defaults to the configured path)
    #[arg(short, long, global = true)]
    db: Vec<PathBuf>,

    /// Number of parallel extraction jobs
    #[arg(short, long, global = true)]
    jobs: Option<usize>,

    /// Per-item time limit in seconds
    #[arg(long, global = true)]
    tlim: Option<u64>,

    /// Per-item memory limit in megabytes
    #[arg(long, global = true)]
    mlim: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register benchmark files found below a directory
    Init {
        /// Root directory to scan
        root: PathBuf,

        /// Remove stale entries without asking
        #[arg(short, long)]
        yes: bool,
    },
    /// Print the identity of a benchmark file
    Hash {
        /// Benchmark file
        path: PathBuf,
    },
    /// Import values from a CSV file into an existing feature
    Import {
        /// CSV file
        path: PathBuf,

        /// Column holding the hashes
        #[arg(short, long, default_value = "hash")]
        key: String,

        /// Column holding the values
        #[arg(short, long)]
        source: String,

        /// Target feature
        #[arg(short, long)]
        target: String,
    },
    /// Show database or feature details
    Info {
        /// Feature name (database summary if omitted)
        name: Option<String>,

        /// Print distinct values of the feature
        #[arg(long)]
        values: bool,

        /// Print JSON
        #[arg(long)]
        json: bool,
    },
    /// Administer feature groups
    Group {
        #[command(subcommand)]
        action: GroupAction,
    },
    /// Set or remove a feature value for the hashes matching a query
    Set {
        /// Feature name
        #[arg(short, long)]
        name: String,

        /// Value to set
        #[arg(short, long)]
        value: String,

        /// Filter query
        query: Option<String>,

        /// Restrict to these hashes
        #[arg(long, num_args = 1..)]
        hashes: Vec<String>,

        /// Overwrite existing unique values
        #[arg(short, long)]
        force: bool,

        /// Remove the value instead of setting it
        #[arg(short, long)]
        remove: bool,

        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },
    /// Query the store
    Get {
        /// Filter query
        query: Option<String>,

        #[command(flatten)]
        select: SelectArgs,

        /// Feature to group results by
        #[arg(short, long, default_value = "hash")]
        group_by: String,

        /// Union with hashes read from stdin
        #[arg(long, conflicts_with = "intersection")]
        union: bool,

        /// Intersection with hashes read from stdin
        #[arg(long)]
        intersection: bool,
    },
    /// Resolve feature values for hashes
    Resolve {
        #[command(flatten)]
        select: SelectArgs,

        /// Keep only rows containing this substring
        #[arg(short, long)]
        pattern: Option<String>,
    },
    /// Run an external feature extractor over matching instances
    Extract {
        /// Filter query
        query: Option<String>,

        /// Restrict to these hashes
        #[arg(long, num_args = 1..)]
        hashes: Vec<String>,

        /// Extractor program, called as `program [args] <path>`
        #[arg(short, long)]
        program: PathBuf,

        /// Leading program arguments
        #[arg(long, num_args = 1.., allow_hyphen_values = true)]
        args: Vec<String>,

        /// Skip hashes that already have this feature
        #[arg(short, long)]
        target: Option<String>,
    },
}

#[derive(Args)]
struct SelectArgs {
    /// Features to resolve
    #[arg(short, long, num_args = 1..)]
    resolve: Vec<String>,

    /// Restrict to these hashes
    #[arg(long, num_args = 1..)]
    hashes: Vec<String>,

    /// Collapse function (group_concat, min, max)
    #[arg(short, long)]
    collapse: Option<String>,
}

#[derive(Subcommand)]
enum GroupAction {
    /// Create a feature group
    Create {
        /// Group name
        name: String,

        /// Default value; makes the group unique
        #[arg(short, long)]
        unique: Option<String>,
    },
    /// Remove a feature group
    Remove {
        /// Group name
        name: String,

        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },
    /// Delete all values of a feature group
    Clear {
        /// Group name
        name: String,

        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = AppConfig::load()?;
    if let Some(jobs) = cli.jobs {
        config.runner.jobs = jobs.max(1);
    }
    if let Some(tlim) = cli.tlim {
        config.runner.time_limit_secs = tlim;
    }
    if let Some(mlim) = cli.mlim {
        config.runner.memory_limit_mb = mlim;
    }

    // Initialize logging
    let _guard = init_logging(
        Some(&config.get_log_level()),
        config.logging.file_path.as_deref().map(Path::new),
        config.logging.format == "json",
    )?;
    metrics::describe();

    if let Commands::Hash { path } = &cli.command {
        let hash = Sha256Identity
            .identify(path)
            .with_context(|| format!("Failed to hash {}", path.display()))?;
        println!("{hash}");
        return Ok(());
    }

    let paths = if cli.db.is_empty() { vec![PathBuf::from(&config.database.path)] } else { cli.db.clone() };
    let mut api = BenchDb::open(&paths, config)
        .with_context(|| format!("Failed to open {}", display_paths(&paths)))?;
    info!(db = %display_paths(&paths), context = %api.context(), "opened store");

    match cli.command {
        Commands::Hash { .. } => {}
        Commands::Init { root, yes } => init_local(&mut api, &root, yes)?,
        Commands::Import { path, key, source, target } => {
            let count = api.import_csv(&path, &key, &source, &target)?;
            info!("Imported {} values into {}", count, target);
        }
        Commands::Info { name, values, json } => show_info(&api, name.as_deref(), values, json)?,
        Commands::Group { action } => administer_group(&mut api, action)?,
        Commands::Set { name, value, query, hashes, force, remove, yes } => {
            let hashes = api.hashes(query.as_deref(), &hashes)?;
            if remove {
                if confirm(&format!("Delete value '{value}' of '{name}' for {} hashes?", hashes.len()), yes)? {
                    let removed = api.remove_attribute(&name, &[value], &hashes)?;
                    info!("Removed {} values", removed);
                }
            } else {
                let written = api.set_attribute(&name, &value, &hashes, force)?;
                info!("Set {}={} for {} of {} hashes", name, value, written, hashes.len());
            }
        }
        Commands::Get { query, select, group_by, union, intersection } => {
            let collapse = parse_collapse(select.collapse.as_deref())?;
            let rows = api.query_search(query.as_deref(), &select.hashes, &select.resolve, collapse, &group_by)?;
            if union || intersection {
                combine_with_stdin(&rows, union)?;
            } else {
                print_rows(&rows)?;
            }
        }
        Commands::Resolve { select, pattern } => {
            let collapse = parse_collapse(select.collapse.as_deref())?;
            let rows = api.resolve(&select.hashes, &select.resolve, collapse, pattern.as_deref())?;
            print_rows(&rows)?;
        }
        Commands::Extract { query, hashes, program, args, target } => {
            let mut extractor = CommandExtractor::new(program, args);
            if let Some(target) = target {
                extractor = extractor.with_target(target);
            }
            let report = api.extract(query.as_deref(), &hashes, Arc::new(extractor))?;
            summarize(&report);
        }
    }

    Ok(())
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", ")
}

fn parse_collapse(name: Option<&str>) -> Result<Option<Collapse>> {
    name.map(str::parse::<Collapse>).transpose().context("Invalid collapse function")
}

/// Ask on stderr; `assume_yes` answers for the user.
fn confirm(question: &str, assume_yes: bool) -> Result<bool> {
    if assume_yes {
        return Ok(true);
    }
    eprint!("{question} [y/N] ");
    io::stderr().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    let accepted = matches!(answer.trim().to_lowercase().as_str(), "y" | "yes");
    if !accepted {
        warn!("Aborted, nothing changed");
    }
    Ok(accepted)
}

fn init_local(api: &mut BenchDb, root: &Path, yes: bool) -> Result<()> {
    let timer = OperationTimer::new("init local");
    let stale = api.stale_paths()?;
    if !stale.is_empty()
        && confirm(&format!("{} files not found. Remove stale entries?", stale.len()), yes)?
    {
        let removed = api.remove_paths(&stale)?;
        info!("Removed {} stale entries", removed);
    }

    let report = api.init_local(root, Sha256Identity)?;
    summarize(&report);
    timer.finish();
    Ok(())
}

fn summarize(report: &RunReport) {
    info!(
        completed = report.completed,
        skipped = report.skipped,
        lost = report.lost.len(),
        failed = report.failed.len(),
        timed_out = report.timed_out.len(),
        "Run finished"
    );
    for job in &report.lost {
        warn!("Worker lost while processing {}", job);
    }
    for (job, reason) in &report.failed {
        warn!("Failed {}: {}", job, reason);
    }
}

fn show_info(api: &BenchDb, name: Option<&str>, values: bool, json: bool) -> Result<()> {
    let mut out = io::stdout().lock();
    match name {
        Some(name) if values => {
            for value in api.feature_values(name)? {
                writeln!(out, "{value}")?;
            }
        }
        Some(name) => {
            let info = api.feature_info(name)?;
            if json {
                writeln!(out, "{}", serde_json::to_string_pretty(&info)?)?;
            } else {
                writeln!(out, "name: {}", info.name)?;
                writeln!(out, "table: {}", info.table)?;
                writeln!(out, "unique: {}", info.unique)?;
                writeln!(out, "default: {}", info.default.as_deref().unwrap_or("-"))?;
                writeln!(out, "virtual: {}", info.is_virtual)?;
                writeln!(out, "entries: {}", info.entries)?;
            }
        }
        None => {
            let info = api.database_info();
            if json {
                writeln!(out, "{}", serde_json::to_string_pretty(&info)?)?;
            } else {
                writeln!(out, "name: {}", info.name)?;
                writeln!(out, "context: {}", info.context)?;
                writeln!(out, "tables: {}", info.tables.join(" "))?;
                writeln!(out, "features: {}", info.features.join(" "))?;
            }
        }
    }
    Ok(())
}

fn administer_group(api: &mut BenchDb, action: GroupAction) -> Result<()> {
    match action {
        GroupAction::Create { name, unique } => {
            let created = api.create_feature(&name, unique.as_deref())?;
            for feature in created {
                info!("Created feature {} in table {}", feature.name, feature.table);
            }
        }
        GroupAction::Remove { name, yes } => {
            if !InputValidator::is_identifier(&name) || !api.feature_exists(&name) {
                anyhow::bail!("Group '{}' does not exist", name);
            }
            if confirm(&format!("Remove group '{name}' and all its values?"), yes)? {
                api.remove_feature(&name)?;
            }
        }
        GroupAction::Clear { name, yes } => {
            if confirm(&format!("Delete all values of '{name}'?"), yes)? {
                let cleared = api.clear_feature(&name)?;
                info!("Cleared {} values of {}", cleared, name);
            }
        }
    }
    Ok(())
}

fn print_rows(rows: &[Record]) -> Result<()> {
    let mut out = io::stdout().lock();
    for row in rows {
        let line: Vec<&str> = row.iter().map(|v| v.as_deref().unwrap_or("")).collect();
        writeln!(out, "{}", line.join(" "))?;
    }
    Ok(())
}

/// Combine the first column of `rows` with hashes read from stdin.
fn combine_with_stdin(rows: &[Record], union: bool) -> Result<()> {
    let queried: BTreeSet<String> = rows.iter().filter_map(|r| r.first().cloned().flatten()).collect();
    let mut piped = HashSet::new();
    for line in io::stdin().lock().lines() {
        piped.extend(line?.split_whitespace().map(str::to_string));
    }

    let combined: BTreeSet<String> = if union {
        queried.into_iter().chain(piped).collect()
    } else {
        queried.into_iter().filter(|h| piped.contains(h)).collect()
    };

    let mut out = io::stdout().lock();
    for hash in combined {
        writeln!(out, "{hash}")?;
    }
    Ok(())
}
