//! Crossing reconciliation CLI
//!
//! Command-line tool for scanning a document directory, resolving duplicated
//! crossing markers and writing canonical values back.

use clap::{Parser, Subcommand, ValueEnum};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use xing_core::{
    csv_io, ApplyHistory, ApplyReport, Config, ConflictGroup, DocumentStore, Error, FileStore,
    FirstDiscovered, GroupState, Placement, RegionId, Resolution, Session, Stage,
};

#[derive(Parser)]
#[command(name = "xing")]
#[command(about = "Crossing record reconciliation", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to a YAML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a document and list its crossings
    Scan {
        /// Document directory
        #[arg(short, long)]
        doc: PathBuf,
    },

    /// Show fields whose instances disagree
    Conflicts {
        /// Document directory
        #[arg(short, long)]
        doc: PathBuf,
    },

    /// Resolve duplicates and write canonical values back
    Reconcile {
        /// Document directory
        #[arg(short, long)]
        doc: PathBuf,

        /// Ask which instance wins for each conflicted crossing
        #[arg(short, long)]
        interactive: bool,
    },

    /// Number every crossing by its position
    Renumber {
        /// Document directory
        #[arg(short, long)]
        doc: PathBuf,
    },

    /// Place a new crossing
    Insert {
        /// Document directory
        #[arg(short, long)]
        doc: PathBuf,

        /// Region (sheet) name to place the marker in
        #[arg(short, long)]
        region: String,

        /// 1-based position; appends when omitted
        #[arg(long)]
        at: Option<usize>,

        #[arg(long, default_value_t = 0.0)]
        x: f64,

        #[arg(long, default_value_t = 0.0)]
        y: f64,
    },

    /// Delete a crossing and all its markers
    Delete {
        /// Document directory
        #[arg(short, long)]
        doc: PathBuf,

        /// Crossing code to delete
        #[arg(short, long)]
        code: String,
    },

    /// Merge crossing rows from a CSV file
    Import {
        /// Document directory
        #[arg(short, long)]
        doc: PathBuf,

        /// CSV file to import
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Export crossings to a CSV file
    Export {
        /// Document directory
        #[arg(short, long)]
        doc: PathBuf,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Create a summary table from the current crossings
    CreateTable {
        /// Document directory
        #[arg(short, long)]
        doc: PathBuf,

        /// Region (sheet) name to place the table in
        #[arg(short, long)]
        region: String,

        #[arg(short, long, value_enum, default_value_t = TableChoice::Page)]
        kind: TableChoice,

        /// Only include crossings with this drawing reference
        #[arg(long)]
        dwg_ref: Option<String>,

        #[arg(long, default_value_t = 0.0)]
        x: f64,

        #[arg(long, default_value_t = 0.0)]
        y: f64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum TableChoice {
    Page,
    LatLong,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "xing=debug,xing_core=debug"
    } else {
        "xing=info,xing_core=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn run(cli: Cli) -> xing_core::Result<()> {
    let config = Config::load(cli.config)?;
    tracing::debug!("config: {:?}", config);

    match cli.command {
        Commands::Scan { doc } => cmd_scan(&doc, config),
        Commands::Conflicts { doc } => cmd_conflicts(&doc, config),
        Commands::Reconcile { doc, interactive } => cmd_reconcile(&doc, config, interactive),
        Commands::Renumber { doc } => cmd_renumber(&doc, config),
        Commands::Insert {
            doc,
            region,
            at,
            x,
            y,
        } => cmd_insert(&doc, config, &region, at, x, y),
        Commands::Delete { doc, code } => cmd_delete(&doc, config, &code),
        Commands::Import { doc, file } => cmd_import(&doc, config, &file),
        Commands::Export { doc, output } => cmd_export(&doc, config, &output),
        Commands::CreateTable {
            doc,
            region,
            kind,
            dwg_ref,
            x,
            y,
        } => cmd_create_table(&doc, config, &region, kind, dwg_ref.as_deref(), x, y),
    }
}

/// Open the document directory and scan it
fn open_session(doc: &Path, config: Config) -> xing_core::Result<Session<FileStore>> {
    let store = FileStore::open(doc, &config.marker_kind)?;
    let history = ApplyHistory::load(doc.join(&config.history_file))?;

    let mut session = Session::open(store, config).with_history(history);
    let stats = session.scan()?;
    if stats.skipped > 0 {
        println!("Skipped {} unreadable marker(s)", stats.skipped);
    }
    Ok(session)
}

/// Apply the session and persist its history next to the document
fn apply_and_record(session: &mut Session<FileStore>) -> xing_core::Result<ApplyReport> {
    let report = session.apply()?;
    record_history(session)?;
    print_apply(&report);
    Ok(report)
}

fn record_history(session: &Session<FileStore>) -> xing_core::Result<()> {
    let path = session.store().root().join(&session.config().history_file);
    session.history().save(path)
}

fn print_apply(report: &ApplyReport) {
    println!(
        "Wrote {} record(s) to {} marker(s); {} table(s) synced, {} cell(s) updated",
        report.records,
        report.instances_written,
        report.sync.tables_synced,
        report.sync.cells_written
    );
    if report.sync.unknown_tables > 0 {
        println!("Left {} unrecognized table(s) untouched", report.sync.unknown_tables);
    }
}

fn find_region(store: &FileStore, name: &str, stage: Stage) -> xing_core::Result<RegionId> {
    let to_error = |source| Error::Store { stage, source };
    for region in store.regions().map_err(to_error)? {
        if store.region_name(region).map_err(to_error)?.eq_ignore_ascii_case(name.trim()) {
            return Ok(region);
        }
    }
    Err(Error::NotFound(format!("region '{}'", name)))
}

fn cmd_scan(doc: &Path, config: Config) -> xing_core::Result<()> {
    let session = open_session(doc, config)?;

    println!("Crossings ({}):", session.records().len());
    println!();
    for record in session.records() {
        let state = match record.state {
            GroupState::Unanimous => "",
            GroupState::Conflicted => " [conflicted]",
            GroupState::Resolved => " [resolved]",
        };
        println!(
            "  {:<8} {} instance(s){}  {}",
            record.code(),
            record.all_instances.len(),
            state,
            record.fields.owner
        );
    }

    Ok(())
}

fn cmd_conflicts(doc: &Path, config: Config) -> xing_core::Result<()> {
    let session = open_session(doc, config)?;
    let conflicts = session.conflicts();

    if conflicts.is_empty() {
        println!("No conflicts");
        return Ok(());
    }

    println!("Conflicts ({}):", conflicts.len());
    for conflict in &conflicts {
        println!();
        println!("{} / {}", conflict.crossing_key, conflict.field);
        for (value, instances) in conflict.distinct_values() {
            let spaces: Vec<&str> = instances
                .iter()
                .filter_map(|i| session.contexts().get(i))
                .map(|c| c.space_name.as_str())
                .collect();
            println!("  {:?} in {}", value, spaces.join(", "));
        }
    }

    Ok(())
}

fn cmd_reconcile(doc: &Path, config: Config, interactive: bool) -> xing_core::Result<()> {
    let mut session = open_session(doc, config)?;

    let summary = if interactive {
        session.resolve(&mut prompt_resolution)?
    } else {
        session.resolve(&mut FirstDiscovered)?
    };
    println!(
        "Resolved {} crossing(s) ({} unanimous)",
        summary.decided + summary.unanimous,
        summary.unanimous
    );

    apply_and_record(&mut session)?;
    Ok(())
}

/// Ask on stdin which instance wins; `q` or end of input aborts
fn prompt_resolution(group: &ConflictGroup<'_>) -> Option<Resolution> {
    println!();
    println!("Crossing {} has conflicting values:", group.record.code());
    for conflict in &group.conflicts {
        println!("  {}", conflict.field);
        for (value, _) in conflict.distinct_values() {
            println!("    {:?}", value);
        }
    }
    println!("Keep values from:");
    for (n, context) in group.instances.iter().enumerate() {
        println!("  {}) {} ({})", n + 1, context.space_name, context.instance);
    }

    let stdin = io::stdin();
    loop {
        print!("Choice [1-{}, q to abort]: ", group.instances.len());
        io::stdout().flush().ok()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line).ok()? == 0 {
            return None;
        }

        let answer = line.trim();
        if answer.eq_ignore_ascii_case("q") {
            return None;
        }
        match answer.parse::<usize>() {
            Ok(n) if (1..=group.instances.len()).contains(&n) => {
                return Some(Resolution::TakeInstance(group.instances[n - 1].instance));
            }
            _ => println!("Enter a number between 1 and {}", group.instances.len()),
        }
    }
}

fn cmd_renumber(doc: &Path, config: Config) -> xing_core::Result<()> {
    let mut session = open_session(doc, config)?;
    session.ensure_resolved()?;

    let changed = session.renumber();
    println!("Renumbered {} crossing(s)", changed);
    apply_and_record(&mut session)?;
    Ok(())
}

fn cmd_insert(
    doc: &Path,
    config: Config,
    region: &str,
    at: Option<usize>,
    x: f64,
    y: f64,
) -> xing_core::Result<()> {
    let mut session = open_session(doc, config)?;
    session.ensure_resolved()?;

    let region = find_region(session.store(), region, Stage::Insert)?;
    let placement = Placement::new(region, x, y);
    let index = at.map_or(session.records().len(), |position| position.saturating_sub(1));
    let report = match at {
        Some(_) => session.insert_at(index, &placement)?,
        None => session.append(&placement)?,
    };

    println!("Inserted {}", session.records()[index].code());
    record_history(&session)?;
    print_apply(&report);
    Ok(())
}

fn cmd_delete(doc: &Path, config: Config, code: &str) -> xing_core::Result<()> {
    let mut session = open_session(doc, config)?;
    session.ensure_resolved()?;

    let (removed, report) = session.delete_code(code)?;
    println!(
        "Deleted {} ({} marker(s))",
        removed.code(),
        removed.all_instances.len()
    );
    record_history(&session)?;
    print_apply(&report);
    Ok(())
}

fn cmd_import(doc: &Path, config: Config, file: &Path) -> xing_core::Result<()> {
    let rows = csv_io::read_records(file)?;
    let mut session = open_session(doc, config)?;
    session.ensure_resolved()?;

    let report = session.merge_imported(rows);
    println!(
        "Imported {}: {} updated, {} new, {} ignored",
        file.display(),
        report.updated.len(),
        report.appended.len(),
        report.ignored
    );
    if !report.appended.is_empty() {
        println!("New crossings have no markers yet: {}", report.appended.join(", "));
    }

    apply_and_record(&mut session)?;
    Ok(())
}

fn cmd_export(doc: &Path, config: Config, output: &Path) -> xing_core::Result<()> {
    let session = open_session(doc, config)?;
    csv_io::write_records(output, session.records())?;

    println!(
        "Exported {} crossing(s) to {}",
        session.records().len(),
        output.display()
    );
    Ok(())
}

fn cmd_create_table(
    doc: &Path,
    config: Config,
    region: &str,
    kind: TableChoice,
    dwg_ref: Option<&str>,
    x: f64,
    y: f64,
) -> xing_core::Result<()> {
    let mut session = open_session(doc, config)?;
    session.ensure_resolved()?;

    let region = find_region(session.store(), region, Stage::CreateTable)?;
    let placement = Placement::new(region, x, y);
    let table = match kind {
        TableChoice::Page => session.create_page_table(dwg_ref, &placement)?,
        TableChoice::LatLong => session.create_lat_long_table(&placement)?,
    };

    println!("Created {}", table);
    Ok(())
}
