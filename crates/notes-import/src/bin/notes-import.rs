//! Command-line import client
//!
//! Uploads one document to a running import server, polls until the import
//! finishes and writes the resulting notes into a local note database.
//!
//! Run with: cargo run -p notes-import --bin notes-import -- deck.pptx --mode pages

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use notes_import::{
    client::{run_import, ImportClient, ImportOutcome, PollPolicy, SqliteNoteStore},
    ImportMode, ImportOptions,
};
use tracing_subscriber::EnvFilter;

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    /// All slides in one note
    Single,
    /// One note per slide
    Pages,
    /// One note, slides separated by horizontal rules
    Slides,
}

impl From<ModeArg> for ImportMode {
    fn from(v: ModeArg) -> Self {
        match v {
            ModeArg::Single => ImportMode::Single,
            ModeArg::Pages => ImportMode::Pages,
            ModeArg::Slides => ImportMode::Slides,
        }
    }
}

/// Import a PPTX or PDF document into local notes.
#[derive(Parser, Debug)]
#[command(name = "notes-import", version, arg_required_else_help = true)]
struct Cli {
    /// Document to import (.pptx or .pdf)
    file: PathBuf,

    /// Request OCR for scanned documents
    #[arg(long)]
    ocr: bool,

    /// How slides are grouped into notes
    #[arg(long, value_enum, default_value = "single")]
    mode: ModeArg,

    /// Import server base URL
    #[arg(long, env = "NOTES_IMPORT_SERVER", default_value = "http://localhost:4000")]
    server: String,

    /// Bearer token for the import server
    #[arg(long, env = "NOTES_IMPORT_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Local note database
    #[arg(long, env = "NOTES_IMPORT_DB")]
    notes_db: Option<PathBuf>,

    /// Wait between status requests
    #[arg(long, default_value_t = 1200)]
    interval_ms: u64,

    /// Status requests before giving up
    #[arg(long, default_value_t = 250)]
    max_attempts: u32,

    /// Overall time budget for the import
    #[arg(long, default_value_t = 300)]
    deadline_secs: u64,

    /// Failed status requests tolerated in a row
    #[arg(long, default_value_t = 0)]
    transport_retries: u32,

    /// Hide the progress bar
    #[arg(long)]
    no_progress: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn default_notes_db() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("notes-import")
        .join("notes.db")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "notes_import=debug" } else { "notes_import=warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let notes_db = cli.notes_db.clone().unwrap_or_else(default_notes_db);
    let store = SqliteNoteStore::open(&notes_db)
        .with_context(|| format!("Failed to open note database {}", notes_db.display()))?;

    let mut client = ImportClient::new(&cli.server)?;
    if let Some(token) = &cli.token {
        client = client.with_token(token);
    }

    let options = ImportOptions {
        ocr: cli.ocr,
        mode: cli.mode.into(),
    };
    let policy = PollPolicy {
        interval: Duration::from_millis(cli.interval_ms),
        max_attempts: cli.max_attempts,
        deadline: Duration::from_secs(cli.deadline_secs),
        transport_retries: cli.transport_retries,
    };

    let bar = if cli.no_progress {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(100)
    };
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold} [{bar:30.cyan/blue}] {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    bar.set_prefix(
        cli.file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default(),
    );
    bar.set_message("uploading");
    bar.enable_steady_tick(Duration::from_millis(120));

    let outcome = run_import(&client, &store, &cli.file, options, &policy, |snapshot| {
        bar.set_position(snapshot.progress as u64);
        bar.set_message(snapshot.status.as_str());
    })
    .await;

    bar.finish_and_clear();

    match outcome {
        ImportOutcome::Created(notes) => {
            println!(
                "{} Imported {} note{} into {}",
                style("✓").green().bold(),
                notes.len(),
                if notes.len() == 1 { "" } else { "s" },
                notes_db.display()
            );
            for note in &notes {
                println!("  {} {}", style(&note.id).dim(), note.title);
            }
            Ok(())
        }
        ImportOutcome::Failed(message) => bail!("Import failed: {}", message),
        ImportOutcome::TimedOut => bail!(
            "Import did not finish within {}s / {} status checks",
            cli.deadline_secs,
            cli.max_attempts
        ),
        ImportOutcome::TransportError(message) => {
            bail!("Could not reach import server {}: {}", cli.server, message)
        }
    }
}
