//! # grounded CLI
//!
//! ## Usage
//!
//! ```bash
//! grounded --config ./config/grounded.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `grounded init` | Create the SQLite database and run schema migrations |
//! | `grounded ingest <file>` | Upload a PDF, DOCX, or text file and embed it |
//! | `grounded status <id>` | Show a document's status and embedding progress |
//! | `grounded documents` | List documents |
//! | `grounded delete <id>` | Delete a document, its chunks, and its vectors |
//! | `grounded query "<question>"` | Answer a question from the indexed documents |
//! | `grounded serve` | Start the HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! grounded init
//! grounded ingest ./handbook.pdf --title "Employee Handbook" --wait
//! grounded query "How many vacation days do I get?" --top-k 8
//! grounded query "What changed in v2?" --document 3f2a... --json
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use grounded::commands::{self, IngestArgs, QueryArgs};
use grounded::progress::ProgressMode;
use grounded::{config, logging, migrate, server};

/// grounded: question answering over uploaded documents with explicit
/// confidence and sources.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/grounded.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "grounded",
    about = "grounded: retrieval-augmented question answering over your documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/grounded.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Upload a file and ingest it.
    ///
    /// Text is extracted immediately; chunking and embedding run in the
    /// background and finish before the command exits.
    Ingest {
        /// File to upload (.pdf, .docx, .txt, .md).
        file: PathBuf,

        /// Document title (defaults to the file name).
        #[arg(long)]
        title: Option<String>,

        /// Owner identity recorded on the document.
        #[arg(long)]
        owner: Option<String>,

        /// Content type, when the extension is not enough.
        #[arg(long)]
        content_type: Option<String>,

        /// Report progress and the final status.
        #[arg(long)]
        wait: bool,

        /// Progress output on stderr (default: human when stderr is a TTY).
        #[arg(long, value_enum)]
        progress: Option<ProgressArg>,
    },

    /// Show a document's status and embedding progress.
    Status {
        /// Document ID.
        id: String,
    },

    /// List documents, newest first.
    Documents,

    /// Delete a document with its chunks and vectors.
    Delete {
        /// Document ID.
        id: String,
    },

    /// Answer a question from the indexed documents.
    Query {
        /// The question.
        question: String,

        /// Number of chunks to retrieve (1-50).
        #[arg(long)]
        top_k: Option<usize>,

        /// Minimum best-match similarity for a grounded answer (0-1).
        #[arg(long)]
        threshold: Option<f32>,

        /// Restrict retrieval to one document ID.
        #[arg(long)]
        document: Option<String>,

        /// Print the full result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    Off,
    Human,
    Json,
}

impl From<ProgressArg> for ProgressMode {
    fn from(arg: ProgressArg) -> Self {
        match arg {
            ProgressArg::Off => ProgressMode::Off,
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            file,
            title,
            owner,
            content_type,
            wait,
            progress,
        } => {
            let args = IngestArgs {
                title,
                owner,
                content_type,
                wait,
                progress: progress
                    .map(ProgressMode::from)
                    .unwrap_or_else(ProgressMode::default_for_tty),
            };
            commands::run_ingest(&cfg, &file, args).await?;
        }
        Commands::Status { id } => {
            commands::run_status(&cfg, &id).await?;
        }
        Commands::Documents => {
            commands::run_documents(&cfg).await?;
        }
        Commands::Delete { id } => {
            commands::run_delete(&cfg, &id).await?;
        }
        Commands::Query {
            question,
            top_k,
            threshold,
            document,
            json,
        } => {
            let args = QueryArgs {
                top_k,
                threshold,
                document,
                json,
            };
            commands::run_query(&cfg, &question, args).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
