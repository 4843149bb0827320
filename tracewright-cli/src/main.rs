//! tracewright-cli: inspect, validate and publish curated agent traces.
//!
//! # Subcommands
//! - `analyze <FILE>`              static findings for a code file
//! - `validate <FILE>`             structural check of an exported conversation
//! - `execute <FILE>...`           run code files on the execution service
//! - `saved ...`                   manage the local saved-conversation store
//! - `push <ID> [--example ID]`    submit a saved conversation as an Example
//! - `examples ...`                browse and import remote Examples
//! - `tools ...`                   browse the tools catalog

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use tracewright_core::{
    analyze, CodeChunk, ConversationStore, EditingSession, ExamplesApi, Executor, HttpBackend,
    PersistedExample, SavedConversation, ToolInfo, ToolsCatalog, TracewrightConfig,
    TracewrightError, ValidationResult,
};

const DEFAULT_CONFIG: &str = "tracewright.toml";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "tracewright-cli", version, about = "Curate agent traces into Examples")]
struct Cli {
    /// Config file (TOML). Missing file means defaults plus env overrides.
    #[arg(long, env = "TRACEWRIGHT_CONFIG", default_value = DEFAULT_CONFIG)]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Report analyzer findings for a code file
    Analyze { file: PathBuf },

    /// Validate an exported saved-conversation JSON file
    Validate { file: PathBuf },

    /// Run code files on the execution service (several files go as one batch)
    Execute {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Manage locally saved conversations
    Saved {
        #[command(subcommand)]
        command: SavedCommand,
    },

    /// Validate a saved conversation and create it as an Example
    Push {
        id: String,
        /// Replace this existing Example instead of creating a new one
        #[arg(long)]
        example: Option<String>,
    },

    /// Browse remote Examples
    Examples {
        #[command(subcommand)]
        command: ExamplesCommand,
    },

    /// Browse the tools catalog
    Tools {
        #[command(subcommand)]
        command: ToolsCommand,
    },
}

#[derive(Debug, Subcommand)]
enum SavedCommand {
    List,
    Show {
        id: String,
    },
    Remove {
        id: String,
    },
    Export {
        id: String,
        /// Target directory
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },
    Import {
        file: PathBuf,
    },
}

#[derive(Debug, Subcommand)]
enum ExamplesCommand {
    List,
    Get { id: String },
    ImportMarkdown { path: String },
}

#[derive(Debug, Subcommand)]
enum ToolsCommand {
    List,
    Schema { name: String },
}

/// Whether a command's check passed. Failed checks exit with status 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Pass,
    Fail,
}

// ============================================================================
// Rendering
// ============================================================================

fn render_findings(result: &ValidationResult) -> Vec<String> {
    let mut lines = Vec::new();
    for e in &result.syntax_errors {
        lines.push(format!("error: line {}: {}", e.line, e.message));
    }
    for e in &result.errors {
        lines.push(format!("error: {}", e));
    }
    for w in &result.warnings {
        lines.push(format!("warning: {}", w));
    }
    lines
}

fn render_saved_row(saved: &SavedConversation) -> String {
    format!(
        "{}  {}  ({} turns, updated {})",
        saved.id,
        saved.name,
        saved.messages.len(),
        saved.updated_at.format("%Y-%m-%d %H:%M")
    )
}

fn render_example_row(example: &PersistedExample) -> String {
    let tags = if example.tags.is_empty() {
        String::new()
    } else {
        format!(" [{}]", example.tags.join(", "))
    };
    format!(
        "{}  {}{}  ({} steps)",
        example.id,
        example.name,
        tags,
        example.steps.len()
    )
}

fn render_tool_row(tool: &ToolInfo) -> String {
    let functions: Vec<&str> = tool.functions.iter().map(|f| f.name.as_str()).collect();
    if functions.is_empty() {
        format!("{}  {}", tool.name, tool.description)
    } else {
        format!("{}  {}  ({})", tool.name, tool.description, functions.join(", "))
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), TracewrightError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ============================================================================
// Commands
// ============================================================================

fn do_analyze(file: &Path) -> Result<Verdict, TracewrightError> {
    let code = std::fs::read_to_string(file)?;
    let result = analyze(&code);
    for line in render_findings(&result) {
        println!("{}", line);
    }
    if result.is_valid {
        println!("{}: ok", file.display());
        Ok(Verdict::Pass)
    } else {
        Ok(Verdict::Fail)
    }
}

fn do_validate(file: &Path, default_tool_name: &str) -> Result<Verdict, TracewrightError> {
    let raw = std::fs::read_to_string(file)?;
    let saved: SavedConversation = serde_json::from_str(&raw)?;

    let mut session = EditingSession::new(default_tool_name);
    session.load_conversation(saved);
    let violations = session.violations();
    if violations.is_empty() {
        println!("{}: valid", file.display());
        return Ok(Verdict::Pass);
    }
    for v in &violations {
        println!("{}", v);
    }
    Ok(Verdict::Fail)
}

async fn do_execute(files: &[PathBuf], backend: &HttpBackend) -> Result<Verdict, TracewrightError> {
    let mut chunks = Vec::with_capacity(files.len());
    let mut verdict = Verdict::Pass;
    for file in files {
        let code = std::fs::read_to_string(file)?;
        let findings = analyze(&code);
        if !findings.is_valid {
            eprintln!("{}: not executed", file.display());
            for line in render_findings(&findings) {
                eprintln!("  {}", line);
            }
            verdict = Verdict::Fail;
            continue;
        }
        chunks.push(CodeChunk {
            chunk_id: file.display().to_string(),
            code,
        });
    }

    let outputs = match chunks.as_slice() {
        [] => Vec::new(),
        [single] => vec![(single.chunk_id.clone(), backend.execute(&single.code).await?)],
        _ => backend
            .execute_batch(&chunks)
            .await?
            .into_iter()
            .map(|r| (r.chunk_id, r.output))
            .collect(),
    };

    for (label, output) in outputs {
        match output.into_result_text() {
            Ok(text) => println!("{}:\n{}", label, text),
            Err(failure) => {
                eprintln!("{}: {}", label, failure.message);
                verdict = Verdict::Fail;
            }
        }
    }
    Ok(verdict)
}

fn do_saved(command: SavedCommand, store: &ConversationStore) -> Result<Verdict, TracewrightError> {
    match command {
        SavedCommand::List => {
            let conversations = store.list()?;
            if conversations.is_empty() {
                eprintln!("No saved conversations in {}", store.path().display());
            }
            for saved in &conversations {
                println!("{}", render_saved_row(saved));
            }
        }
        SavedCommand::Show { id } => print_json(&store.get(&id)?)?,
        SavedCommand::Remove { id } => {
            let removed = store.remove(&id)?;
            println!("Removed {} ({})", removed.id, removed.name);
        }
        SavedCommand::Export { id, dir } => {
            let path = store.export(&id, &dir)?;
            println!("{}", path.display());
        }
        SavedCommand::Import { file } => {
            let saved = store.import(&file)?;
            println!("Imported as {}", saved.id);
        }
    }
    Ok(Verdict::Pass)
}

async fn do_push(
    id: &str,
    existing: Option<&str>,
    store: &ConversationStore,
    backend: &HttpBackend,
    default_tool_name: &str,
) -> Result<Verdict, TracewrightError> {
    let mut session = EditingSession::new(default_tool_name);
    session.load_conversation(store.get(id)?);

    match session.submit(backend, existing).await {
        Ok(example) => {
            tracing::info!(saved_id = %id, example_id = %example.id, "Saved conversation pushed");
            println!("Pushed example {}", example.id);
            Ok(Verdict::Pass)
        }
        Err(TracewrightError::Session(e)) => {
            eprintln!("{}", e);
            for v in session.violations() {
                eprintln!("  {}", v);
            }
            Ok(Verdict::Fail)
        }
        Err(e) => Err(e),
    }
}

async fn do_examples(command: ExamplesCommand, backend: &HttpBackend) -> Result<Verdict, TracewrightError> {
    match command {
        ExamplesCommand::List => {
            for example in backend.list_examples().await? {
                println!("{}", render_example_row(&example));
            }
        }
        ExamplesCommand::Get { id } => print_json(&backend.get_example(&id).await?)?,
        ExamplesCommand::ImportMarkdown { path } => {
            let example = backend.import_markdown(&path).await?;
            println!("Imported example {}", example.id);
        }
    }
    Ok(Verdict::Pass)
}

async fn do_tools(command: ToolsCommand, backend: &HttpBackend) -> Result<Verdict, TracewrightError> {
    match command {
        ToolsCommand::List => {
            for tool in backend.list_tools().await? {
                println!("{}", render_tool_row(&tool));
            }
        }
        ToolsCommand::Schema { name } => print_json(&backend.tool_schema(&name).await?)?,
    }
    Ok(Verdict::Pass)
}

async fn run(command: Commands, config: &TracewrightConfig) -> Result<Verdict, TracewrightError> {
    let tool_name = config.editor.default_tool_name.as_str();
    match command {
        Commands::Analyze { file } => do_analyze(&file),
        Commands::Validate { file } => do_validate(&file, tool_name),
        Commands::Execute { files } => {
            let backend = HttpBackend::new(config.backend.clone())?;
            do_execute(&files, &backend).await
        }
        Commands::Saved { command } => do_saved(command, &ConversationStore::from_config(&config.store)),
        Commands::Push { id, example } => {
            let store = ConversationStore::from_config(&config.store);
            let backend = HttpBackend::new(config.backend.clone())?;
            do_push(&id, example.as_deref(), &store, &backend, tool_name).await
        }
        Commands::Examples { command } => {
            let backend = HttpBackend::new(config.backend.clone())?;
            do_examples(command, &backend).await
        }
        Commands::Tools { command } => {
            let backend = HttpBackend::new(config.backend.clone())?;
            do_tools(command, &backend).await
        }
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let config = TracewrightConfig::load(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config))?;

    // RUST_LOG wins over the configured level. Logs go to stderr so stdout
    // stays clean for JSON output.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.service.log_level));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    match run(cli.command, &config).await? {
        Verdict::Pass => Ok(()),
        Verdict::Fail => std::process::exit(1),
    }
}

// ============================================================================
// Tests
// ============================================================================
