//! # tabula
//!
//! Command-line front end for the table agents: an interactive chat with the
//! Table Agent, offline script execution, table descriptions, and replay of
//! recorded conversations.

#![deny(unsafe_code)]

mod files;

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use futures::StreamExt;
use tabula_core::{AgentEvent, QueryInput, Table, TableSet};
use tabula_llm::openai::{OpenAiConfig, OpenAiProvider};
use tabula_llm::{Provider, RetryConfig, RetryingProvider};
use tabula_runtime::orchestrator::recorded_table_keys;
use tabula_runtime::{AgentConfig, Recording, TableAgent, UserQuery, call_agent, record, replay};
use tabula_sandbox::{Limits, Sandbox};
use tabula_settings::{TabulaSettings, get_settings};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use files::{load_tables, parse_table_arg, write_figures, write_tables};

/// Ask questions about CSV tables and let the agents transform and plot them.
#[derive(Parser, Debug)]
#[command(name = "tabula", version, about)]
struct Cli {
    /// Log as JSON lines instead of compact text.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Chat with the Table Agent; each stdin line is one request.
    Chat {
        /// Input table as NAME=PATH.csv (repeatable).
        #[arg(long = "table", value_parser = parse_table_arg, required = true)]
        tables: Vec<(String, PathBuf)>,
        /// Model name (overrides settings).
        #[arg(long)]
        model: Option<String>,
        /// Sampling temperature (overrides settings).
        #[arg(long)]
        temperature: Option<f64>,
        /// Write produced tables and figures here after every turn.
        #[arg(long)]
        output_dir: Option<PathBuf>,
        /// Write a replayable recording here on exit.
        #[arg(long)]
        record: Option<PathBuf>,
    },
    /// Run a table script without the LLM.
    RunScript {
        /// Input table as NAME=PATH.csv (repeatable).
        #[arg(long = "table", value_parser = parse_table_arg, required = true)]
        tables: Vec<(String, PathBuf)>,
        /// What the script produces.
        #[arg(long, value_enum, default_value_t = ScriptKind::Transform)]
        kind: ScriptKind,
        /// Script file.
        script: PathBuf,
    },
    /// Print the structure of a CSV table.
    Describe {
        /// CSV file.
        path: PathBuf,
    },
    /// Re-run a recorded conversation against (possibly new) tables.
    Replay {
        /// Recording written by `chat --record`.
        #[arg(long)]
        recording: PathBuf,
        /// Input table as NAME=PATH.csv (repeatable).
        #[arg(long = "table", value_parser = parse_table_arg)]
        tables: Vec<(String, PathBuf)>,
        /// Write produced tables and figures here.
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
}

/// Output of a script run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ScriptKind {
    /// One table in `df`, defines `transformed_df`.
    Transform,
    /// Tables in `tables`, defines `result_tables`.
    Multi,
    /// One table in `df`, defines `fig`.
    Plot,
}

fn sandbox(settings: &TabulaSettings) -> Sandbox {
    Sandbox::new(Limits {
        max_steps: settings.sandbox.max_steps,
        max_rows: settings.sandbox.max_rows,
        max_depth: settings.sandbox.max_depth,
    })
}

fn provider(settings: &TabulaSettings) -> Result<Arc<dyn Provider>> {
    let config = OpenAiConfig::from_settings(&settings.openai)
        .context("Failed to configure the OpenAI provider")?;
    let inner = OpenAiProvider::new(config).context("Failed to create the OpenAI provider")?;
    Ok(Arc::new(RetryingProvider::new(
        inner,
        RetryConfig::from(&settings.retry),
    )))
}

fn print_event(out: &mut impl std::io::Write, event: &AgentEvent) -> Result<()> {
    serde_json::to_writer(&mut *out, event)?;
    writeln!(out)?;
    Ok(())
}

fn only_table(tables: &TableSet) -> Result<Arc<Table>> {
    match tables.values().next() {
        Some(table) if tables.len() == 1 => Ok(Arc::clone(table)),
        _ => bail!("this script kind needs exactly one --table, got {}", tables.len()),
    }
}

/// Run `code` and render its output: CSV for tables, Plotly JSON for figures.
fn run_script(sandbox: Sandbox, kind: ScriptKind, code: &str, tables: TableSet) -> Result<String> {
    match kind {
        ScriptKind::Transform => {
            let table = sandbox.transform_table(code, only_table(&tables)?)?;
            Ok(table.to_csv_string()?)
        }
        ScriptKind::Multi => {
            let produced = sandbox.transform_tables(code, tables)?;
            let mut out = String::new();
            for (name, table) in &produced {
                out.push_str(&format!("# {name}\n{}\n", table.to_csv_string()?));
            }
            Ok(out)
        }
        ScriptKind::Plot => {
            let figure = sandbox.plot(code, only_table(&tables)?)?;
            Ok(serde_json::to_string_pretty(figure.as_ref())?)
        }
    }
}

fn write_agent_outputs(dir: &Path, agent: &TableAgent) -> Result<()> {
    let tables = write_tables(dir, &agent.output_tables())?;
    let figures = write_figures(dir, &agent.output_figures())?;
    info!(tables = tables.len(), figures = figures.len(), dir = %dir.display(), "outputs written");
    Ok(())
}

async fn chat(
    settings: &TabulaSettings,
    tables: TableSet,
    model: Option<String>,
    temperature: Option<f64>,
    output_dir: Option<PathBuf>,
    record_path: Option<PathBuf>,
) -> Result<()> {
    let mut config = AgentConfig::from(&settings.agent);
    if let Some(model) = model {
        config.model = model;
    }
    if let Some(temperature) = temperature {
        config.temperature = temperature;
    }
    let mut agent = TableAgent::new(provider(settings)?, config, sandbox(settings), tables);
    info!(agent_id = %agent.id(), "table agent ready");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = std::io::stdout();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let input = QueryInput::Tables {
            tables: agent.available_tables(),
            output_table_names: None,
        };
        let (mut events, handle) = call_agent(
            agent,
            UserQuery::new(line, input),
            settings.agent.event_buffer_size,
        );
        while let Some(event) = events.next().await {
            print_event(&mut stdout, &event)?;
        }
        let (returned, result) = handle.finish().await?;
        agent = returned;
        let summary = result?;
        info!(state = %summary.state, turns = summary.turns, "turn finished");

        if let Some(dir) = &output_dir {
            write_agent_outputs(dir, &agent)?;
        }
    }

    if let Some(path) = record_path {
        std::fs::write(&path, record(&agent).to_json()?)
            .with_context(|| format!("Failed to write recording {}", path.display()))?;
        info!(path = %path.display(), "recording written");
    }
    Ok(())
}

async fn replay_recording(
    settings: &TabulaSettings,
    recording_path: &Path,
    tables: TableSet,
    output_dir: Option<PathBuf>,
) -> Result<()> {
    let json = std::fs::read_to_string(recording_path)
        .with_context(|| format!("Failed to read recording {}", recording_path.display()))?;
    let recording = Recording::from_json(&json)?;
    for key in recorded_table_keys(&recording) {
        if !tables.contains_key(&key) {
            warn!(table = %key, "recorded input table not supplied");
        }
    }

    let output = replay(&recording, tables, sandbox(settings)).await?;
    let mut stdout = std::io::stdout();
    for event in &output.events {
        print_event(&mut stdout, event)?;
    }
    match output_dir {
        Some(dir) => {
            let _ = write_tables(&dir, &output.tables)?;
            let _ = write_figures(&dir, &output.figures)?;
        }
        None => {
            for (name, table) in &output.tables {
                writeln!(stdout, "# {name}\n{}", table.to_csv_string()?)?;
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = get_settings();
    if cli.log_json {
        tabula_core::init_json_subscriber(&settings.logging.level);
    } else {
        tabula_core::init_subscriber(&settings.logging.level);
    }

    match cli.command {
        Command::Chat {
            tables,
            model,
            temperature,
            output_dir,
            record,
        } => {
            let tables = load_tables(&tables)?;
            chat(settings, tables, model, temperature, output_dir, record).await
        }
        Command::RunScript {
            tables,
            kind,
            script,
        } => {
            let code = std::fs::read_to_string(&script)
                .with_context(|| format!("Failed to read script {}", script.display()))?;
            let output = run_script(sandbox(settings), kind, &code, load_tables(&tables)?)?;
            println!("{output}");
            Ok(())
        }
        Command::Describe { path } => {
            let table = Table::from_csv_path(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            println!("{}", table.describe());
            Ok(())
        }
        Command::Replay {
            recording,
            tables,
            output_dir,
        } => {
            let tables = load_tables(&tables)?;
            replay_recording(settings, &recording, tables, output_dir).await
        }
    }
}
