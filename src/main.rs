//! modekey - replay vi key notation against a text
//!
//! This is the command-line entry point around the engine.

#![deny(warnings)]

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use serde::Serialize;
use tracing::debug;

use modekey::event_log::LogEntry;
use modekey::{logging, script, EditorHost, EngineContext, Feedback, KeySequence, Mode, StringBuffer};

/// modekey - modal key resolution for vi-style editors
#[derive(Parser, Debug)]
#[command(name = "modekey")]
#[command(about = "Replay vi key notation against a text", long_about = None)]
struct Cli {
    /// Log engine decisions to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Feed keys to a session and print the resulting text
    Run {
        /// Keys in notation, e.g. "d2w" or "ifoo<Esc>"
        keys: String,
        /// Text to edit; read from stdin when neither this nor --file is given
        #[arg(short, long, conflicts_with = "file")]
        text: Option<String>,
        /// File whose contents to edit (the file is not written)
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Initial caret offsets
        #[arg(short, long, value_delimiter = ',')]
        carets: Vec<usize>,
        /// Configuration script to run instead of the default modekeyrc
        #[arg(long, conflicts_with = "no_rc")]
        rc: Option<PathBuf>,
        /// Skip the configuration script
        #[arg(long)]
        no_rc: bool,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
        /// Also print the session's command log
        #[arg(long)]
        log: bool,
    },
    /// Print key notation in normalized form
    Keys {
        /// Keys in notation
        notation: String,
    },
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

/// What `run --json` prints
#[derive(Serialize)]
struct RunOutput<'a> {
    text: &'a str,
    carets: &'a [usize],
    mode: &'a Mode,
    feedback: Feedback,
    pending: String,
    last_change: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    log: Vec<&'a LogEntry>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match cli.command {
        Commands::Run {
            keys,
            text,
            file,
            carets,
            rc,
            no_rc,
            json,
            log,
        } => {
            let text = read_text(text, file.as_deref())?;
            let engine = EngineContext::new();
            if !no_rc {
                load_rc(&engine, rc)?;
            }
            run_keys(&engine, text, &carets, &keys, json, log)
        }
        Commands::Keys { notation } => {
            let keys = KeySequence::parse(&notation)
                .with_context(|| format!("invalid key notation: {}", notation))?;
            println!("{}", keys);
            Ok(())
        }
        Commands::Completions { shell } => {
            print_completions(shell);
            Ok(())
        }
    }
}

fn read_text(text: Option<String>, file: Option<&Path>) -> Result<String> {
    if let Some(text) = text {
        return Ok(text);
    }
    if let Some(path) = file {
        return fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()));
    }
    let mut text = String::new();
    io::stdin()
        .read_to_string(&mut text)
        .context("failed to read text from stdin")?;
    Ok(text)
}

/// Run the configuration script. An explicit `--rc` must exist; the default
/// one is optional.
fn load_rc(engine: &EngineContext, rc: Option<PathBuf>) -> Result<()> {
    let path = match rc {
        Some(path) => path,
        None => match script::default_rc_path() {
            Some(path) if path.exists() => path,
            _ => {
                debug!("no configuration script");
                return Ok(());
            }
        },
    };

    let report = script::run_file(engine, &path)?;
    for error in &report.errors {
        eprintln!("{}:{}: {}", path.display(), error.line, error.error);
    }
    Ok(())
}

fn run_keys(
    engine: &EngineContext,
    text: String,
    carets: &[usize],
    keys: &str,
    json: bool,
    log: bool,
) -> Result<()> {
    for &caret in carets {
        if caret > text.len() || !text.is_char_boundary(caret) {
            bail!("caret {} is not a character offset in the text", caret);
        }
    }
    let mut buffer = StringBuffer::with_carets(text, carets);
    let mut session = engine.session();

    let mut feedback = session.feed(&mut buffer, keys)?;
    if feedback == Feedback::Pending {
        // Treat the end of input like `timeoutlen` running out
        feedback = session.timeout(&mut buffer)?;
    }

    let last_change = session.last_change().map(|change| change.describe());
    if json {
        let output = RunOutput {
            text: buffer.text(),
            carets: buffer.carets(),
            mode: session.mode(),
            feedback,
            pending: session.pending_keys().to_string(),
            last_change,
            log: if log {
                session.event_log().recent().collect()
            } else {
                Vec::new()
            },
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    print!("{}", buffer.text());
    if !buffer.text().ends_with('\n') {
        println!();
    }
    if log {
        eprintln!("mode: {} ({:?})", session.mode().as_str(), feedback);
        for entry in session.event_log().recent() {
            let marker = if entry.is_change { "*" } else { " " };
            eprintln!("{} {:<8} {:<24} {}", marker, entry.mode, entry.description, entry.keys);
        }
    }
    Ok(())
}

/// Print shell completions
fn print_completions(shell: clap_complete::Shell) {
    clap_complete::generate(
        shell,
        &mut Cli::command(),
        "modekey",
        &mut std::io::stdout(),
    );
}
