//! Configuration scripts.
//!
//! A deliberately small line-oriented language covering what an rc file
//! needs: the `map`/`noremap`/`unmap` families, `set`, `let`/`unlet`,
//! `Plug`/`Plugin` and `packadd`. Lines starting with `"` are comments.
//!
//! While a script runs, [`EngineContext::is_executing_config`] is true, so
//! extensions enabled by the script initialize only after the last line. A
//! failing line is recorded in the [`ScriptReport`] and execution continues.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::context::{EngineContext, Value};
use crate::key::{KeyParseError, KeySequence};
use crate::mapping::{Mapping, MappingError, MappingOwner, MappingTarget};
use crate::mode::MappingModes;
use crate::options::{OptionError, OptionValue, Scope};

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("not an editor command: {0}")]
    UnknownCommand(String),

    #[error("argument required: {0}")]
    MissingArgument(&'static str),

    #[error("invalid expression: {0}")]
    InvalidExpression(String),

    #[error("undefined variable: {0}")]
    UndefinedVariable(String),

    #[error("mapping already exists for {0}")]
    MappingExists(String),

    #[error("no extension registered as {0}")]
    UnknownExtension(String),

    #[error(transparent)]
    Keys(#[from] KeyParseError),

    #[error(transparent)]
    Mapping(#[from] MappingError),

    #[error(transparent)]
    Option(#[from] OptionError),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A line that failed
#[derive(Debug)]
pub struct LineError {
    /// 1-based line number
    pub line: usize,
    pub text: String,
    pub error: ScriptError,
}

/// Outcome of running a whole script
#[derive(Debug, Default)]
pub struct ScriptReport {
    /// Lines that ran successfully (comments and blank lines excluded)
    pub executed: usize,
    pub errors: Vec<LineError>,
}

impl ScriptReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

// ============================================================================
// Running scripts
// ============================================================================

/// `<config_dir>/modekey/modekeyrc`
pub fn default_rc_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("modekey").join("modekeyrc"))
}

pub fn run_file(engine: &EngineContext, path: &Path) -> Result<ScriptReport, ScriptError> {
    let source = fs::read_to_string(path).map_err(|source| ScriptError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    info!(path = %path.display(), "running configuration script");
    Ok(run_script(engine, &source))
}

/// Run every line of `source`, then the extension initializations it
/// deferred
pub fn run_script(engine: &EngineContext, source: &str) -> ScriptReport {
    let mut report = ScriptReport::default();
    {
        let _config = engine.begin_config();
        for (index, text) in source.lines().enumerate() {
            if is_blank(text) {
                continue;
            }
            match execute_line(engine, text) {
                Ok(()) => report.executed += 1,
                Err(error) => {
                    warn!(line = index + 1, %text, %error, "script error");
                    report.errors.push(LineError {
                        line: index + 1,
                        text: text.to_string(),
                        error,
                    });
                }
            }
        }
    }
    if !engine.is_executing_config() {
        engine.flush_deferred_extensions();
    }
    report
}

fn is_blank(line: &str) -> bool {
    let line = line.trim_start().trim_start_matches(':').trim_start();
    line.is_empty() || line.starts_with('"')
}

/// Execute one command line (also what `:` runs)
pub fn execute_line(engine: &EngineContext, line: &str) -> Result<(), ScriptError> {
    if is_blank(line) {
        return Ok(());
    }
    let line = line.trim().trim_start_matches(':').trim_start();
    let (command, rest) = match line.find(char::is_whitespace) {
        Some(i) => (&line[..i], line[i..].trim()),
        None => (line, ""),
    };
    debug!(%command, args = %rest, "script command");

    if let Some((modes, kind)) = map_command(command) {
        return match kind {
            MapKind::Map { recursive } => map(engine, modes, recursive, rest),
            MapKind::Unmap => unmap(engine, modes, rest),
        };
    }
    match command {
        "set" | "se" => set(engine, rest),
        "let" => let_variable(engine, rest),
        "unlet" => unlet(engine, rest, false),
        "unlet!" => unlet(engine, rest, true),
        "Plug" | "Plugin" => plug(engine, rest),
        "packadd" | "packadd!" => packadd(engine, rest),
        _ => Err(ScriptError::UnknownCommand(command.to_string())),
    }
}

// ============================================================================
// Mappings
// ============================================================================

enum MapKind {
    Map { recursive: bool },
    Unmap,
}

/// Parse `nnoremap`, `map!`, `xunmap` and friends
fn map_command(command: &str) -> Option<(MappingModes, MapKind)> {
    let (base, bang) = match command.strip_suffix('!') {
        Some(base) => (base, true),
        None => (command, false),
    };
    let (prefix, kind) = if let Some(prefix) = base.strip_suffix("noremap") {
        (prefix, MapKind::Map { recursive: false })
    } else if let Some(prefix) = base.strip_suffix("unmap") {
        (prefix, MapKind::Unmap)
    } else if let Some(prefix) = base.strip_suffix("map") {
        (prefix, MapKind::Map { recursive: true })
    } else {
        return None;
    };

    let modes = match (prefix, bang) {
        ("", false) => {
            MappingModes::NORMAL | MappingModes::VISUAL | MappingModes::SELECT | MappingModes::OP_PENDING
        }
        ("", true) => MappingModes::INSERT | MappingModes::CMD_LINE,
        ("n", false) => MappingModes::NORMAL,
        ("v", false) => MappingModes::VISUAL | MappingModes::SELECT,
        ("x", false) => MappingModes::VISUAL,
        ("s", false) => MappingModes::SELECT,
        ("o", false) => MappingModes::OP_PENDING,
        ("i", false) => MappingModes::INSERT,
        ("c", false) => MappingModes::CMD_LINE,
        _ => return None,
    };
    Some((modes, kind))
}

/// Split off `<silent>`-style arguments; returns whether `<unique>` was given
fn map_arguments(mut rest: &str) -> (&str, bool) {
    const SPECIAL: [&str; 4] = ["<silent>", "<nowait>", "<buffer>", "<unique>"];
    let mut unique = false;
    while let Some(arg) = SPECIAL
        .into_iter()
        .find(|arg| rest.get(..arg.len()).is_some_and(|head| head.eq_ignore_ascii_case(arg)))
    {
        unique |= arg == "<unique>";
        rest = rest[arg.len()..].trim_start();
    }
    (rest, unique)
}

fn split_lhs(rest: &str) -> (&str, &str) {
    match rest.find(char::is_whitespace) {
        Some(i) => (&rest[..i], rest[i..].trim()),
        None => (rest, ""),
    }
}

fn map(engine: &EngineContext, modes: MappingModes, recursive: bool, rest: &str) -> Result<(), ScriptError> {
    let (rest, unique) = map_arguments(rest);
    let (lhs, rhs) = split_lhs(rest);
    if lhs.is_empty() {
        return Err(ScriptError::MissingArgument("{lhs}"));
    }
    if rhs.is_empty() {
        return Err(ScriptError::MissingArgument("{rhs}"));
    }
    let from = KeySequence::parse(lhs)?;
    let to = KeySequence::parse(rhs)?;
    let mapping = Mapping::new(
        from.clone(),
        MappingTarget::Keys(to),
        modes,
        MappingOwner::User,
        recursive,
    )?;

    let mut table = engine.mappings_mut();
    if unique && modes.tags().any(|tag| table.get(tag, from.keys()).is_some()) {
        return Err(ScriptError::MappingExists(from.to_string()));
    }
    table.insert(mapping, true);
    Ok(())
}

fn unmap(engine: &EngineContext, modes: MappingModes, rest: &str) -> Result<(), ScriptError> {
    let (rest, _) = map_arguments(rest);
    if rest.is_empty() {
        return Err(ScriptError::MissingArgument("{lhs}"));
    }
    let from = KeySequence::parse(rest)?;
    engine.mappings_mut().remove(modes, &from)?;
    Ok(())
}

// ============================================================================
// Options
// ============================================================================

fn set(engine: &EngineContext, rest: &str) -> Result<(), ScriptError> {
    if rest.is_empty() {
        return Err(ScriptError::MissingArgument("{option}"));
    }
    for arg in rest.split_whitespace() {
        set_one(engine, arg)?;
    }
    Ok(())
}

fn set_one(engine: &EngineContext, arg: &str) -> Result<(), ScriptError> {
    let options = engine.options();

    if let Some((name, raw)) = arg.split_once(['=', ':']) {
        let value = options.parse_value(name, raw)?;
        options.set(name, value, Scope::Global)?;
        return Ok(());
    }
    if let Some(name) = arg.strip_suffix('!') {
        options.invert(name, Scope::Global)?;
        return Ok(());
    }
    if let Some(name) = arg.strip_suffix('&') {
        options.reset(name, Scope::Global)?;
        return Ok(());
    }
    if let Some(name) = arg.strip_suffix('?') {
        let value = options.get(name, Scope::Global)?;
        info!(option = name, %value, "option value");
        return Ok(());
    }
    if options.is_defined(arg) {
        let value = options.get(arg, Scope::Global)?;
        return match value {
            OptionValue::Toggle(_) => Ok(options.set(arg, OptionValue::Toggle(true), Scope::Global)?),
            value => {
                info!(option = arg, %value, "option value");
                Ok(())
            }
        };
    }
    if let Some(name) = arg.strip_prefix("no").filter(|name| options.is_defined(name)) {
        options.set(name, OptionValue::Toggle(false), Scope::Global)?;
        return Ok(());
    }
    if let Some(name) = arg.strip_prefix("inv").filter(|name| options.is_defined(name)) {
        options.invert(name, Scope::Global)?;
        return Ok(());
    }
    Err(OptionError::Unknown(arg.to_string()).into())
}

// ============================================================================
// Variables
// ============================================================================

fn parse_value(expr: &str) -> Result<Value, ScriptError> {
    let expr = expr.trim();
    if let Ok(n) = expr.parse::<i64>() {
        return Ok(Value::Number(n));
    }
    let quoted = |q: char| {
        expr.strip_prefix(q)
            .and_then(|s| s.strip_suffix(q))
            .filter(|s| !s.contains(q))
    };
    if let Some(s) = quoted('\'').or_else(|| quoted('"')) {
        return Ok(Value::String(s.to_string()));
    }
    Err(ScriptError::InvalidExpression(expr.to_string()))
}

fn let_variable(engine: &EngineContext, rest: &str) -> Result<(), ScriptError> {
    let Some((name, expr)) = rest.split_once('=') else {
        return Err(ScriptError::MissingArgument("="));
    };
    let name = name.trim();
    if name.is_empty() {
        return Err(ScriptError::MissingArgument("{var}"));
    }
    let value = parse_value(expr)?;
    engine.set_variable(name, value);
    Ok(())
}

fn unlet(engine: &EngineContext, rest: &str, silent: bool) -> Result<(), ScriptError> {
    if rest.is_empty() {
        return Err(ScriptError::MissingArgument("{var}"));
    }
    for name in rest.split_whitespace() {
        if !engine.remove_variable(name) && !silent {
            return Err(ScriptError::UndefinedVariable(name.to_string()));
        }
    }
    Ok(())
}

// ============================================================================
// Extensions
// ============================================================================

/// Plugin reference from `Plug 'owner/name'`, with the URL noise removed
fn plugin_alias(rest: &str) -> &str {
    let alias = rest
        .split(',')
        .next()
        .unwrap_or_default()
        .trim()
        .trim_matches(|c| c == '\'' || c == '"');
    let alias = alias
        .strip_prefix("https://github.com/")
        .or_else(|| alias.strip_prefix("git@github.com:"))
        .unwrap_or(alias);
    alias.strip_suffix(".git").unwrap_or(alias)
}

fn plug(engine: &EngineContext, rest: &str) -> Result<(), ScriptError> {
    let alias = plugin_alias(rest);
    if alias.is_empty() {
        return Err(ScriptError::MissingArgument("{plugin}"));
    }
    if engine.activate_extension(alias) {
        Ok(())
    } else {
        Err(ScriptError::UnknownExtension(alias.to_string()))
    }
}

fn packadd(engine: &EngineContext, rest: &str) -> Result<(), ScriptError> {
    let name = rest.trim();
    if name.is_empty() {
        return Err(ScriptError::MissingArgument("{name}"));
    }
    if !engine.is_extension_registered(name) && engine.extension_name_by_alias(name).is_none() {
        return Err(ScriptError::UnknownExtension(name.to_string()));
    }
    if engine.activate_extension(name) {
        Ok(())
    } else {
        Err(ScriptError::UnknownExtension(name.to_string()))
    }
}
