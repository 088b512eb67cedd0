//! Configuration scripts read from disk

use std::io::Write;

use tempfile::NamedTempFile;

use modekey::options::{OptionValue, Scope};
use modekey::script::{self, ScriptError};
use modekey::{EditorHost, EngineContext, StringBuffer};

fn rc_file(source: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(source.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_rc_file_applies_and_reports_bad_lines() {
    let file = rc_file("\" keys\nnnoremap Y dw\nset nowrapscan\nfrobnicate now\n");
    let engine = EngineContext::new();

    let report = script::run_file(&engine, file.path()).unwrap();

    assert_eq!(report.executed, 2);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].line, 4);
    assert!(matches!(report.errors[0].error, ScriptError::UnknownCommand(ref c) if c == "frobnicate"));
    assert_eq!(
        engine.options().get("wrapscan", Scope::Global).unwrap(),
        OptionValue::Toggle(false)
    );

    let mut session = engine.session();
    let mut buffer = StringBuffer::new("one two");
    session.feed(&mut buffer, "Y").unwrap();
    assert_eq!(buffer.text(), "two");
}

#[test]
fn test_missing_rc_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let engine = EngineContext::new();

    let result = script::run_file(&engine, &dir.path().join("modekeyrc"));

    assert!(matches!(result, Err(ScriptError::Io { .. })));
}

#[test]
fn test_variables_from_script() {
    let engine = EngineContext::new();

    let report = script::run_script(&engine, "let g:answer = 42\nlet g:name = 'modekey'\nunlet g:missing\n");

    assert_eq!(report.executed, 2);
    assert!(matches!(report.errors[0].error, ScriptError::UndefinedVariable(_)));
    assert_eq!(engine.variable("g:answer"), Some(modekey::Value::Number(42)));
    assert_eq!(
        engine.variable("g:name"),
        Some(modekey::Value::String("modekey".to_string()))
    );
}
