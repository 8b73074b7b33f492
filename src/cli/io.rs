//! JSON output for the CLI
//!
//! Responses are single JSON objects on stdout:
//! - success: `{"status": "ok", "data": ...}`
//! - failure: `{"status": "error", "code": ..., "message": ...}`

use std::io::{self, Write};

use serde_json::Value;

use super::errors::CliResult;

/// Write a success response to stdout
pub fn write_response(data: Value) -> CliResult<()> {
    emit(&mut io::stdout(), &response(data))
}

/// Write an error response to stdout
pub fn write_error(code: &str, message: &str) -> CliResult<()> {
    emit(&mut io::stdout(), &error_response(code, message))
}

/// Write a raw JSON value to stdout as one line
pub fn write_json(value: &Value) -> CliResult<()> {
    emit(&mut io::stdout(), value)
}

/// Write plain text to stdout
pub fn write_text(text: &str) -> CliResult<()> {
    let mut stdout = io::stdout();
    write!(stdout, "{}", text)?;
    stdout.flush()?;
    Ok(())
}

fn response(data: Value) -> Value {
    serde_json::json!({
        "status": "ok",
        "data": data
    })
}

fn error_response(code: &str, message: &str) -> Value {
    serde_json::json!({
        "status": "error",
        "code": code,
        "message": message
    })
}

fn emit<W: Write>(out: &mut W, value: &Value) -> CliResult<()> {
    serde_json::to_writer(&mut *out, value)?;
    writeln!(out)?;
    out.flush()?;
    Ok(())
}
