//! CLI command implementations
//!
//! Each command loads its inputs, runs once and exits. Nothing is kept
//! between invocations.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde_json::json;

use crate::bson::{document_to_json, encode_stream, BsonReader, DocumentIterator};
use crate::frontend::QuerySpec;
use crate::observability::{Logger, Severity};
use crate::translator::{ExplainTranslation, Translator, TranslatorConfig};

use super::args::{Cli, Command};
use super::errors::{CliError, CliResult};
use super::io::{write_error, write_json, write_response, write_text};

/// Parse arguments and run the selected command. Failures are also
/// reported on stdout as an error response.
pub fn run() -> CliResult<()> {
    let cli = Cli::parse_args();
    if cli.verbose {
        Logger::set_min_severity(Severity::Trace);
    }

    let result = run_command(cli.command);
    if let Err(e) = &result {
        let code = e.source_code().unwrap_or_else(|| e.code());
        write_error(code, &e.to_string())?;
    }
    result
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Translate {
            query,
            config,
            bson,
        } => translate(&query, config.as_deref(), bson.as_deref()),
        Command::Explain { query, config } => explain(&query, config.as_deref()),
        Command::Decode { input, config } => decode(&input, config.as_deref()),
    }
}

fn load_config(path: Option<&Path>) -> CliResult<TranslatorConfig> {
    match path {
        Some(path) => Ok(TranslatorConfig::load(path)?),
        None => Ok(TranslatorConfig::default()),
    }
}

/// Translate a query; prints the aggregate command and optionally writes
/// the stages as a document stream
pub fn translate(query_path: &Path, config_path: Option<&Path>, bson_path: Option<&Path>) -> CliResult<()> {
    let config = load_config(config_path)?;
    let root = QuerySpec::load(query_path)?.build()?;
    let translation = Translator::new(&config).run(&root)?;

    let mut data = json!({
        "translation_id": translation.id.to_string(),
        "command": translation.pipeline.to_json(),
    });

    if let Some(path) = bson_path {
        let documents = translation.pipeline.to_documents();
        let file = File::create(path)?;
        let written = encode_stream(file, &documents, config.codec.clone())?;
        data["bson"] = json!({
            "path": path.display().to_string(),
            "documents": documents.len(),
            "bytes": written,
        });
    }

    write_response(data)
}

/// Explain a query. A rejected query is a valid explain result.
pub fn explain(query_path: &Path, config_path: Option<&Path>) -> CliResult<()> {
    let config = load_config(config_path)?;
    let spec = QuerySpec::load(query_path)?;

    let explain = match spec
        .build()
        .and_then(|root| Translator::new(&config).run(&root))
    {
        Ok(translation) => ExplainTranslation::from_translation(&translation),
        Err(err) => ExplainTranslation::from_error(&err),
    };

    write_text(&explain.to_string())
}

/// Decode a document stream to one relaxed JSON document per line
pub fn decode(input_path: &Path, config_path: Option<&Path>) -> CliResult<()> {
    let config = load_config(config_path)?;
    let file = File::open(input_path)?;
    let reader = BsonReader::with_settings(BufReader::new(file), config.codec);

    let mut documents = DocumentIterator::new(reader);
    for document in documents.by_ref() {
        write_json(&document_to_json(&document))?;
    }

    match documents.take_error() {
        Some(err) => Err(CliError::from(err)),
        None => Ok(()),
    }
}
