//! # sheetstore-cli
//!
//! Command-line interface for the sheetstore document store.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sheetstore_store::{
    AsyncDocumentService, DocumentService, OperationResponse, StoreConfig, StoreError,
};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// sheetstore - concurrent, versioned spreadsheet document store
#[derive(Parser, Debug)]
#[command(name = "sheetstore")]
#[command(author, version, about = "Read and write cells of stored spreadsheets", long_about = None)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a default configuration file
    Init {
        /// Where to write the configuration
        #[arg(default_value = "sheetstore.yaml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Apply a write request (JSON file, or - for stdin)
    Write {
        #[arg(value_name = "REQUEST")]
        request: PathBuf,
    },
    /// Run a read request (JSON file, or - for stdin)
    Read {
        #[arg(value_name = "REQUEST")]
        request: PathBuf,
    },
    /// Write then read in one request (JSON file, or - for stdin)
    Op {
        #[arg(value_name = "REQUEST")]
        request: PathBuf,
    },
    /// List stored snapshots of a document, oldest first
    Versions {
        document: String,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries the JSON response.
    let default_level = if cli.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config;
    let open = || open_service(config_path.as_deref());

    let outcome = match cli.command {
        Command::Init { output, force } => {
            init(config_path.as_deref().unwrap_or(&output), force)?;
            return Ok(ExitCode::SUCCESS);
        }
        Command::Write { request } => open()?.write(load_request(&request)?).await,
        Command::Read { request } => open()?.read(load_request(&request)?).await,
        Command::Op { request } => open()?.operate(load_request(&request)?).await,
        Command::Versions { document } => {
            return match open()?.versions(document).await {
                Ok(versions) => {
                    print_json(&versions)?;
                    Ok(ExitCode::SUCCESS)
                }
                Err(err) => report_failure(&err),
            };
        }
    };

    match outcome {
        Ok(response) => {
            print_json(&response)?;
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => report_failure(&err),
    }
}

fn open_service(config_path: Option<&Path>) -> Result<AsyncDocumentService> {
    let config = StoreConfig::load(config_path).context("Failed to load configuration")?;
    let service =
        DocumentService::from_config(&config).context("Failed to open document store")?;
    Ok(AsyncDocumentService::new(service))
}

/// Write the default configuration to `path`.
fn init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    let config = StoreConfig::default();
    let yaml = serde_yaml::to_string(&config).context("Failed to render configuration")?;
    std::fs::write(path, yaml)
        .with_context(|| format!("Failed to write config: {}", path.display()))?;
    eprintln!("{} {}", "Created".green().bold(), path.display());
    Ok(())
}

/// Parse a JSON request from a file, or from stdin when `source` is `-`.
fn load_request<T: DeserializeOwned>(source: &Path) -> Result<T> {
    let text = if source == Path::new("-") {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read request from stdin")?;
        text
    } else {
        std::fs::read_to_string(source)
            .with_context(|| format!("Failed to read request: {}", source.display()))?
    };
    serde_json::from_str(&text)
        .with_context(|| format!("Invalid request in {}", source.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn report_failure(err: &StoreError) -> Result<ExitCode> {
    print_json(&OperationResponse::failure(err))?;
    eprintln!("{} {err}", "Error:".red().bold());
    Ok(ExitCode::FAILURE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sheetstore_store::WriteRequest;

    #[test]
    fn test_parse_subcommands() {
        let cli = Cli::try_parse_from(["sheetstore", "-v", "read", "req.json"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Command::Read { ref request } if request == Path::new("req.json")));

        let cli =
            Cli::try_parse_from(["sheetstore", "versions", "report.xlsx", "--config", "s.yaml"])
                .unwrap();
        assert_eq!(cli.config.as_deref(), Some(Path::new("s.yaml")));
        assert!(matches!(cli.command, Command::Versions { ref document } if document == "report.xlsx"));

        let cli = Cli::try_parse_from(["sheetstore", "op", "-"]).unwrap();
        assert!(matches!(cli.command, Command::Op { ref request } if request == Path::new("-")));
    }

    #[test]
    fn test_parse_rejects_missing_command() {
        assert!(Cli::try_parse_from(["sheetstore"]).is_err());
        assert!(Cli::try_parse_from(["sheetstore", "write"]).is_err());
    }

    #[test]
    fn test_load_request_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("write.json");
        std::fs::write(
            &path,
            r#"{"fileName": "a.xlsx", "sheetName": "Sheet1",
                "cells": [{"cellAddress": "A1", "value": 1, "valueType": "NUMBER"}]}"#,
        )
        .unwrap();
        let request: WriteRequest = load_request(&path).unwrap();
        assert_eq!(request.file_name.as_deref(), Some("a.xlsx"));
        assert_eq!(request.cells.len(), 1);

        std::fs::write(&path, "{not json").unwrap();
        let err = load_request::<WriteRequest>(&path).unwrap_err();
        assert!(err.to_string().starts_with("Invalid request"));
        assert!(load_request::<WriteRequest>(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_init_writes_loadable_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sheetstore.yaml");

        init(&path, false).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(StoreConfig::from_yaml_str(&text).unwrap(), StoreConfig::default());
        assert!(init(&path, false).is_err());
        init(&path, true).unwrap();
    }
}
