//! `flowc` CLI entry-point.
//!
//! Available sub-commands:
//! - `validate`  — check an as-code workflow and list its external dependencies.
//! - `compile`   — materialize a declarative workflow into its execution graph.
//! - `export`    — turn an execution graph back into a declarative document.
//! - `roundtrip` — compile then export a declarative workflow.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use catalog::BuiltinCatalog;
use clap::{Args, Parser, Subcommand};
use compiler::{ascode, declarative, ExportOptions, Exporter, MaterializeConfig, Materializer};
use serde::de::DeserializeOwned;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "flowc", about = "Workflow as-code compiler", version)]
struct Cli {
    /// Upper bound on materializer placement passes.
    #[arg(long, global = true, env = "FLOWC_MAX_ATTEMPTS", default_value_t = 10_000)]
    max_attempts: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate an as-code workflow and print its external dependencies as JSON.
    Validate {
        /// Path to the workflow file (`.yml`/`.yaml` for YAML, JSON otherwise).
        path: PathBuf,
    },
    /// Materialize a declarative workflow and print the execution graph as JSON.
    Compile {
        path: PathBuf,
    },
    /// Export an execution graph as a declarative YAML document.
    Export {
        path: PathBuf,
        #[command(flatten)]
        options: ExportFlags,
    },
    /// Materialize then export a declarative workflow, printing YAML.
    Roundtrip {
        path: PathBuf,
        #[command(flatten)]
        options: ExportFlags,
    },
}

#[derive(Args)]
struct ExportFlags {
    /// Include workflow and node permissions.
    #[arg(long)]
    with_permissions: bool,
    /// Drop a lone default repository webhook on the root, with its payload.
    #[arg(long)]
    skip_default_repo_webhook: bool,
}

impl From<&ExportFlags> for ExportOptions {
    fn from(flags: &ExportFlags) -> Self {
        Self {
            with_permissions: flags.with_permissions,
            skip_if_only_one_repo_webhook: flags.skip_default_repo_webhook,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let catalog = BuiltinCatalog::new();
    let config = MaterializeConfig {
        max_attempts: cli.max_attempts,
    };

    match cli.command {
        Command::Validate { path } => {
            let workflow: ascode::Workflow = decode(&path).await?;
            let deps = compiler::validate(&workflow)
                .with_context(|| format!("workflow '{}' is invalid", workflow.name))?;
            info!(external = deps.len(), "validation succeeded");
            println!("{}", serde_json::to_string_pretty(&deps)?);
        }
        Command::Compile { path } => {
            let doc: declarative::Workflow = decode(&path).await?;
            let workflow = Materializer::new(&catalog, &catalog)
                .with_config(config)
                .materialize(&doc)
                .with_context(|| format!("cannot compile workflow '{}'", doc.name))?;
            println!("{}", serde_json::to_string_pretty(&workflow)?);
        }
        Command::Export { path, options } => {
            let workflow: compiler::Workflow = decode(&path).await?;
            let doc = Exporter::new(&catalog, &catalog)
                .export(&workflow, &ExportOptions::from(&options))
                .with_context(|| format!("cannot export workflow '{}'", workflow.name))?;
            print!("{}", serde_yaml::to_string(&doc)?);
        }
        Command::Roundtrip { path, options } => {
            let doc: declarative::Workflow = decode(&path).await?;
            let workflow = Materializer::new(&catalog, &catalog)
                .with_config(config)
                .materialize(&doc)
                .with_context(|| format!("cannot compile workflow '{}'", doc.name))?;
            let exported = Exporter::new(&catalog, &catalog)
                .export(&workflow, &ExportOptions::from(&options))
                .with_context(|| format!("cannot export workflow '{}'", workflow.name))?;
            if exported != doc {
                debug!("exported document differs from the input");
            }
            print!("{}", serde_yaml::to_string(&exported)?);
        }
    }

    Ok(())
}

/// Read `path` and decode it as YAML or JSON depending on its extension.
async fn decode<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("cannot read file {}", path.display()))?;

    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yml") | Some("yaml")
    );
    debug!(path = %path.display(), yaml = is_yaml, "decoding document");

    if is_yaml {
        serde_yaml::from_str(&content).with_context(|| format!("invalid YAML in {}", path.display()))
    } else {
        serde_json::from_str(&content).with_context(|| format!("invalid JSON in {}", path.display()))
    }
}
