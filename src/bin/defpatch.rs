// Copyright 2024 OctoFHIR Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Command-line front end for formulas and patch documents

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use defpatch::registry::load_registry;
use defpatch::{
    Bindings, CollectingSink, Node, PatchConfig, Patcher, Severity, Value, VariableStore,
    evaluate_with, parse,
};
use std::fs;
use std::process;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "defpatch")]
#[command(about = "Evaluate formulas and apply patch documents to definition data")]
#[command(version)]
#[command(author = "OctoFHIR Team <funyloony@gmail.com>")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a formula
    Eval {
        /// Formula text
        formula: String,
        /// Shared variables as NAME=FORMULA, evaluated in order
        #[arg(short, long = "var")]
        vars: Vec<String>,
    },
    /// Parse a formula and print its expression tree
    Parse {
        /// Formula text
        formula: String,
    },
    /// Apply a JSON patch document to JSON definitions
    Apply {
        /// Definitions file, an object keyed by type name
        #[arg(short, long)]
        defs: String,
        /// Patch document file
        #[arg(short, long)]
        patch: String,
        /// Patch configuration file
        #[arg(short, long)]
        config: Option<String>,
        /// Types to load as indexed collections
        #[arg(short, long)]
        indexed: Vec<String>,
        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
        /// Exit with an error when any instruction was skipped
        #[arg(long)]
        strict: bool,
    },
}

fn main() {
    human_panic::setup_panic!();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let outcome = match cli.command {
        Commands::Eval { formula, vars } => handle_eval(&formula, &vars),
        Commands::Parse { formula } => handle_parse(&formula),
        Commands::Apply {
            defs,
            patch,
            config,
            indexed,
            pretty,
            strict,
        } => handle_apply(&defs, &patch, config.as_deref(), &indexed, pretty, strict),
    };

    if let Err(error) = outcome {
        eprintln!("Error: {error:#}");
        process::exit(1);
    }
}

fn handle_eval(formula: &str, vars: &[String]) -> Result<()> {
    let store = VariableStore::global();
    for var in vars {
        let Some((name, text)) = var.split_once('=') else {
            bail!("variable '{var}' must look like NAME=FORMULA");
        };
        let value = evaluate_with(text, Bindings::new())
            .unwrap_or_else(|_| Value::text(text));
        store.insert(name.trim(), value);
    }

    let value = evaluate_with(formula, Bindings::new())
        .with_context(|| format!("evaluating '{formula}'"))?;
    println!("{value}");
    Ok(())
}

fn handle_parse(formula: &str) -> Result<()> {
    let ast = parse(formula).with_context(|| format!("parsing '{formula}'"))?;
    println!("{ast:#?}");
    Ok(())
}

fn read_json(path: &str) -> Result<serde_json::Value> {
    let text = fs::read_to_string(path).with_context(|| format!("reading '{path}'"))?;
    serde_json::from_str(&text).with_context(|| format!("parsing JSON in '{path}'"))
}

fn handle_apply(
    defs: &str,
    patch: &str,
    config: Option<&str>,
    indexed: &[String],
    pretty: bool,
    strict: bool,
) -> Result<()> {
    let config = match config {
        Some(path) => {
            let text = fs::read_to_string(path).with_context(|| format!("reading '{path}'"))?;
            PatchConfig::from_json(&text).with_context(|| format!("parsing config '{path}'"))?
        }
        None => PatchConfig::default(),
    };
    let registry = load_registry(&read_json(defs)?, indexed)?;
    let document = Node::from_json(&read_json(patch)?);

    let sink = Arc::new(CollectingSink::new());
    let mut patcher = Patcher::new(registry)
        .with_config(config)
        .with_sink(sink.clone());
    let report = patcher.apply_document(&document);

    for diagnostic in sink.diagnostics() {
        match diagnostic.severity {
            Severity::Info => log::info!("{diagnostic}"),
            _ => eprintln!("{diagnostic}"),
        }
    }
    for (type_name, error) in sink.unhandled_errors() {
        eprintln!("Pass for {type_name} aborted: {error}");
    }
    if let Some(error) = &report.error {
        bail!("{error}");
    }
    eprintln!(
        "{} applied, {} skipped{}",
        report.applied(),
        report.skipped(),
        if report.aborted { ", document aborted by test" } else { "" }
    );

    let json = patcher.registry().to_json()?;
    let output = if pretty {
        serde_json::to_string_pretty(&json)?
    } else {
        serde_json::to_string(&json)?
    };
    println!("{output}");

    if strict && (report.skipped() > 0 || report.passes.iter().any(|p| p.failure.is_some())) {
        bail!("{} instructions were skipped", report.skipped());
    }
    Ok(())
}
