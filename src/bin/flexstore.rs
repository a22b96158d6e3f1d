//! flexstore - command-line driver
//!
//! Usage:
//!   flexstore run <db-path> <commands.json>
//!   flexstore introspect <source.sqlite>
//!
//! `run` executes a JSON array of refactoring commands (or a single
//! command object) in order, one transaction each, and prints the action
//! reports as JSON. `introspect` prints the schema proposal for a foreign
//! SQLite database without changing anything.
//!
//! Logging goes to stderr; set FLEXSTORE_LOG (e.g. `flexstore=debug`).

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde_json::Value;
use tracing::info;

use flexstore::introspect;
use flexstore::logging;
use flexstore::{Command, Database};

const USAGE: &str = "Usage:
  flexstore run <db-path> <commands.json>
  flexstore introspect <source.sqlite>

Flags:
  -V, --version  Print version information
  -h, --help     Print this help message";

fn read_commands(path: &Path) -> Result<Vec<Command>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let json: Value = serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    let commands = match json {
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, v)| serde_json::from_value(v).with_context(|| format!("command #{}", i)))
            .collect::<Result<Vec<Command>>>()?,
        single => vec![serde_json::from_value(single).context("command")?],
    };
    Ok(commands)
}

fn run(db_path: &Path, commands_path: &Path) -> Result<()> {
    let commands = read_commands(commands_path)?;
    let db = Database::open(db_path).with_context(|| format!("opening {}", db_path.display()))?;
    let mut reports = Vec::with_capacity(commands.len());
    for (i, command) in commands.iter().enumerate() {
        let report = db
            .execute(command)
            .with_context(|| format!("command #{} ({}) failed, rolled back", i, command.name()))?;
        reports.push(report);
    }
    info!(commands = reports.len(), "all commands committed");
    println!("{}", serde_json::to_string_pretty(&reports)?);
    Ok(())
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("flexstore {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }
    if args.is_empty() || args.iter().any(|a| a == "--help" || a == "-h") {
        println!("flexstore {}", env!("CARGO_PKG_VERSION"));
        println!();
        println!("{}", USAGE);
        return Ok(());
    }

    logging::init();

    match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["run", db, commands] => run(Path::new(db), Path::new(commands)),
        ["introspect", source] => {
            let proposal = introspect::introspect_file(Path::new(source))
                .with_context(|| format!("introspecting {}", source))?;
            println!("{}", serde_json::to_string_pretty(&proposal)?);
            Ok(())
        }
        _ => bail!("unrecognised arguments\n\n{}", USAGE),
    }
}
