use std::fs;
use std::process::ExitCode;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use neostore::import::ImportBatch;
use neostore::schema;
use neostore::settings::Settings;
use neostore::{Database, NeoError, Result};

const USAGE: &str = "usage: neostore [--config <file>] <command>

commands:
    schema            print the field catalogue of every entity kind as JSON
    import <file>     import a JSON batch in one transaction
    summary           print the number of stored rows per entity kind";

fn run(settings: &Settings, command: &[String]) -> Result<()> {
    match command {
        [c] if c == "schema" => {
            println!("{}", serde_json::to_string_pretty(&schema::catalog())?);
            Ok(())
        }
        [c, file] if c == "import" => {
            let text = fs::read_to_string(file)
                .map_err(|e| NeoError::Config(format!("cannot read {file}: {e}")))?;
            let batch = ImportBatch::from_json(&text)
                .map_err(|e| NeoError::Config(format!("{file} is not an import batch: {e}")))?;
            let db = Database::with_busy_timeout(settings.persistence_mode(), settings.busy_timeout())?;
            let report = db.import(batch)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        [c] if c == "summary" => {
            let db = Database::with_busy_timeout(settings.persistence_mode(), settings.busy_timeout())?;
            for (kind, count) in db.summary()? {
                println!("{kind:<28}{count}");
            }
            Ok(())
        }
        _ => Err(NeoError::Config(USAGE.to_string())),
    }
}

fn main() -> ExitCode {
    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let config_file = match args.iter().position(|a| a == "--config") {
        Some(at) if at + 1 < args.len() => {
            let file = args.remove(at + 1);
            args.remove(at);
            Some(file)
        }
        Some(_) => {
            eprintln!("{USAGE}");
            return ExitCode::FAILURE;
        }
        None => None,
    };
    let settings = match Settings::load(config_file.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    info!(database = %settings.database, "neostore starting");

    match run(&settings, &args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, systemic = e.is_systemic(), "command failed");
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
