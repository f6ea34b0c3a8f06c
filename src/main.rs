//! Config Data SQL - command line entry point.
//!
//! Connects to the configuration database and runs one command against it.

use config_data_sql::config::{Command, Config};
use config_data_sql::schema::tracker::parse_timestamp;
use config_data_sql::schema::HardwareSchema;
use config_data_sql::{Backend, Filter};
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let backend_config = config.backend_config()?;

    // The hardware schema only matters to the hardware command; everything
    // else runs with an empty one.
    let hardware = match &config.command {
        Command::HardwareSchema { config: path, .. } => HardwareSchema::from_file(path)?,
        _ => HardwareSchema::default(),
    };

    let backend = Backend::connect(backend_config, hardware).await?;
    let result = execute(&backend, &config.command).await;
    backend.shutdown().await;
    result
}

async fn execute(backend: &Backend, command: &Command) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Tables => print_json(&backend.get_tables().await?),
        Command::Select {
            table,
            attributes,
            filter,
        } => {
            let filter = match filter {
                Some(json) => Filter::from_json(&serde_json::from_str(json)?)?,
                None => Filter::new(),
            };
            print_json(&backend.select(table, attributes, &filter).await?)
        }
        Command::Execute { sql } => {
            let affected = backend.executor().execute(sql).await?;
            println!("{affected}");
            Ok(())
        }
        Command::HardwareSchema { apply: true, .. } => {
            let applied = backend.create_hardware_tables().await?;
            info!(statements = applied.len(), "Hardware schema applied");
            Ok(())
        }
        Command::HardwareSchema { apply: false, .. } => {
            let tables = backend.get_tables().await?;
            for statement in backend.hardware().ddl_statements(&tables) {
                println!("{statement};\n");
            }
            Ok(())
        }
        Command::Modifications { since } => {
            let since = since.as_deref().map(parse_timestamp).transpose()?;
            print_json(&backend.tracker().modifications(since).await?)
        }
    }
}

#[tokio::main]
async fn main() {
    let config = Config::parse_args();
    init_tracing(&config);

    info!("Starting config-data-sql v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(&config).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
