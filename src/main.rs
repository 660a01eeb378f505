//! db-async-exec - Main entry point.
//!
//! Runs SQL statements through the execution layer and prints the results as
//! JSON, one line per row.

use clap::Parser;
use db_async_exec::config::{Config, OutputFormat};
use db_async_exec::db::{Database, ResultWrapper, RowDecoder, Session, SqlxDriver};
use db_async_exec::error::DbResult;
use db_async_exec::models::ExecuteResult;
use serde_json::Value as JsonValue;
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

/// Run one statement and render its results.
///
/// Statements without a result set render as a single [`ExecuteResult`].
async fn run_statement(
    session: &mut Session<SqlxDriver>,
    sql: &str,
    format: OutputFormat,
) -> DbResult<Vec<JsonValue>> {
    let decoder = match format {
        OutputFormat::Dicts => RowDecoder::Dicts,
        OutputFormat::Tuples => RowDecoder::Tuples,
    };
    let cursor = session.execute(sql, &[], true).await?;
    let mut result = ResultWrapper::new(cursor, decoder);
    result.fill_cache(None).await?;

    if result.description().is_empty() {
        let summary = ExecuteResult {
            rows_affected: result.rows_affected(),
            last_insert_id: result.last_insert_id(),
        };
        return Ok(vec![serde_json::to_value(summary).unwrap_or(JsonValue::Null)]);
    }
    Ok(result.cached().iter().map(|record| record.to_json()).collect())
}

async fn run_all(session: &mut Session<SqlxDriver>, config: &Config) -> DbResult<Vec<JsonValue>> {
    let mut output = Vec::new();
    for sql in &config.statements {
        output.extend(run_statement(session, sql, config.format).await?);
    }
    Ok(output)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse();

    // Initialize logging
    init_tracing(&config);

    info!(
        statements = config.statements.len(),
        atomic = config.atomic,
        "Starting db-async-exec v{}",
        env!("CARGO_PKG_VERSION")
    );

    let database = Database::connect(&config.database).await?;
    let mut session = database.session().await?;

    let result = if config.atomic {
        session.atomic(None, async |s| run_all(s, &config).await).await
    } else {
        run_all(&mut session, &config).await
    };

    session.release().await;
    database.close().await;

    match result {
        Ok(rows) => {
            for row in rows {
                println!("{}", row);
            }
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Execution failed");
            if let Some(suggestion) = e.suggestion() {
                eprintln!("Hint: {}", suggestion);
            }
            Err(e.into())
        }
    }
}
