pub mod announcer;
pub mod config;
pub mod db;
pub mod fair_share;
pub mod metrics;
pub mod models;
pub mod types;

use color_eyre::Report;
use db::Db;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

// the submit loop holds at most one connection, the rest are for readers
const GET_TIMEOUT: Duration = Duration::from_millis(10_000);
const MAX_CONS: u32 = 8;

/// Opens the flag store. An in-memory database only exists inside a single
/// connection, so those get a pool of one that is never recycled.
pub async fn db_connect(url: &str) -> Result<Db, Report> {
    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        // readers on other connections never block the writer
        .journal_mode(SqliteJournalMode::Wal);

    let pool = if url.contains(":memory:") {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
    } else {
        SqlitePoolOptions::new().max_connections(MAX_CONS)
    };

    Ok(Db::wrap(
        pool.acquire_timeout(GET_TIMEOUT)
            .connect_with(options)
            .await?,
    ))
}
