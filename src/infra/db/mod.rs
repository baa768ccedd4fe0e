//! SQLite-backed implementations of the client's local store and cache tiers.

mod cache_entries;
mod feed;
mod util;

pub use cache_entries::SqliteCacheStorage;
pub use util::map_sqlx_error;

use std::{num::NonZeroUsize, str::FromStr, sync::Arc};

use sqlx::{
    Sqlite, Transaction,
    sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions},
};

#[derive(Clone)]
pub struct SqliteRepositories {
    pool: Arc<SqlitePool>,
    capacity: NonZeroUsize,
}

impl SqliteRepositories {
    /// `capacity` bounds the number of posts kept after every merge.
    pub fn new(pool: SqlitePool, capacity: NonZeroUsize) -> Self {
        Self {
            pool: Arc::new(pool),
            capacity,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn begin(&self) -> Result<Transaction<'_, Sqlite>, sqlx::Error> {
        self.pool.begin().await
    }

    /// Open a pool, creating the database file when missing.
    ///
    /// In-memory databases live only as long as their connection, so they get
    /// a single connection that is never recycled.
    pub async fn connect(url: &str, max_connections: u32) -> Result<SqlitePool, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = if url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(max_connections.max(1))
        };
        pool.connect_with(options).await
    }

    pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .map_err(Into::into)
    }
}
