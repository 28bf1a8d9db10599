use diesel_async::pooled_connection::deadpool::{BuildError, Pool};
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::AsyncPgConnection;

pub type DbPool = Pool<AsyncPgConnection>;

/// Build the PostgreSQL pool shared by every store call.
///
/// Connections are opened lazily, so this succeeds even when the database is
/// still starting; the first transaction surfaces connection failures.
pub fn build(database_url: &str, max_size: usize) -> Result<DbPool, BuildError> {
    let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
    let pool = Pool::builder(manager).max_size(max_size).build()?;

    tracing::info!(max_size, "database pool ready");
    Ok(pool)
}
