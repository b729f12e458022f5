use diesel::pg::PgConnection;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use std::time::Duration;
use wavesexchange_log::warn;

use crate::config::postgres::Config;
use crate::error::Error as AppError;

pub type PgPool = Pool<ConnectionManager<PgConnection>>;
pub type PgPooledConnection = PooledConnection<ConnectionManager<PgConnection>>;

pub fn pool(config: &Config) -> Result<PgPool, AppError> {
    let db_url = config.database_url();

    let manager = ConnectionManager::<PgConnection>::new(db_url);
    Ok(Pool::builder()
        .min_idle(Some(1))
        .max_size(config.pool_size)
        .idle_timeout(Some(Duration::from_secs(30)))
        .connection_timeout(Duration::from_secs(config.connection_timeout_secs))
        .build(manager)?)
}

/// Checks a connection out of the pool, retrying up to `retries` more times.
pub fn connection(pool: &PgPool, retries: u32) -> Result<PgPooledConnection, AppError> {
    let mut attempt = 0;
    loop {
        match pool.get() {
            Ok(conn) => return Ok(conn),
            Err(err) if attempt < retries => {
                attempt += 1;
                warn!(
                    "Cannot get a pooled connection (attempt {} of {}): {}",
                    attempt,
                    retries + 1,
                    err
                );
            }
            Err(err) => return Err(AppError::ConnectionPoolError(err)),
        }
    }
}
