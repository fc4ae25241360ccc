use actix_web::web;
use diesel::connection::SimpleConnection;
use diesel::pg::PgConnection;
use diesel::r2d2::{self, ConnectionManager};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::Connection;
use log::{error, info};

use crate::config::{DbPool, DB_INIT_SQL};
use crate::errors::ApiError;

/// Creates the schema if needed and builds the connection pool.
pub fn init_pool(db_url: &str) -> Result<DbPool, ApiError> {
    let mut conn = PgConnection::establish(db_url).map_err(|e| {
        error!("Failed to establish connection for schema setup: {}", e);
        ApiError::DatabaseError(e.to_string())
    })?;
    conn.batch_execute(DB_INIT_SQL).map_err(|e| {
        error!("Failed to execute database initialization script: {}", e);
        ApiError::DatabaseError(e.to_string())
    })?;
    info!("Database initialization complete.");

    let manager = ConnectionManager::<PgConnection>::new(db_url);
    r2d2::Pool::builder().build(manager).map_err(|e| {
        error!("Failed to create database connection pool: {}", e);
        ApiError::DatabaseError(e.to_string())
    })
}

/// Pool that only connects when a connection is first requested.
pub fn lazy_pool(db_url: &str) -> DbPool {
    let manager = ConnectionManager::<PgConnection>::new(db_url);
    r2d2::Pool::builder()
        .min_idle(Some(0))
        .build_unchecked(manager)
}

/// Runs `op` on a pooled connection inside the blocking thread pool.
pub async fn run<F, T>(pool: &DbPool, op: F) -> Result<T, ApiError>
where
    F: FnOnce(&mut PgConnection) -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    let pool = pool.clone();
    web::block(move || {
        let mut conn = pool.get().map_err(|e| {
            error!("Failed to get database connection: {}", e);
            ApiError::DatabaseError(e.to_string())
        })?;
        op(&mut conn)
    })
    .await
    .map_err(|e| {
        error!("Database operation error: {}", e);
        ApiError::DatabaseError(e.to_string())
    })?
}

pub fn is_unique_violation(e: &DieselError) -> bool {
    matches!(e, DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _))
}
