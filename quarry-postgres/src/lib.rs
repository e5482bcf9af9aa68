//! Quarry Postgres - PostgreSQL Adapter
//!
//! Runs formatted statements over a synchronous `postgres` client and
//! normalizes results into [`quarry_core::QueryResponse`]. Raw payloads keep
//! PostgreSQL type names so cached payloads parse exactly like fresh ones.

mod adapter;
mod config;
mod types;

pub use adapter::{PgField, PgPayload, PostgresAdapter, PostgresDataSource};
pub use config::{
    PgConfig, ENV_PG_DB, ENV_PG_HOST, ENV_PG_PASSWORD, ENV_PG_PORT, ENV_PG_USER,
};
pub use types::semantic_type;
