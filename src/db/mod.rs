//! Manage database connections and domain queries.
//!
//! This module tree exposes helpers for creating pooled Diesel connections,
//! running embedded migrations, auditing backend capabilities, and the
//! catalog, identity and possession-ledger queries the rest of the crate is
//! built on.

mod audit;
pub mod catalog;
mod connection;
pub mod identity;
pub mod ledger;
mod migrations;

#[cfg(test)]
mod tests;

pub use self::{
    audit::audit_sqlite_features,
    catalog::{BookSearchField, DEFAULT_SECTION_ID},
    connection::{DbConnection, DbPool, MIGRATIONS, establish_connection, establish_pool, write_transaction},
    migrations::run_migrations,
};
