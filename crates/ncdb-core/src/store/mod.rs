//! SQLite sibling format: schema, migrations and the store itself.

pub mod database;
pub mod schema;

pub use database::SqliteStore;
