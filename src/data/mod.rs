//! Data layer
//!
//! - `database`: SQLite access (sqlx)
//! - `models`: entity structs

mod database;
mod models;

#[cfg(test)]
mod database_test;

pub use database::Database;
pub use models::*;
