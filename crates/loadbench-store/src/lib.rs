//! Destination storage for loadbench pipeline runs.
//!
//! Provides the [`DestinationStore`] trait and a [`SqliteDestination`]
//! implementation. Every dataset is a namespace of replace-on-load tables;
//! rows are written to staging tables first and swapped into place in a
//! single transaction, so a failed load never leaves a partial table behind.

#![warn(clippy::pedantic)]

pub mod backend;
pub mod error;
pub mod schema;
pub mod sqlite;

pub use backend::{DestinationStore, LoadRecord, ReplaceTable, Row};
pub use error::StoreError;
pub use schema::{ColumnDef, ColumnType};
pub use sqlite::SqliteDestination;
