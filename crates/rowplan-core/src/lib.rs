//! Core types and traits for rowplan.
//!
//! This crate provides the foundational abstractions the flush engine is
//! built on:
//!
//! - `Value` for dynamically-typed SQL parameters
//! - `ObjectKey` for entity identity across a flush
//! - `Table`/`Column`/`ForeignKey` read-only schema descriptors
//! - `Connection` trait for the write side of a data source
//! - `Outcome` re-export from asupersync for cancel-correct operations
//! - `Cx` context for structured concurrency

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Cx, Outcome};

pub mod connection;
pub mod error;
pub mod key;
pub mod schema;
pub mod value;

pub use connection::{BatchStatus, Connection, Dialect};
pub use error::{
    ConfigError, ConnectionError, ConnectionErrorKind, CycleError, Error, OptimisticError,
    QueryError, QueryErrorKind, Result, WriteError,
};
pub use key::ObjectKey;
pub use schema::{Column, ForeignKey, Table};
pub use value::Value;
