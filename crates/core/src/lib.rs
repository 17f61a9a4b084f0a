//! Domain types and pure logic for the bindery batch engine.
//!
//! This crate has no database or filesystem dependencies. It defines the
//! batch state machine rules, operation log vocabulary, archive naming
//! helpers and filename templating used by the `db`, `pipeline` and
//! `worker` crates.

pub mod archive_format;
pub mod batch;
pub mod error;
pub mod naming;
pub mod operation;
pub mod types;
