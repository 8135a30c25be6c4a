//! Command line and scheduler daemon for taskgraph.
//!
//! The binary reads its configuration from the environment, initialises
//! tracing and dispatches to [`commands`]. Store-backed commands use the
//! PostgreSQL repositories in [`db`].

pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod invoke;
