//! xrdtest command-line interface
//!
//! Exposed as a library so the command handlers and report types can be
//! exercised from integration tests without spawning the binary.

pub mod cli;
pub mod commands;
pub mod error;
pub mod logging;
pub mod output;
