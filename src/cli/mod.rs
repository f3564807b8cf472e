//! CLI module for voxtask
//!
//! This module contains all CLI command definitions and handlers using clap.

pub mod commands;
pub mod auth;
pub mod task;
pub mod config;

use std::io::{self, Write};

use crate::error::Result;

pub use commands::{Cli, Commands};

/// Print `message` and read one trimmed line from stdin
pub fn prompt(message: &str) -> Result<String> {
    print!("{}", message);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

/// Like [`prompt`], for secrets; the line is not trimmed beyond its newline
pub fn prompt_secret(message: &str) -> Result<String> {
    print!("{}", message);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim_end_matches(['\r', '\n']).to_string())
}
