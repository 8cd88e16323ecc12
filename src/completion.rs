//! # Shell Completion Module
//!
//! Completion scripts via `clap_complete`, plus the device-name list used
//! for dynamic completion of `recent --device`.
//!
//! ## Usage
//!
//! ```bash
//! nowplaying completion bash > ~/.local/share/bash-completion/completions/nowplaying
//! nowplaying completion zsh > ~/.config/zsh/completions/_nowplaying
//! ```

use anyhow::{Context, Result};
use clap::Command;
use clap_complete::{generate, Generator, Shell as CompletionShell};
use rusqlite::{Connection, OpenFlags};
use std::io;
use std::path::Path;

/// Generate shell completions for the given shell
pub fn generate_completions<G: Generator>(gen: G, cmd: &mut Command) {
    generate(gen, cmd, cmd.get_name().to_string(), &mut io::stdout());
}

/// Convert our Shell enum to clap_complete's Shell enum
#[must_use]
pub fn shell_to_completion_shell(shell: &crate::cli::Shell) -> CompletionShell {
    match shell {
        crate::cli::Shell::Bash => CompletionShell::Bash,
        crate::cli::Shell::Zsh => CompletionShell::Zsh,
        crate::cli::Shell::Fish => CompletionShell::Fish,
        crate::cli::Shell::PowerShell => CompletionShell::PowerShell,
        crate::cli::Shell::Elvish => CompletionShell::Elvish,
    }
}

/// Distinct device names seen in the event log, sorted.
///
/// A missing database yields an empty list; the database is opened read-only
/// so completion never creates one.
///
/// # Errors
///
/// Returns an error if an existing database cannot be queried.
pub fn device_completions(db_path: &Path) -> Result<Vec<String>> {
    if !db_path.exists() {
        return Ok(Vec::new());
    }
    let conn = Connection::open_with_flags(db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .with_context(|| format!("Cannot open {} for completion", db_path.display()))?;
    let mut stmt = conn
        .prepare("SELECT DISTINCT device_name FROM now_playing ORDER BY device_name")
        .context("Failed to query device names")?;
    let names = stmt.query_map([], |row| row.get(0))?;
    names
        .collect::<rusqlite::Result<Vec<String>>>()
        .context("Cannot read device names")
}

/// Print device names one per line, quoting names with whitespace unless
/// the shell is fish.
///
/// # Errors
///
/// Returns an error if the device list cannot be read.
pub fn print_device_completions(db_path: &Path, shell: Option<&crate::cli::Shell>) -> Result<()> {
    for name in device_completions(db_path)? {
        println!("{}", quote_for_shell(&name, shell));
    }
    Ok(())
}

fn quote_for_shell(name: &str, shell: Option<&crate::cli::Shell>) -> String {
    match shell {
        Some(crate::cli::Shell::Fish) => name.to_string(),
        _ if name.contains(char::is_whitespace) => format!("\"{}\"", name.replace('"', "\\\"")),
        _ => name.to_string(),
    }
}
