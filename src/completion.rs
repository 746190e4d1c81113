//! # Shell Completion Module
//!
//! Completion scripts come straight from clap. The hidden `complete-tracks`
//! command prints catalog ids so scripts can complete `--previous`.
//!
//! ```bash
//! moodmix completion bash > ~/.local/share/bash-completion/completions/moodmix
//! moodmix completion zsh > ~/.config/zsh/completions/_moodmix
//! ```

use crate::catalog::Catalog;
use crate::cli::Shell;
use clap::Command;
use clap_complete::{generate, Generator, Shell as CompletionShell};
use std::io::{self, Write};

/// Generate shell completions for the given shell
pub fn generate_completions<G: Generator>(gen: G, cmd: &mut Command) {
    generate(gen, cmd, cmd.get_name().to_string(), &mut io::stdout());
}

#[must_use]
pub fn shell_to_completion_shell(shell: Shell) -> CompletionShell {
    match shell {
        Shell::Bash => CompletionShell::Bash,
        Shell::Zsh => CompletionShell::Zsh,
        Shell::Fish => CompletionShell::Fish,
        Shell::PowerShell => CompletionShell::PowerShell,
        Shell::Elvish => CompletionShell::Elvish,
    }
}

/// Track ids in catalog order.
#[must_use]
pub fn track_completions(catalog: &Catalog) -> Vec<&str> {
    catalog.all_tracks().iter().map(|track| track.id.as_str()).collect()
}

pub fn print_track_completions(catalog: &Catalog, out: &mut impl Write) -> io::Result<()> {
    for id in track_completions(catalog) {
        writeln!(out, "{id}")?;
    }
    Ok(())
}
