//! # Command-Line Interface Module
//!
//! Clap derive definitions for the `moodmix` binary. Connection settings are
//! global flags with environment fallbacks, so the same invocation works from
//! a shell profile or a one-off command line.
//!
//! ## Commands
//!
//! - `recommend`: parse a mood and print a ranked, explained shortlist
//! - `parse`: show the tags a mood parses into, without selecting tracks
//! - `catalog`: summarize the loaded dataset
//! - `completion`: print a shell completion script
//!
//! ## Examples
//!
//! ```bash
//! moodmix recommend --mood "rainy night focus" -k 5
//! moodmix --offline recommend -m "sunny road trip" --movie-vibe "neon noir" --json
//! moodmix parse -m "late night jazz, a little melancholy"
//! ```

use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Shell types supported for completion generation
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

#[derive(Parser, Debug)]
#[command(name = "moodmix")]
#[command(about = "Moodmix: mood and movie-vibe driven track recommendations from a local catalog")]
#[command(version)]
pub struct Args {
    #[command(flatten)]
    pub global: GlobalArgs,

    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Settings shared by every subcommand.
#[derive(ClapArgs, Debug, Clone)]
pub struct GlobalArgs {
    /// Track dataset (CSV with uri/id and audio feature columns)
    #[arg(long, global = true, env = "SEED_CATALOG", default_value = "data/seeds/tracks.csv")]
    pub catalog: PathBuf,

    /// API key for the OpenAI-compatible text service
    #[arg(long, global = true, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    /// Chat model used for mood parsing and rationales
    #[arg(long, global = true, env = "OPENAI_MODEL", default_value = "gpt-4o-mini")]
    pub model: String,

    /// Base URL of the chat completions API
    #[arg(long, global = true, env = "OPENAI_BASE_URL", default_value = "https://api.openai.com/v1")]
    pub base_url: String,

    /// Deadline for each external call, in seconds
    #[arg(long, global = true, env = "MOODMIX_TIMEOUT_SECS", default_value_t = 8)]
    pub timeout: u64,

    #[arg(long, global = true, env = "SPOTIFY_CLIENT_ID")]
    pub spotify_client_id: Option<String>,

    #[arg(long, global = true, env = "SPOTIFY_CLIENT_SECRET", hide_env_values = true)]
    pub spotify_client_secret: Option<String>,

    /// Metadata cache database (defaults to the platform data directory)
    #[arg(long, global = true)]
    pub cache: Option<PathBuf>,

    /// Most movie-vibe descriptors kept per mood
    #[arg(long, global = true, env = "MAX_MOVIES", default_value_t = 5)]
    pub max_vibes: usize,

    /// Skip every external service and use the deterministic fallbacks
    #[arg(long, global = true)]
    pub offline: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Recommend tracks for a mood
    ///
    /// Parses the mood into tags, scores the whole catalog, and picks a
    /// sequence that keeps tempo and energy changes smooth. Each pick comes
    /// with a short rationale.
    Recommend {
        /// Free-text mood, e.g. "rainy night focus"
        #[arg(short, long)]
        mood: String,

        /// Number of tracks to return (1-10)
        #[arg(short = 'k', long = "count", default_value_t = 6)]
        count: usize,

        /// Optional movie-vibe reference, e.g. "neon noir, slow-burn tension"
        #[arg(long)]
        movie_vibe: Option<String>,

        /// Ids of a previous selection, for continuity (comma separated)
        #[arg(long, value_delimiter = ',')]
        previous: Vec<String>,

        /// Tag overrides as JSON, e.g. '{"setting":"party","bpm_max":140}'
        #[arg(long)]
        overrides: Option<String>,

        /// Print the full response document as JSON
        #[arg(long)]
        json: bool,
    },

    /// Parse a mood into tags without selecting tracks
    Parse {
        #[arg(short, long)]
        mood: String,

        #[arg(long)]
        movie_vibe: Option<String>,

        #[arg(long)]
        overrides: Option<String>,
    },

    /// Summarize the loaded catalog
    Catalog {
        /// Also list the first N tracks
        #[arg(long)]
        list: Option<usize>,
    },

    /// Generate shell completions
    ///
    /// Usage: moodmix completion bash > ~/.local/share/bash-completion/completions/moodmix
    Completion {
        /// Shell to generate completions for
        shell: Shell,
    },

    /// List catalog track ids for completion scripts (hidden command)
    #[command(hide = true)]
    CompleteTracks,
}
