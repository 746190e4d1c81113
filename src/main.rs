//! # Moodmix
//!
//! Command-line front end for the recommendation pipeline.
//!
//! ## Usage
//!
//! ```bash
//! # Recommend five tracks
//! moodmix recommend --mood "rainy night focus" -k 5
//!
//! # Full JSON response, no network
//! moodmix --offline recommend -m "sunny road trip" --json
//!
//! # Inspect parsed tags
//! moodmix parse -m "late night jazz"
//! ```
//!
//! Exit codes: 0 on success, 2 for invalid requests, 3 when the catalog is
//! too small, 1 for anything else.

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use log::{debug, info};
use moodmix::catalog::Catalog;
use moodmix::cli::{self, Command};
use moodmix::completion;
use moodmix::config::RuntimeConfig;
use moodmix::error::RecommendError;
use moodmix::mood::MoodOverrides;
use moodmix::pipeline::{RecommendRequest, RecommendResponse, Recommender};
use std::io;
use std::process::ExitCode;
use std::sync::Arc;

/// Initializes logging, parses arguments and maps errors to exit codes.
///
/// Logging is controlled via `RUST_LOG`:
/// - `RUST_LOG=debug moodmix recommend -m calm` - Enable debug logging
/// - `RUST_LOG=moodmix::selector=debug moodmix recommend -m calm` - Module-specific logging
fn main() -> ExitCode {
    env_logger::init();

    let args = cli::Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            let code = err
                .downcast_ref::<RecommendError>()
                .map_or(1, RecommendError::exit_code);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}

fn run(args: cli::Args) -> Result<()> {
    let config = RuntimeConfig::from(&args.global);
    debug!("Runtime config: {config:?}");

    match args.command {
        Command::Recommend { mood, count, movie_vibe, previous, overrides, json } => {
            let recommender = build_recommender(&config)?;
            let request = RecommendRequest {
                mood_text: mood,
                movie_vibe,
                n_tracks: count,
                overrides: parse_overrides(overrides.as_deref())?,
                previous,
            };

            info!("Recommending {} tracks for: {}", request.n_tracks, request.mood_text);
            let response = recommender.recommend(&request)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                print_response(&response);
            }
        }
        Command::Parse { mood, movie_vibe, overrides } => {
            let recommender = build_recommender(&config)?;
            let overrides = parse_overrides(overrides.as_deref())?;
            let outcome = recommender.parse(&mood, movie_vibe.as_deref(), overrides.as_ref())?;

            println!("{}", serde_json::to_string_pretty(&outcome.tags)?);
            if outcome.fallback_used {
                eprintln!("(keyword fallback used)");
            }
        }
        Command::Catalog { list } => {
            let catalog = load_catalog(&config)?;
            let (slowest, fastest) = catalog.tempo_bounds();
            println!("Tracks: {}", catalog.len());
            println!("Tempo:  {slowest:.0}-{fastest:.0} BPM");

            for track in catalog.all_tracks().iter().take(list.unwrap_or(0)) {
                println!(
                    "{}  {:>5.1} BPM  energy {:.2}  valence {:.2}  {}",
                    track.id,
                    track.features.tempo,
                    track.features.energy,
                    track.features.valence,
                    track.title.as_deref().unwrap_or("")
                );
            }
        }
        Command::Completion { shell } => {
            let mut cmd = cli::Args::command();
            completion::generate_completions(completion::shell_to_completion_shell(shell), &mut cmd);
        }
        Command::CompleteTracks => {
            let catalog = load_catalog(&config)?;
            completion::print_track_completions(&catalog, &mut io::stdout().lock())?;
        }
    }

    Ok(())
}

fn load_catalog(config: &RuntimeConfig) -> Result<Catalog> {
    Catalog::from_path(&config.catalog_path)
        .with_context(|| format!("Failed to load catalog from {}", config.catalog_path.display()))
}

fn build_recommender(config: &RuntimeConfig) -> Result<Recommender> {
    let catalog = Arc::new(load_catalog(config)?);
    info!("Loaded {} tracks from {}", catalog.len(), config.catalog_path.display());

    Ok(Recommender::new(
        catalog,
        config.text_service(),
        config.metadata_resolver()?,
        config.completion_options(),
    )
    .with_max_vibes(config.max_vibes))
}

fn parse_overrides(raw: Option<&str>) -> Result<Option<MoodOverrides>, RecommendError> {
    raw.map(|json| {
        serde_json::from_str(json)
            .map_err(|err| RecommendError::Validation(format!("invalid --overrides JSON: {err}")))
    })
    .transpose()
}

fn print_response(response: &RecommendResponse) {
    let tags = &response.parsed_tags;
    println!(
        "Mood: valence {:+.2}, energy {:.2}, {}-{} BPM{}",
        tags.valence,
        tags.energy,
        tags.tempo.bpm_min,
        tags.tempo.bpm_max,
        if response.debug.fallback_used { " (keyword fallback)" } else { "" }
    );
    println!();

    for (position, item) in response.recommendations.iter().enumerate() {
        println!("{:>2}. {} - {}  [{:.3}]", position + 1, item.artist, item.title, item.score);
        println!("    {}", item.rationale);
        if let Some(url) = &item.links.spotify {
            println!("    {url}");
        }
    }

    for relaxation in &response.debug.relaxations {
        println!(
            "note: continuity relaxed before #{} (tempo delta {:.0} BPM, energy delta {:.2})",
            relaxation.position + 1,
            relaxation.tempo_delta,
            relaxation.energy_delta
        );
    }
}
