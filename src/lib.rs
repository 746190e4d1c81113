//! Mood-driven track recommendations from a local catalog.
//!
//! Core modules:
//! - [`catalog`] - Dataset loading, normalization and lookup
//! - [`mood`] - The [`mood::MoodTags`] preference vector
//! - [`parser`] - Free text → tags, with a keyword fallback
//! - [`algorithm`] - Track scoring
//! - [`selector`] - Continuity-aware top-N selection
//! - [`rationale`] - Per-track explanations
//! - [`pipeline`] - One request, end to end
//!
//! ### Supporting Modules
//!
//! - [`llm`] - Text-understanding service adapter
//! - [`metadata`] - Title/artist resolution (Spotify)
//! - [`db`] - SQLite metadata cache
//! - [`error`] - Error taxonomy
//! - [`config`] - Configuration and data directory management
//! - [`cli`] - Command-line interface definitions with clap integration
//! - [`completion`] - Shell completion generation
//!
//! ## Quick Start Example
//!
//! ```no_run
//! use moodmix::catalog::Catalog;
//! use moodmix::llm::{CompletionOptions, Unavailable};
//! use moodmix::metadata::NoResolver;
//! use moodmix::pipeline::{RecommendRequest, Recommender};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! let catalog = Arc::new(Catalog::from_path(Path::new("data/seeds/tracks.csv"))?);
//! let recommender = Recommender::new(
//!     catalog,
//!     Arc::new(Unavailable),
//!     Arc::new(NoResolver),
//!     CompletionOptions::default(),
//! );
//!
//! let response = recommender.recommend(&RecommendRequest::new("rainy night focus", 5))?;
//! for item in &response.recommendations {
//!     println!("{:.3} {} - {}: {}", item.score, item.artist, item.title, item.rationale);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Pipeline
//!
//! 1. **Parse**: the mood (and optional movie-vibe reference) goes to the text
//!    service, whose JSON answer is validated and repaired into tags. Any
//!    failure switches to a deterministic keyword rule table.
//! 2. **Score**: every track gets a weighted fit in `[0, 1]` from tempo-range
//!    membership, energy and valence closeness, genre/instrument overlap and
//!    listening context.
//! 3. **Select**: a greedy pass over the ranking keeps consecutive tempo and
//!    energy changes within bounds, relaxing them only when nothing else fits.
//! 4. **Explain**: each pick gets a short rationale, from the service when it
//!    behaves and from a score-based template otherwise.
//!
//! The whole pipeline still completes when every external service is down.

pub mod algorithm;
pub mod catalog;
pub mod cli;
pub mod completion;
pub mod config;
pub mod db;
pub mod error;
pub mod llm;
pub mod metadata;
pub mod mood;
pub mod parser;
pub mod pipeline;
pub mod rationale;
pub mod selector;
