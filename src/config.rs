//! # Configuration Module
//!
//! Runtime configuration and data directory setup for Moodmix.
//!
//! Values come from command-line flags with environment fallbacks (see
//! [`crate::cli::GlobalArgs`]). This module turns them into a
//! [`RuntimeConfig`] and builds the external service adapters from it.
//!
//! ## Data Storage
//!
//! The metadata cache lives in the platform-standard data directory:
//! - Linux: `~/.local/share/moodmix/metadata.db`
//! - macOS: `~/Library/Application Support/moodmix/metadata.db`
//! - Windows: `%APPDATA%\moodmix\metadata.db`

use crate::cli::GlobalArgs;
use crate::db::MetadataCache;
use crate::llm::{CompletionOptions, OpenAiClient, TextService, Unavailable};
use crate::metadata::{CachedResolver, MetadataResolver, NoResolver, SpotifyClient};
use crate::mood::DEFAULT_MAX_VIBES;
use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_CATALOG: &str = "data/seeds/tracks.csv";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_TIMEOUT_SECS: u64 = 8;

/// Returns the platform-appropriate data directory for Moodmix, creating it
/// if needed.
///
/// # Errors
///
/// Fails if the system data directory cannot be determined or the
/// `moodmix` subdirectory cannot be created.
pub fn get_data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir().ok_or_else(|| {
        anyhow::anyhow!(
            "Could not determine system data directory. Please ensure your platform supports standard data directories."
        )
    })?;

    let moodmix_dir = data_dir.join("moodmix");
    fs::create_dir_all(&moodmix_dir).with_context(|| {
        format!(
            "Failed to create Moodmix data directory at {}. Please check file permissions.",
            moodmix_dir.display()
        )
    })?;

    Ok(moodmix_dir)
}

/// Default location of the metadata cache database.
///
/// ```no_run
/// use moodmix::config::get_cache_path;
///
/// let path = get_cache_path()?;
/// println!("Cache location: {}", path.display());
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn get_cache_path() -> Result<PathBuf> {
    Ok(get_data_dir()?.join("metadata.db"))
}

/// Configuration for runtime behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub catalog_path: PathBuf,
    #[serde(skip_serializing, default)]
    pub openai_api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub request_timeout_secs: u64,
    pub spotify_client_id: Option<String>,
    #[serde(skip_serializing, default)]
    pub spotify_client_secret: Option<String>,
    /// `None` means [`get_cache_path`].
    pub cache_path: Option<PathBuf>,
    pub max_vibes: usize,
    pub offline: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            catalog_path: PathBuf::from(DEFAULT_CATALOG),
            openai_api_key: None,
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            spotify_client_id: None,
            spotify_client_secret: None,
            cache_path: None,
            max_vibes: DEFAULT_MAX_VIBES,
            offline: false,
        }
    }
}

impl From<&GlobalArgs> for RuntimeConfig {
    fn from(args: &GlobalArgs) -> Self {
        let non_empty = |value: &Option<String>| value.clone().filter(|v| !v.trim().is_empty());

        Self {
            catalog_path: args.catalog.clone(),
            openai_api_key: non_empty(&args.openai_api_key),
            model: args.model.clone(),
            base_url: args.base_url.clone(),
            request_timeout_secs: args.timeout,
            spotify_client_id: non_empty(&args.spotify_client_id),
            spotify_client_secret: non_empty(&args.spotify_client_secret),
            cache_path: args.cache.clone(),
            max_vibes: args.max_vibes,
            offline: args.offline,
        }
    }
}

impl RuntimeConfig {
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    #[must_use]
    pub fn completion_options(&self) -> CompletionOptions {
        CompletionOptions {
            timeout: self.request_timeout(),
            ..CompletionOptions::default()
        }
    }

    /// The text service, or [`Unavailable`] when offline or unconfigured.
    #[must_use]
    pub fn text_service(&self) -> Arc<dyn TextService> {
        match (&self.openai_api_key, self.offline) {
            (Some(key), false) => {
                info!("Using text service at {} (model {})", self.base_url, self.model);
                Arc::new(OpenAiClient::new(&self.base_url, &self.model, Some(key.clone())))
            }
            (None, false) => {
                warn!("OPENAI_API_KEY is not set, using keyword parsing and template rationales");
                Arc::new(Unavailable)
            }
            (_, true) => Arc::new(Unavailable),
        }
    }

    /// The metadata resolver: Spotify behind the SQLite cache when
    /// credentials are configured. A cache that cannot be opened is skipped.
    pub fn metadata_resolver(&self) -> Result<Arc<dyn MetadataResolver>> {
        let (Some(id), Some(secret), false) =
            (&self.spotify_client_id, &self.spotify_client_secret, self.offline)
        else {
            return Ok(Arc::new(NoResolver));
        };

        let spotify: Arc<dyn MetadataResolver> =
            Arc::new(SpotifyClient::new(id.as_str(), secret.as_str()).with_timeout(self.request_timeout()));

        let cache_path = match &self.cache_path {
            Some(path) => path.clone(),
            None => get_cache_path()?,
        };
        match MetadataCache::open(&cache_path) {
            Ok(cache) => Ok(Arc::new(CachedResolver::new(spotify, cache))),
            Err(err) => {
                warn!("Metadata cache disabled: {err:#}");
                Ok(spotify)
            }
        }
    }
}
