//! Track metadata resolution: id → display title and artist.
//!
//! The catalog may carry only ids and audio features. Titles and artists
//! are then looked up through a [`MetadataResolver`] at response time.
//! [`SpotifyClient`] uses the Spotify Web API with client-credentials auth;
//! [`CachedResolver`] wraps any resolver with the SQLite cache from
//! [`crate::db`].

use crate::catalog::spotify_track_id;
use crate::db::MetadataCache;
use crate::llm::{ServiceError, DEFAULT_TIMEOUT};
use base64::{engine::general_purpose, Engine as _};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;

const ACCOUNTS_URL: &str = "https://accounts.spotify.com/api/token";
const API_URL: &str = "https://api.spotify.com/v1";
/// Tokens are refreshed this long before Spotify says they expire.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub title: String,
    pub artist: String,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MetadataError {
    #[error("no metadata for {0}")]
    NotFound(String),

    #[error(transparent)]
    Service(#[from] ServiceError),
}

pub trait MetadataResolver: Send + Sync {
    fn name(&self) -> &str;

    /// # Errors
    ///
    /// [`MetadataError::NotFound`] when the service does not know the id,
    /// [`MetadataError::Service`] on transport or API failures.
    fn resolve(&self, track_id: &str) -> Result<TrackInfo, MetadataError>;
}

/// Resolver used offline and when no credentials are configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoResolver;

impl MetadataResolver for NoResolver {
    fn name(&self) -> &str {
        "none"
    }

    fn resolve(&self, _: &str) -> Result<TrackInfo, MetadataError> {
        Err(MetadataError::Service(ServiceError::Unavailable))
    }
}

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    expires_at: Instant,
}

/// Spotify Web API resolver.
pub struct SpotifyClient {
    http_client: ureq::Agent,
    client_id: String,
    client_secret: String,
    timeout: Duration,
    token: Mutex<Option<AccessToken>>,
}

impl SpotifyClient {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        let http_client = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5))
            .build();

        Self {
            http_client,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            timeout: DEFAULT_TIMEOUT,
            token: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn access_token(&self) -> Result<String, ServiceError> {
        let mut cached = self
            .token
            .lock()
            .map_err(|_| ServiceError::Connection("token cache poisoned".to_string()))?;

        if let Some(token) = cached.as_ref().filter(|t| Instant::now() < t.expires_at) {
            return Ok(token.value.clone());
        }

        debug!("Requesting Spotify access token");
        let credentials = general_purpose::STANDARD.encode(format!("{}:{}", self.client_id, self.client_secret));
        let response: TokenResponse = self
            .http_client
            .post(ACCOUNTS_URL)
            .timeout(self.timeout)
            .set("Authorization", &format!("Basic {credentials}"))
            .send_form(&[("grant_type", "client_credentials")])
            .map_err(|err| classify_failure(&err))?
            .into_json()
            .map_err(|err| ServiceError::InvalidResponse(format!("token response: {err}")))?;

        let lifetime = Duration::from_secs(response.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        *cached = Some(AccessToken {
            value: response.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(response.access_token)
    }

    fn forget_token(&self) {
        if let Ok(mut cached) = self.token.lock() {
            *cached = None;
        }
    }
}

impl MetadataResolver for SpotifyClient {
    fn name(&self) -> &str {
        "spotify"
    }

    fn resolve(&self, track_id: &str) -> Result<TrackInfo, MetadataError> {
        let spotify_id =
            spotify_track_id(track_id).ok_or_else(|| MetadataError::NotFound(track_id.to_string()))?;
        let token = self.access_token()?;

        let response = self
            .http_client
            .get(&format!("{API_URL}/tracks/{spotify_id}"))
            .timeout(self.timeout)
            .set("Authorization", &format!("Bearer {token}"))
            .call();

        let body: SpotifyTrack = match response {
            Ok(response) => response
                .into_json()
                .map_err(|err| ServiceError::InvalidResponse(format!("track response: {err}")))?,
            Err(ureq::Error::Status(400 | 404, _)) => {
                return Err(MetadataError::NotFound(track_id.to_string()));
            }
            Err(err @ ureq::Error::Status(401, _)) => {
                self.forget_token();
                return Err(classify_failure(&err).into());
            }
            Err(err) => return Err(classify_failure(&err).into()),
        };

        track_info(body).ok_or_else(|| MetadataError::NotFound(track_id.to_string()))
    }
}

fn track_info(track: SpotifyTrack) -> Option<TrackInfo> {
    let title = track.name.filter(|name| !name.trim().is_empty())?;
    let artist = track
        .artists
        .into_iter()
        .filter_map(|artist| artist.name)
        .collect::<Vec<_>>()
        .join(", ");

    Some(TrackInfo { title, artist })
}

fn classify_failure(error: &ureq::Error) -> ServiceError {
    match error {
        ureq::Error::Status(429, _) => ServiceError::RateLimited,
        ureq::Error::Status(code, _) => ServiceError::Api {
            status: *code,
            message: error.to_string(),
        },
        ureq::Error::Transport(transport) => {
            let message = transport.to_string();
            if message.to_ascii_lowercase().contains("timed out") {
                ServiceError::Timeout
            } else {
                ServiceError::Connection(message)
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct SpotifyTrack {
    name: Option<String>,
    #[serde(default)]
    artists: Vec<SpotifyArtist>,
}

#[derive(Debug, Deserialize)]
struct SpotifyArtist {
    name: Option<String>,
}

/// Read-through cache in front of another resolver. Cache failures are
/// logged and otherwise ignored.
pub struct CachedResolver {
    inner: Arc<dyn MetadataResolver>,
    cache: MetadataCache,
}

impl CachedResolver {
    pub fn new(inner: Arc<dyn MetadataResolver>, cache: MetadataCache) -> Self {
        Self { inner, cache }
    }
}

impl MetadataResolver for CachedResolver {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn resolve(&self, track_id: &str) -> Result<TrackInfo, MetadataError> {
        match self.cache.get(track_id) {
            Ok(Some(info)) => return Ok(info),
            Ok(None) => {}
            Err(err) => warn!("Metadata cache read failed: {err:#}"),
        }

        let info = self.inner.resolve(track_id)?;
        if let Err(err) = self.cache.put(track_id, &info) {
            warn!("Metadata cache write failed: {err:#}");
        }
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: AtomicUsize,
    }

    impl MetadataResolver for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn resolve(&self, track_id: &str) -> Result<TrackInfo, MetadataError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if track_id == "missing" {
                return Err(MetadataError::NotFound(track_id.to_string()));
            }
            Ok(TrackInfo { title: format!("Title {track_id}"), artist: "Band".to_string() })
        }
    }

    #[test]
    fn test_cached_resolver_hits_inner_once() {
        let inner = Arc::new(Counting { calls: AtomicUsize::new(0) });
        let resolver = CachedResolver::new(inner.clone(), MetadataCache::in_memory().unwrap());

        let first = resolver.resolve("t1").unwrap();
        let second = resolver.resolve("t1").unwrap();

        assert_eq!(first, second);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_misses_are_not_cached() {
        let inner = Arc::new(Counting { calls: AtomicUsize::new(0) });
        let resolver = CachedResolver::new(inner.clone(), MetadataCache::in_memory().unwrap());

        assert_eq!(resolver.resolve("missing"), Err(MetadataError::NotFound("missing".into())));
        assert!(resolver.resolve("missing").is_err());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_spotify_rejects_non_spotify_ids_without_network() {
        let client = SpotifyClient::new("id", "secret");
        assert_eq!(
            client.resolve("local-track-7"),
            Err(MetadataError::NotFound("local-track-7".into()))
        );
    }

    #[test]
    fn test_track_info_joins_artists() {
        let track: SpotifyTrack = serde_json::from_str(
            r#"{"name": "Night Drive", "artists": [{"name": "A"}, {"name": "B"}]}"#,
        )
        .unwrap();
        assert_eq!(
            track_info(track),
            Some(TrackInfo { title: "Night Drive".into(), artist: "A, B".into() })
        );

        let untitled: SpotifyTrack = serde_json::from_str(r#"{"name": " "}"#).unwrap();
        assert_eq!(track_info(untitled), None);
    }

    #[test]
    fn test_no_resolver_is_unavailable() {
        assert_eq!(
            NoResolver.resolve("x"),
            Err(MetadataError::Service(ServiceError::Unavailable))
        );
    }
}
