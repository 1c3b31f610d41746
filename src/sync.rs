use async_trait::async_trait;
use std::time::Duration;

use crate::artwork::ArtworkLoader;
use crate::client::{ClientError, ServerClient};
use crate::compositor::parse_hex_color;
use crate::display::{CardUpdate, DisplaySurface, TrackText};
use crate::types::{Artwork, ConnectionState, DebugInfo, TrackMetadata, VisualizerStatus, NOT_PLAYING};

/// Consecutive failures before the display reports a connection error
pub const ERROR_THRESHOLD: u32 = 3;
pub const BACKOFF_FACTOR: f64 = 1.5;
/// Polling never slows past this multiple of the base interval
pub const MAX_INTERVAL_FACTOR: u32 = 5;

/// Source of now-playing snapshots
#[async_trait(?Send)]
pub trait MetadataSource {
    async fn fetch(&self) -> Result<TrackMetadata, ClientError>;
}

#[async_trait(?Send)]
impl MetadataSource for ServerClient {
    async fn fetch(&self) -> Result<TrackMetadata, ClientError> {
        self.now_playing().await
    }
}

/// Polling cadence with multiplicative backoff after repeated failures
#[derive(Debug, Clone)]
pub struct PollBackoff {
    base: Duration,
    current: Duration,
    consecutive_errors: u32,
}

impl PollBackoff {
    pub fn new(base: Duration) -> Self {
        Self {
            base,
            current: base,
            consecutive_errors: 0,
        }
    }

    pub fn interval(&self) -> Duration {
        self.current
    }

    pub fn max_interval(&self) -> Duration {
        self.base * MAX_INTERVAL_FACTOR
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    pub fn is_failing(&self) -> bool {
        self.consecutive_errors >= ERROR_THRESHOLD
    }

    /// Count a failure. Returns true once the error threshold is reached, in
    /// which case the interval has been stretched.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive_errors += 1;
        if self.is_failing() {
            self.current = self.current.mul_f64(BACKOFF_FACTOR).min(self.max_interval());
            true
        } else {
            false
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive_errors = 0;
        self.current = self.base;
    }
}

/// Keeps the now-playing card in step with the receiver.
///
/// The card is always derived from the last applied snapshot; identical
/// snapshots produce no display updates at all.
pub struct SyncAgent<D, A> {
    surface: D,
    artwork: A,
    backoff: PollBackoff,
    last_applied: Option<TrackMetadata>,
    shown_status: Option<ConnectionState>,
    shown_artwork_url: Option<String>,
    playing_override: Option<bool>,
}

impl<D: DisplaySurface, A: ArtworkLoader> SyncAgent<D, A> {
    pub fn new(surface: D, artwork: A, base_interval: Duration) -> Self {
        Self {
            surface,
            artwork,
            backoff: PollBackoff::new(base_interval),
            last_applied: None,
            shown_status: None,
            shown_artwork_url: None,
            playing_override: None,
        }
    }

    /// Delay before the next poll
    pub fn next_delay(&self) -> Duration {
        self.backoff.interval()
    }

    /// Derived state the card should show right now
    pub fn connection_state(&self) -> ConnectionState {
        if self.backoff.is_failing() {
            return ConnectionState::Error;
        }
        match (self.playing_override, &self.last_applied) {
            (Some(playing), _) => ConnectionState::from_playing(playing),
            (None, Some(metadata)) => ConnectionState::from_metadata(metadata),
            (None, None) => ConnectionState::Idle,
        }
    }

    /// Fetch once from `source` and apply the result. Returns true when the
    /// display changed.
    pub async fn poll_once<S: MetadataSource + ?Sized>(&mut self, source: &S) -> bool {
        match source.fetch().await {
            Ok(metadata) => self.apply_metadata(metadata).await,
            Err(e) => {
                log::error!("Error fetching metadata: {}", e);
                self.record_failure()
            }
        }
    }

    /// Apply a successfully received snapshot. Returns true when the display
    /// changed.
    pub async fn apply_metadata(&mut self, metadata: TrackMetadata) -> bool {
        self.backoff.record_success();
        self.playing_override = None;

        if self.last_applied.as_ref() == Some(&metadata) {
            // Same snapshot, but a recovered error or a cleared playback
            // override can still change what the card should show
            let update = CardUpdate {
                artwork: self.resolve_artwork(&metadata).await,
                status: self.status_change(),
                ..Default::default()
            };
            if update.is_empty() {
                return false;
            }
            self.surface.apply(update);
            return true;
        }

        log::info!(
            "New metadata received: {} - {} ({})",
            metadata.title,
            metadata.artist,
            metadata.album
        );

        let mut update = CardUpdate {
            text: Some(track_text(&metadata)),
            artwork: self.resolve_artwork(&metadata).await,
            background: Some(metadata.background_color.as_deref().and_then(parse_hex_color)),
            debug_text: Some(metadata.debug.as_ref().map(format_debug)),
            ..Default::default()
        };
        if !metadata.is_playing() {
            update.visualizer = Some(VisualizerStatus::Idle);
        }

        self.last_applied = Some(metadata);
        update.status = self.status_change();

        self.surface.apply(update);
        true
    }

    /// Count a failed fetch. Returns true when the display changed.
    pub fn record_failure(&mut self) -> bool {
        if !self.backoff.record_failure() {
            return false;
        }

        log::warn!(
            "{} consecutive metadata failures, next poll in {:?}",
            self.backoff.consecutive_errors(),
            self.backoff.interval()
        );
        self.refresh_status()
    }

    /// The push channel dropped; show the error right away
    pub fn connection_lost(&mut self) -> bool {
        while !self.backoff.is_failing() {
            self.backoff.record_failure();
        }
        self.refresh_status()
    }

    /// The push channel is back. Events only arrive over a live link, so the
    /// failure streak is over even if no new metadata follows.
    pub fn connection_restored(&mut self) -> bool {
        self.backoff.record_success();
        self.refresh_status()
    }

    /// Apply a `playback_state` event
    pub async fn set_playing(&mut self, playing: bool) -> bool {
        self.backoff.record_success();
        self.playing_override = Some(playing);

        let artwork = if playing {
            match self.last_applied.clone() {
                Some(metadata) => self.resolve_artwork(&metadata).await,
                None => None,
            }
        } else {
            self.shown_artwork_url.take().map(|_| Artwork::Default)
        };
        let update = CardUpdate {
            artwork,
            status: self.status_change(),
            ..Default::default()
        };

        if update.is_empty() {
            return false;
        }
        self.surface.apply(update);
        true
    }

    fn refresh_status(&mut self) -> bool {
        match self.status_change() {
            Some(status) => {
                self.surface.apply(CardUpdate::status(status));
                true
            }
            None => false,
        }
    }

    /// The derived status, if it differs from what the card shows
    fn status_change(&mut self) -> Option<ConnectionState> {
        let status = self.connection_state();
        if self.shown_status == Some(status) {
            return None;
        }

        self.shown_status = Some(status);
        Some(status)
    }

    /// Work out the artwork change for a new snapshot, if any. Artwork is only
    /// reloaded when its URL changes and falls back to the default on failure.
    async fn resolve_artwork(&mut self, metadata: &TrackMetadata) -> Option<Artwork> {
        let wanted = metadata
            .artwork_url
            .as_deref()
            .filter(|url| metadata.is_playing() && !url.is_empty());

        match wanted {
            Some(url) if self.shown_artwork_url.as_deref() == Some(url) => None,
            Some(url) => {
                self.shown_artwork_url = Some(url.to_string());
                match self.artwork.load(url).await {
                    Ok(image) => Some(Artwork::Image(image)),
                    Err(e) => {
                        log::error!("Failed to load artwork image: {:#}", e);
                        Some(Artwork::Default)
                    }
                }
            }
            None => self.shown_artwork_url.take().map(|_| Artwork::Default),
        }
    }
}

fn or_fallback(value: &str, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

fn track_text(metadata: &TrackMetadata) -> TrackText {
    TrackText {
        title: or_fallback(&metadata.title, NOT_PLAYING),
        artist: or_fallback(&metadata.artist, "No Artist"),
        album: or_fallback(&metadata.album, "No Album"),
    }
}

fn format_debug(debug: &DebugInfo) -> String {
    format!(
        "Metadata Pipe: {}\nPermissions: {} ({})\nShairport Running: {}\nLast Error: {}",
        if debug.pipe_exists { "Exists" } else { "Missing" },
        debug.permissions,
        debug.owner,
        if debug.shairport_running { "Yes" } else { "No" },
        debug.last_error.as_deref().unwrap_or("None"),
    )
}
