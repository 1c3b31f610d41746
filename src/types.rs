use image::RgbaImage;
use serde::{Deserialize, Deserializer, Serialize};

/// Title the receiver reports when nothing is streaming.
pub const NOT_PLAYING: &str = "Not Playing";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TrackMetadata {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub artist: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub album: String,
    #[serde(default, alias = "artwork")]
    pub artwork_url: Option<String>,
    #[serde(default)]
    pub background_color: Option<String>,
    #[serde(default)]
    pub airplay_active: Option<bool>,
    #[serde(default, rename = "_debug")]
    pub debug: Option<DebugInfo>,
}

impl TrackMetadata {
    pub fn is_playing(&self) -> bool {
        self.title != NOT_PLAYING
    }
}

/// Receiver-side diagnostics attached to every metadata payload
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DebugInfo {
    #[serde(default)]
    pub pipe_exists: bool,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub permissions: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub owner: String,
    #[serde(default)]
    pub shairport_running: bool,
    #[serde(default)]
    pub last_error: Option<String>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Playing,
    Error,
}

impl ConnectionState {
    pub fn from_metadata(metadata: &TrackMetadata) -> Self {
        if metadata.is_playing() {
            ConnectionState::Playing
        } else {
            ConnectionState::Idle
        }
    }

    pub fn from_playing(playing: bool) -> Self {
        if playing {
            ConnectionState::Playing
        } else {
            ConnectionState::Idle
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "Waiting for AirPlay...",
            ConnectionState::Playing => "Connected - Playing",
            ConnectionState::Error => "Connection Error",
        }
    }

    pub fn color(&self) -> [u8; 3] {
        match self {
            ConnectionState::Idle => [0xFF, 0xA5, 0x00],
            ConnectionState::Playing => [0x4C, 0xAF, 0x50],
            ConnectionState::Error => [0xFF, 0x00, 0x00],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SpectrumFrame {
    #[serde(default, rename = "spectrum")]
    pub bins: Vec<f32>,
    #[serde(default)]
    pub rms_energy: f32,
}

/// Payload of the `playback_state` event. The receiver has sent both a bare
/// boolean and an object over time.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PlaybackStatePayload {
    Flag(bool),
    Object {
        #[serde(alias = "is_playing", alias = "state")]
        playing: bool,
    },
}

impl PlaybackStatePayload {
    pub fn playing(&self) -> bool {
        match self {
            PlaybackStatePayload::Flag(playing) => *playing,
            PlaybackStatePayload::Object { playing } => *playing,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisualizerStatus {
    Idle,
    Active,
    Error,
    Disconnected,
}

impl VisualizerStatus {
    pub fn label(&self) -> &'static str {
        match self {
            VisualizerStatus::Idle => "Visualizer: Idle",
            VisualizerStatus::Active => "Visualizer: Active",
            VisualizerStatus::Error => "Visualizer: Error",
            VisualizerStatus::Disconnected => "Visualizer: Disconnected",
        }
    }

    pub fn color(&self) -> [u8; 3] {
        match self {
            VisualizerStatus::Idle => [0xFF, 0x98, 0x00],
            VisualizerStatus::Active => [0x4C, 0xAF, 0x50],
            VisualizerStatus::Error | VisualizerStatus::Disconnected => [0xFF, 0x00, 0x00],
        }
    }
}

/// Reply of `/visualizer/start` and `/visualizer/stop`
#[derive(Debug, Clone, Deserialize)]
pub struct ControlResponse {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

impl ControlResponse {
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

/// Artwork shown on the now-playing card
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Artwork {
    #[default]
    Default,
    Image(RgbaImage),
}

/// Everything the now-playing card shows. Only mutated through a full
/// `CardUpdate` so a render never observes half an update.
#[derive(Debug, Clone)]
pub struct DisplayState {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub artwork: Artwork,
    pub background: Option<[u8; 3]>,
    pub connection: Option<ConnectionState>,
    pub visualizer: VisualizerStatus,
    pub debug_text: Option<String>,
}

impl Default for DisplayState {
    fn default() -> Self {
        Self {
            title: NOT_PLAYING.to_string(),
            artist: "No Artist".to_string(),
            album: "No Album".to_string(),
            artwork: Artwork::Default,
            background: None,
            connection: None,
            visualizer: VisualizerStatus::Idle,
            debug_text: None,
        }
    }
}
