use std::path::PathBuf;
use std::sync::Arc;

use crate::compositor::{self, Compositor};
use crate::state::SharedState;
use crate::types::{Artwork, ConnectionState, VisualizerStatus};

#[derive(Debug, Clone, PartialEq)]
pub struct TrackText {
    pub title: String,
    pub artist: String,
    pub album: String,
}

/// One atomic change to the now-playing card. `None` leaves a field as it is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CardUpdate {
    pub text: Option<TrackText>,
    pub artwork: Option<Artwork>,
    pub background: Option<Option<[u8; 3]>>,
    pub status: Option<ConnectionState>,
    pub visualizer: Option<VisualizerStatus>,
    pub debug_text: Option<Option<String>>,
}

impl CardUpdate {
    pub fn status(status: ConnectionState) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn visualizer(status: VisualizerStatus) -> Self {
        Self {
            visualizer: Some(status),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == CardUpdate::default()
    }
}

/// Where display mutations land
pub trait DisplaySurface {
    fn apply(&mut self, update: CardUpdate);
}

/// Surface backed by the shared display state, re-rendering `now_playing.png`
/// after every update
#[derive(Clone)]
pub struct CardSurface {
    state: SharedState,
    compositor: Arc<Compositor>,
    output: PathBuf,
}

impl CardSurface {
    pub fn new(state: SharedState, compositor: Arc<Compositor>, output: PathBuf) -> Self {
        Self {
            state,
            compositor,
            output,
        }
    }

    /// Render the current state without changing it
    pub fn redraw(&self) -> anyhow::Result<()> {
        let image = {
            let state_guard = self.state.read();
            self.compositor.render_card(&state_guard)?
        };
        compositor::write_png_atomic(&self.output, &image)
    }
}

impl DisplaySurface for CardSurface {
    fn apply(&mut self, update: CardUpdate) {
        if update.is_empty() {
            return;
        }

        {
            let mut state_guard = self.state.write();
            if let Some(text) = update.text {
                state_guard.title = text.title;
                state_guard.artist = text.artist;
                state_guard.album = text.album;
            }
            if let Some(artwork) = update.artwork {
                state_guard.artwork = artwork;
            }
            if let Some(background) = update.background {
                state_guard.background = background;
            }
            if let Some(status) = update.status {
                state_guard.connection = Some(status);
            }
            if let Some(visualizer) = update.visualizer {
                state_guard.visualizer = visualizer;
            }
            if let Some(debug_text) = update.debug_text {
                state_guard.debug_text = debug_text;
            }
        }

        if let Err(e) = self.redraw() {
            log::error!("Failed to render now-playing card: {:#}", e);
        }
    }
}
