use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::artwork::{ArtworkLoader, HttpArtworkLoader};
use crate::client::ServerClient;
use crate::compositor::{self, Compositor};
use crate::config::{Config, Transport, VisualizerAction};
use crate::display::{CardSurface, DisplaySurface};
use crate::push::{PushClient, PushEvent};
use crate::spectrum::SpectrumRenderer;
use crate::state;
use crate::sync::SyncAgent;
use crate::types::SpectrumFrame;
use crate::visualizer::{CaptureControl, VisualizerControl};

pub const NOW_PLAYING_FILE: &str = "now_playing.png";
pub const SPECTRUM_FILE: &str = "spectrum.png";

/// Renders visualization frames to disk
struct SpectrumOutput {
    renderer: SpectrumRenderer,
    path: PathBuf,
}

impl SpectrumOutput {
    fn draw(&mut self, frame: &SpectrumFrame) {
        if let Some(canvas) = self.renderer.render(frame) {
            if let Err(e) = compositor::write_png_atomic(&self.path, canvas) {
                log::error!("Failed to write spectrum frame: {:#}", e);
            }
        }
    }
}

/// Main display loop: polling, push events and shutdown, all on one task
pub async fn run(config: Config, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    std::fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("Failed to create output directory {:?}", config.output_dir))?;

    let compositor = Arc::new(
        Compositor::new(config.font.as_deref())
            .context("Failed to initialize compositor - font may be missing")?,
    );
    let surface = CardSurface::new(
        state::create_state(),
        compositor,
        config.output_dir.join(NOW_PLAYING_FILE),
    );
    surface.redraw().context("Failed to render initial card")?;
    log::info!("Writing display frames to {:?}", config.output_dir);

    let client = ServerClient::new(&config.server_url, config.request_timeout)
        .context("Failed to build HTTP client")?;

    let mut agent = SyncAgent::new(
        surface.clone(),
        HttpArtworkLoader::new(client.clone()),
        config.poll_interval,
    );
    let mut visualizer = VisualizerControl::new(client.clone(), surface.clone());
    let mut spectrum = config.spectrum.then(|| SpectrumOutput {
        renderer: SpectrumRenderer::new(
            config.spectrum_width,
            config.spectrum_height,
            config.meter_height,
        ),
        path: config.output_dir.join(SPECTRUM_FILE),
    });

    let (event_tx, mut event_rx) = mpsc::channel(64);
    let push_task = if config.uses_push() {
        let push = PushClient::new(client.websocket_url(), event_tx);
        Some(tokio::spawn(push.run(shutdown.clone())))
    } else {
        drop(event_tx);
        None
    };

    if config.start_visualizer {
        visualizer.start().await;
    }

    let polling = config.transport == Transport::Poll;
    let poll_timer = tokio::time::sleep_until(Instant::now());
    tokio::pin!(poll_timer);

    log::info!(
        "Following {} via {:?}",
        client.base_url(),
        config.transport
    );

    loop {
        tokio::select! {
            _ = &mut poll_timer, if polling => {
                agent.poll_once(&client).await;
                poll_timer.as_mut().reset(Instant::now() + agent.next_delay());
            }
            Some(event) = event_rx.recv() => {
                handle_event(event, config.transport, &mut agent, &mut visualizer, spectrum.as_mut()).await;
            }
            _ = shutdown.changed() => break,
        }
    }

    log::info!("Shutting down display");
    visualizer.stop().await;

    if let Some(task) = push_task {
        if let Err(e) = task.await {
            log::error!("Push channel task failed: {}", e);
        }
    }

    Ok(())
}

async fn handle_event<D, A, C, V>(
    event: PushEvent,
    transport: Transport,
    agent: &mut SyncAgent<D, A>,
    visualizer: &mut VisualizerControl<C, V>,
    spectrum: Option<&mut SpectrumOutput>,
) where
    D: DisplaySurface,
    A: ArtworkLoader,
    C: CaptureControl,
    V: DisplaySurface,
{
    let push_driven = transport == Transport::Push;

    match event {
        PushEvent::Connected => {
            log::info!("Push channel connected");
            if push_driven {
                agent.connection_restored();
            }
        }
        PushEvent::Disconnected => {
            log::info!("Disconnected from server");
            visualizer.disconnected();
            if push_driven {
                agent.connection_lost();
            }
        }
        PushEvent::MetadataUpdate(metadata) if push_driven => {
            agent.apply_metadata(metadata).await;
        }
        PushEvent::PlaybackState(playing) if push_driven => {
            log::debug!("Playback state: {}", if playing { "playing" } else { "stopped" });
            agent.set_playing(playing).await;
        }
        PushEvent::MetadataUpdate(_) | PushEvent::PlaybackState(_) => {
            // Polling owns the metadata in this mode
        }
        PushEvent::VisualizationData(frame) => {
            if let Some(output) = spectrum {
                output.draw(&frame);
            }
        }
    }
}

/// One-shot start/stop of the receiver's audio capture
pub async fn control_visualizer(client: &ServerClient, action: VisualizerAction) -> Result<()> {
    let response = match action {
        VisualizerAction::Start => client.visualizer_start().await,
        VisualizerAction::Stop => client.visualizer_stop().await,
    }
    .with_context(|| format!("Failed to reach {}", client.base_url()))?;

    if !response.is_success() {
        anyhow::bail!(
            "Receiver answered {}: {}",
            response.status,
            response.message.unwrap_or_default()
        );
    }

    log::info!("Visualizer {:?} acknowledged", action);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientError;
    use crate::display::testing::RecordingSurface;
    use crate::types::{ConnectionState, ControlResponse, TrackMetadata, VisualizerStatus};
    use async_trait::async_trait;
    use image::RgbaImage;
    use std::time::Duration;

    struct NoArtwork;

    #[async_trait(?Send)]
    impl ArtworkLoader for NoArtwork {
        async fn load(&self, _url: &str) -> Result<RgbaImage> {
            anyhow::bail!("offline")
        }
    }

    struct AlwaysSuccess;

    #[async_trait(?Send)]
    impl CaptureControl for AlwaysSuccess {
        async fn start_capture(&self) -> Result<ControlResponse, ClientError> {
            Ok(ControlResponse {
                status: "success".to_string(),
                message: None,
            })
        }

        async fn stop_capture(&self) -> Result<ControlResponse, ClientError> {
            self.start_capture().await
        }
    }

    fn song() -> TrackMetadata {
        TrackMetadata {
            title: "Song".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn push_metadata_is_ignored_while_polling() {
        let surface = RecordingSurface::default();
        let mut agent = SyncAgent::new(surface.clone(), NoArtwork, Duration::from_secs(1));
        let mut visualizer = VisualizerControl::new(AlwaysSuccess, surface.clone());

        handle_event(
            PushEvent::MetadataUpdate(song()),
            Transport::Poll,
            &mut agent,
            &mut visualizer,
            None,
        )
        .await;
        assert_eq!(surface.count(), 0);

        handle_event(
            PushEvent::MetadataUpdate(song()),
            Transport::Push,
            &mut agent,
            &mut visualizer,
            None,
        )
        .await;
        assert_eq!(surface.last().unwrap().status, Some(ConnectionState::Playing));
    }

    #[tokio::test]
    async fn disconnect_marks_visualizer_and_push_status() {
        let surface = RecordingSurface::default();
        let mut agent = SyncAgent::new(surface.clone(), NoArtwork, Duration::from_secs(1));
        let mut visualizer = VisualizerControl::new(AlwaysSuccess, surface.clone());
        visualizer.start().await;

        handle_event(PushEvent::Disconnected, Transport::Push, &mut agent, &mut visualizer, None).await;

        assert!(!visualizer.is_running());
        let updates = surface.updates.borrow();
        assert!(updates
            .iter()
            .any(|u| u.visualizer == Some(VisualizerStatus::Disconnected)));
        assert_eq!(updates.last().unwrap().status, Some(ConnectionState::Error));
    }

    #[tokio::test]
    async fn reconnect_clears_push_error() {
        let surface = RecordingSurface::default();
        let mut agent = SyncAgent::new(surface.clone(), NoArtwork, Duration::from_secs(1));
        let mut visualizer = VisualizerControl::new(AlwaysSuccess, surface.clone());

        handle_event(PushEvent::MetadataUpdate(song()), Transport::Push, &mut agent, &mut visualizer, None).await;
        handle_event(PushEvent::Disconnected, Transport::Push, &mut agent, &mut visualizer, None).await;
        assert_eq!(agent.connection_state(), ConnectionState::Error);

        handle_event(PushEvent::Connected, Transport::Push, &mut agent, &mut visualizer, None).await;
        assert_eq!(agent.connection_state(), ConnectionState::Playing);
        assert_eq!(surface.last().unwrap().status, Some(ConnectionState::Playing));
    }

    #[tokio::test]
    async fn visualization_frames_are_written_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SPECTRUM_FILE);

        let surface = RecordingSurface::default();
        let mut agent = SyncAgent::new(surface.clone(), NoArtwork, Duration::from_secs(1));
        let mut visualizer = VisualizerControl::new(AlwaysSuccess, surface);
        let mut output = SpectrumOutput {
            renderer: SpectrumRenderer::new(32, 16, 4),
            path: path.clone(),
        };
        let frame = SpectrumFrame {
            bins: vec![-50.0; 8],
            rms_energy: 0.2,
        };

        handle_event(
            PushEvent::VisualizationData(frame),
            Transport::Poll,
            &mut agent,
            &mut visualizer,
            Some(&mut output),
        )
        .await;

        assert!(path.exists());
    }
}
