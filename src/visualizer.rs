use async_trait::async_trait;

use crate::client::{ClientError, ServerClient};
use crate::display::{CardUpdate, DisplaySurface};
use crate::types::{ControlResponse, VisualizerStatus};

/// Remote audio capture behind the visualizer
#[async_trait(?Send)]
pub trait CaptureControl {
    async fn start_capture(&self) -> Result<ControlResponse, ClientError>;
    async fn stop_capture(&self) -> Result<ControlResponse, ClientError>;
}

#[async_trait(?Send)]
impl CaptureControl for ServerClient {
    async fn start_capture(&self) -> Result<ControlResponse, ClientError> {
        self.visualizer_start().await
    }

    async fn stop_capture(&self) -> Result<ControlResponse, ClientError> {
        self.visualizer_stop().await
    }
}

/// Start/stop controls for the receiver's capture process. Requests are
/// skipped when the capture is already believed to be in the wanted state.
pub struct VisualizerControl<C, D> {
    api: C,
    surface: D,
    running: bool,
}

impl<C: CaptureControl, D: DisplaySurface> VisualizerControl<C, D> {
    pub fn new(api: C, surface: D) -> Self {
        Self {
            api,
            surface,
            running: false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub async fn start(&mut self) {
        if self.running {
            return;
        }

        match self.api.start_capture().await {
            Ok(response) if response.is_success() => {
                log::info!("Visualizer started");
                self.running = true;
                self.surface.apply(CardUpdate::visualizer(VisualizerStatus::Active));
            }
            Ok(response) => {
                log::warn!(
                    "Visualizer start refused: {} {}",
                    response.status,
                    response.message.unwrap_or_default()
                );
            }
            Err(e) => {
                log::error!("Error starting visualizer: {}", e);
                self.surface.apply(CardUpdate::visualizer(VisualizerStatus::Error));
            }
        }
    }

    pub async fn stop(&mut self) {
        if !self.running {
            return;
        }

        match self.api.stop_capture().await {
            Ok(response) if response.is_success() => {
                log::info!("Visualizer stopped");
                self.running = false;
                self.surface.apply(CardUpdate::visualizer(VisualizerStatus::Idle));
            }
            Ok(response) => {
                log::warn!(
                    "Visualizer stop refused: {} {}",
                    response.status,
                    response.message.unwrap_or_default()
                );
            }
            Err(e) => log::error!("Error stopping visualizer: {}", e),
        }
    }

    /// The push channel went away; the server tears down capture with it
    pub fn disconnected(&mut self) {
        self.running = false;
        self.surface.apply(CardUpdate::visualizer(VisualizerStatus::Disconnected));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::testing::RecordingSurface;
    use std::cell::Cell;

    #[derive(Default)]
    struct FakeCapture {
        starts: Cell<usize>,
        stops: Cell<usize>,
        status: &'static str,
        fail: bool,
    }

    impl FakeCapture {
        fn reply(&self) -> Result<ControlResponse, ClientError> {
            if self.fail {
                return Err(ClientError::Status(reqwest::StatusCode::BAD_GATEWAY));
            }
            Ok(ControlResponse {
                status: self.status.to_string(),
                message: None,
            })
        }
    }

    #[async_trait(?Send)]
    impl CaptureControl for FakeCapture {
        async fn start_capture(&self) -> Result<ControlResponse, ClientError> {
            self.starts.set(self.starts.get() + 1);
            self.reply()
        }

        async fn stop_capture(&self) -> Result<ControlResponse, ClientError> {
            self.stops.set(self.stops.get() + 1);
            self.reply()
        }
    }

    fn capture(status: &'static str) -> FakeCapture {
        FakeCapture {
            status,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let surface = RecordingSurface::default();
        let mut control = VisualizerControl::new(capture("success"), surface.clone());

        control.start().await;
        control.start().await;
        assert!(control.is_running());
        assert_eq!(control.api.starts.get(), 1);
        assert_eq!(surface.last().unwrap().visualizer, Some(VisualizerStatus::Active));

        control.stop().await;
        control.stop().await;
        assert!(!control.is_running());
        assert_eq!(control.api.stops.get(), 1);
        assert_eq!(surface.last().unwrap().visualizer, Some(VisualizerStatus::Idle));
    }

    #[tokio::test]
    async fn stop_without_start_sends_nothing() {
        let mut control = VisualizerControl::new(capture("success"), RecordingSurface::default());

        control.stop().await;
        assert_eq!(control.api.stops.get(), 0);
    }

    #[tokio::test]
    async fn refused_start_keeps_idle() {
        let surface = RecordingSurface::default();
        let mut control = VisualizerControl::new(capture("error"), surface.clone());

        control.start().await;
        assert!(!control.is_running());
        assert_eq!(surface.count(), 0);
    }

    #[tokio::test]
    async fn failed_start_shows_error() {
        let surface = RecordingSurface::default();
        let failing = FakeCapture {
            fail: true,
            ..Default::default()
        };
        let mut control = VisualizerControl::new(failing, surface.clone());

        control.start().await;
        assert!(!control.is_running());
        assert_eq!(surface.last().unwrap().visualizer, Some(VisualizerStatus::Error));
    }

    #[tokio::test]
    async fn disconnect_resets_running_state() {
        let surface = RecordingSurface::default();
        let mut control = VisualizerControl::new(capture("success"), surface.clone());

        control.start().await;
        control.disconnected();

        assert!(!control.is_running());
        assert_eq!(surface.last().unwrap().visualizer, Some(VisualizerStatus::Disconnected));

        control.start().await;
        assert_eq!(control.api.starts.get(), 2);
    }
}
