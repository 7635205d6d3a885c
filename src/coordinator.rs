use std::path::Path;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::capture::{FrameSource, StillImage};
use crate::color::{TermMap, TermMapCatalog};
use crate::config::Configuration;
use crate::error::AppError;
use crate::filter::{FilterControl, FilterProcessor, FilterSettings};
use crate::pipeline::display::{CameraOrientation, DisplayGeometry, Viewport};
use crate::pipeline::mailbox::{mailbox, FrameSink, Offer};
use crate::pipeline::metrics::SchedulerReport;
use crate::pipeline::renderer::Renderer;
use crate::pipeline::scheduler::{FramePipeline, FrameScheduler};
use crate::runtime::VisionRuntime;
use crate::sampler::RegionSampler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Streaming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    Camera,
    Image,
}

struct Session {
    id: Uuid,
    mode: SessionMode,
    sink: FrameSink,
    cancel_token: CancellationToken,
    scheduler: JoinHandle<SchedulerReport>,
    source: Option<Box<dyn FrameSource>>,
    resubmit: Option<JoinHandle<()>>,
}

/// Owns the shared filter state and runs at most one capture session at a
/// time, either a live camera or a still image.
pub struct Coordinator {
    configuration: Configuration,
    runtime: Arc<VisionRuntime>,
    catalog: Arc<TermMapCatalog>,
    control: FilterControl,
    pipeline: Arc<FramePipeline>,
    geometry: watch::Sender<DisplayGeometry>,
    camera_orientation: CameraOrientation,
    session: Option<Session>,
}

impl Coordinator {
    pub fn control(&self) -> &FilterControl {
        &self.control
    }

    pub fn catalog(&self) -> &Arc<TermMapCatalog> {
        &self.catalog
    }

    pub fn runtime(&self) -> &Arc<VisionRuntime> {
        &self.runtime
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    pub fn state(&self) -> SessionState {
        match self.session {
            Some(_) => SessionState::Streaming,
            None => SessionState::Idle,
        }
    }

    pub fn mode(&self) -> Option<SessionMode> {
        self.session.as_ref().map(|session| session.mode)
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.session.as_ref().map(|session| session.id)
    }

    pub fn geometry(&self) -> DisplayGeometry {
        *self.geometry.borrow()
    }

    pub fn set_viewport(&self, viewport: Viewport) {
        self.geometry.send_if_modified(|geometry| {
            let changed = geometry.viewport != viewport;
            geometry.viewport = viewport;
            changed
        });
    }

    /// Updates the camera orientation. Still images are always shown upright,
    /// so in image mode the value is kept for the next camera session.
    pub fn set_orientation(&mut self, orientation: CameraOrientation) {
        self.camera_orientation = orientation;
        if self.mode() == Some(SessionMode::Camera) {
            self.geometry
                .send_modify(|geometry| geometry.orientation = orientation);
        }
    }

    /// Selects the next term map of the catalog, or none after the last one.
    pub fn cycle_term_map(&self) -> Option<Arc<TermMap>> {
        let settings = self.control.snapshot();
        let current = settings.term_map().map(|map| map.id());
        let next = self.catalog.next_after(current);
        self.control.set_term_map(next.clone());
        next
    }

    #[instrument(skip_all)]
    pub async fn start_camera(
        &mut self,
        mut source: Box<dyn FrameSource>,
        renderer: Box<dyn Renderer>,
    ) -> Result<Uuid, AppError> {
        self.stop().await;
        let orientation = self.camera_orientation;
        self.geometry
            .send_modify(|geometry| geometry.orientation = orientation);

        let (sink, frames) = mailbox();
        let cancel_token = CancellationToken::new();
        let scheduler =
            FrameScheduler::new(self.pipeline.clone(), frames, renderer, cancel_token.clone())
                .spawn();

        if let Err(err) = source.start(sink.clone()) {
            error!(%err, "Camera failed to start");
            sink.close();
            cancel_token.cancel();
            if let Err(join_err) = scheduler.await {
                error!(%join_err, "Frame scheduler task failed");
            }
            return Err(err);
        }

        let id = source.source_id();
        info!(session = %id, "Camera session started");
        self.session = Some(Session {
            id,
            mode: SessionMode::Camera,
            sink,
            cancel_token,
            scheduler,
            source: Some(source),
            resubmit: None,
        });
        Ok(id)
    }

    /// Streams a still image: it is submitted once now and again after every
    /// filter or viewport change until the session stops.
    #[instrument(skip_all)]
    pub async fn start_image(
        &mut self,
        image: StillImage,
        renderer: Box<dyn Renderer>,
    ) -> Result<Uuid, AppError> {
        self.stop().await;
        self.geometry
            .send_modify(|geometry| geometry.orientation = CameraOrientation::default());

        let (sink, frames) = mailbox();
        let cancel_token = CancellationToken::new();
        let scheduler =
            FrameScheduler::new(self.pipeline.clone(), frames, renderer, cancel_token.clone())
                .spawn();

        let mut settings = self.control.subscribe();
        settings.borrow_and_update();
        let mut geometry = self.geometry.subscribe();
        geometry.borrow_and_update();
        sink.offer(image.frame());

        let id = image.source_id();
        let resubmit = tokio::spawn(resubmit_on_change(
            image,
            sink.clone(),
            settings,
            geometry,
            cancel_token.clone(),
        ));
        info!(session = %id, "Image session started");
        self.session = Some(Session {
            id,
            mode: SessionMode::Image,
            sink,
            cancel_token,
            scheduler,
            source: None,
            resubmit: Some(resubmit),
        });
        Ok(id)
    }

    /// Decodes `path` under the configured limits and starts an image session.
    pub async fn open_image(
        &mut self,
        path: impl AsRef<Path>,
        renderer: Box<dyn Renderer>,
    ) -> Result<Uuid, AppError> {
        let path = path.as_ref().to_path_buf();
        let max_pixels = self.configuration.scheduler.max_image_pixels;
        let max_decode_bytes = self.configuration.scheduler.max_decode_bytes;
        let image = tokio::task::spawn_blocking(move || {
            StillImage::open(&path, max_pixels, max_decode_bytes)
        })
        .await
        .map_err(|e| AppError::Session(format!("Image decode task failed: {e}")))??;
        self.start_image(image, renderer).await
    }

    /// Stops the running session and waits for every task it owns. Returns
    /// the scheduler's report, or `None` when idle.
    #[instrument(skip_all)]
    pub async fn stop(&mut self) -> Option<SchedulerReport> {
        let mut session = self.session.take()?;

        if let Some(mut source) = session.source.take() {
            if let Err(err) = tokio::task::spawn_blocking(move || source.stop()).await {
                error!(%err, "Failed to stop frame source");
            }
        }
        session.sink.close();
        session.cancel_token.cancel();

        if let Some(resubmit) = session.resubmit.take() {
            if let Err(err) = resubmit.await {
                warn!(%err, "Image resubmission task failed");
            }
        }
        match session.scheduler.await {
            Ok(report) => {
                info!(
                    session = %session.id,
                    rendered = report.rendered,
                    dropped = report.dropped(),
                    "Session stopped"
                );
                Some(report)
            }
            Err(err) => {
                error!(%err, session = %session.id, "Frame scheduler task failed");
                None
            }
        }
    }
}

async fn resubmit_on_change(
    image: StillImage,
    sink: FrameSink,
    mut settings: watch::Receiver<FilterSettings>,
    mut geometry: watch::Receiver<DisplayGeometry>,
    cancel_token: CancellationToken,
) {
    loop {
        let changed = tokio::select! {
            biased;
            _ = cancel_token.cancelled() => break,
            changed = settings.changed() => changed,
            changed = geometry.changed() => changed,
        };
        if changed.is_err() || sink.offer(image.frame()) == Offer::Closed {
            break;
        }
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        if let Some(session) = &self.session {
            session.sink.close();
            session.cancel_token.cancel();
        }
    }
}

pub struct CoordinatorBuilder {
    configuration: Configuration,
    catalog: Option<TermMapCatalog>,
    runtime: Option<Arc<VisionRuntime>>,
}

impl CoordinatorBuilder {
    pub fn new(configuration: Configuration) -> Self {
        Self {
            configuration,
            catalog: None,
            runtime: None,
        }
    }

    // Sets the viewport, this will override the default configuration.
    pub fn viewport(mut self, viewport: Viewport) -> Self {
        self.configuration.scheduler.viewport = viewport;
        self
    }

    // Sets the camera orientation, this will override the default configuration.
    pub fn orientation(mut self, orientation: CameraOrientation) -> Self {
        self.configuration.scheduler.orientation = orientation;
        self
    }

    // Enables sample mode, this will override the default configuration.
    pub fn sample_mode(mut self, sample_mode: bool) -> Self {
        self.configuration.filter.sample_mode = sample_mode;
        self
    }

    // Adjusts the vision pool size, this will override the default configuration.
    pub fn worker_threads(mut self, worker_threads: usize) -> Self {
        self.configuration.runtime.worker_threads = worker_threads;
        self
    }

    // Sets the still image pixel budget, this will override the default configuration.
    pub fn max_image_pixels(mut self, max_image_pixels: u64) -> Self {
        self.configuration.scheduler.max_image_pixels = max_image_pixels;
        self
    }

    pub fn catalog(mut self, catalog: TermMapCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn runtime(mut self, runtime: Arc<VisionRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> Result<Coordinator, AppError> {
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => VisionRuntime::init(self.configuration.runtime.worker_threads)?,
        };
        let catalog = match self.catalog {
            Some(catalog) => catalog,
            None => self.configuration.term_maps.load_catalog()?,
        };
        let settings = self.configuration.filter.to_settings(&catalog)?;
        let control = FilterControl::new(settings);

        let initial = self.configuration.scheduler.geometry();
        let (geometry, geometry_rx) = watch::channel(initial);
        let pipeline = Arc::new(FramePipeline::new(
            FilterProcessor::new(runtime.clone()),
            RegionSampler::new(self.configuration.sampler, runtime.clone()),
            control.clone(),
            geometry_rx,
        ));
        info!(term_maps = catalog.len(), "Coordinator ready");

        Ok(Coordinator {
            runtime,
            catalog: Arc::new(catalog),
            control,
            pipeline,
            geometry,
            camera_orientation: initial.orientation,
            session: None,
            configuration: self.configuration,
        })
    }
}
