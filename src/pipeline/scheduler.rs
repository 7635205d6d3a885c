use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::common::Frame;
use crate::error::FrameError;
use crate::filter::{FilterControl, FilterProcessor};
use crate::pipeline::display::DisplayGeometry;
use crate::pipeline::mailbox::FrameMailbox;
use crate::pipeline::metrics::{FrameMetrics, SchedulerReport};
use crate::pipeline::renderer::{RenderedFrame, Renderer};
use crate::sampler::{extract_patch, RegionSampler};

/// Synchronous work the scheduler runs for each admitted frame.
pub trait FrameHandler: Send + Sync {
    fn process_frame(&self, frame: &Frame) -> Result<RenderedFrame, FrameError>;
}

/// The synchronous per-frame work: sample if asked to, then filter.
pub struct FramePipeline {
    processor: FilterProcessor,
    sampler: RegionSampler,
    control: FilterControl,
    geometry: watch::Receiver<DisplayGeometry>,
}

impl FramePipeline {
    pub fn new(
        processor: FilterProcessor,
        sampler: RegionSampler,
        control: FilterControl,
        geometry: watch::Receiver<DisplayGeometry>,
    ) -> Self {
        Self {
            processor,
            sampler,
            control,
            geometry,
        }
    }

    pub fn control(&self) -> &FilterControl {
        &self.control
    }
}

impl FrameHandler for FramePipeline {
    /// Runs one frame to completion. Sampling commits before filtering, so
    /// the frame that was sampled is already filtered with the result.
    #[instrument(level = "debug", skip_all, fields(frame_id = %frame.frame_id()))]
    fn process_frame(&self, frame: &Frame) -> Result<RenderedFrame, FrameError> {
        let started = Instant::now();
        let mut metrics = FrameMetrics::new();
        let image = frame.image();
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(FrameError::EmptyFrame(width, height));
        }

        let geometry = *self.geometry.borrow();
        let transform = geometry.transform(width, height);
        let mut settings = self.control.snapshot();
        let mut calibrated = false;

        if settings.sample_mode() {
            let sample_started = Instant::now();
            let sample_size = self.sampler.config().sample_size;
            match extract_patch(image, &transform, &geometry.viewport, sample_size) {
                Some(patch) => {
                    let calibration = self.sampler.calibrate(&patch, &settings);
                    if calibration.is_change() {
                        match self.control.commit_calibration(&calibration) {
                            Ok(committed) => {
                                calibrated = committed != settings;
                                settings = committed;
                            }
                            Err(err) => {
                                warn!(%err, "Discarding stale calibration");
                                settings = self.control.snapshot();
                            }
                        }
                    }
                }
                None => debug!("Sample region lies outside the frame"),
            }
            metrics.record_sample_duration(sample_started.elapsed());
        }

        let filter_started = Instant::now();
        let output = self.processor.process(image, &settings)?;
        metrics.record_filter_duration(filter_started.elapsed());
        metrics.record_total_duration(started.elapsed());

        Ok(RenderedFrame {
            frame_id: frame.frame_id(),
            source_id: frame.source_id(),
            captured_at: frame.captured_at(),
            image: output,
            transform,
            metrics,
            calibrated,
        })
    }
}

/// Pulls frames from the mailbox one at a time and hands results to the
/// renderer in admission order.
pub struct FrameScheduler {
    pipeline: Arc<dyn FrameHandler>,
    mailbox: FrameMailbox,
    renderer: Box<dyn Renderer>,
    cancel_token: CancellationToken,
}

impl FrameScheduler {
    pub fn new(
        pipeline: Arc<dyn FrameHandler>,
        mailbox: FrameMailbox,
        renderer: Box<dyn Renderer>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            pipeline,
            mailbox,
            renderer,
            cancel_token,
        }
    }

    pub fn spawn(self) -> JoinHandle<SchedulerReport> {
        tokio::spawn(self.run())
    }

    #[instrument(name = "frame_scheduler", skip_all)]
    pub async fn run(mut self) -> SchedulerReport {
        let mut report = SchedulerReport::default();
        info!("Frame scheduler started");

        loop {
            let frame = tokio::select! {
                biased;
                _ = self.cancel_token.cancelled() => break,
                frame = self.mailbox.recv() => match frame {
                    Some(frame) => frame,
                    None => break,
                },
            };
            report.admitted += 1;

            // The frame moves into the worker and is released there on every
            // path, including a panic unwinding out of the filter.
            let pipeline = self.pipeline.clone();
            let outcome = tokio::task::spawn_blocking(move || {
                let result = pipeline.process_frame(&frame);
                drop(frame);
                result
            })
            .await;

            let rendered = match outcome {
                Ok(Ok(rendered)) => rendered,
                Ok(Err(err)) => {
                    warn!(%err, "Dropping frame after processing error");
                    report.failed += 1;
                    continue;
                }
                Err(err) => {
                    error!(%err, "Frame worker failed");
                    report.failed += 1;
                    continue;
                }
            };

            if self.cancel_token.is_cancelled() {
                break;
            }
            report.record(&rendered.metrics);
            if rendered.calibrated {
                report.calibrations += 1;
            }
            debug!(frame_id = %rendered.frame_id, "Frame rendered");

            let delivered = tokio::select! {
                biased;
                _ = self.cancel_token.cancelled() => break,
                delivered = self.renderer.render(rendered) => delivered,
            };
            match delivered {
                Ok(()) => report.rendered += 1,
                Err(err) => {
                    error!(%err, "Renderer unavailable, stopping scheduler");
                    break;
                }
            }
        }

        self.mailbox.close();
        report.mailbox = self.mailbox.stats();
        info!(
            admitted = report.admitted,
            rendered = report.rendered,
            failed = report.failed,
            dropped = report.dropped(),
            "Frame scheduler stopped"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SamplerConfig;
    use crate::error::AppError;
    use crate::filter::{FilterEvent, FilterMode, FilterSettings, FilterState};
    use crate::pipeline::display::Viewport;
    use crate::pipeline::mailbox::mailbox;
    use crate::pipeline::renderer::ChannelRenderer;
    use crate::runtime::VisionRuntime;
    use async_trait::async_trait;
    use image::{Rgb, RgbImage};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use uuid::Uuid;

    struct SlowRenderer {
        delay: Duration,
        seen: Arc<Mutex<Vec<u8>>>,
    }

    #[async_trait]
    impl Renderer for SlowRenderer {
        async fn render(&mut self, frame: RenderedFrame) -> Result<(), AppError> {
            tokio::time::sleep(self.delay).await;
            self.seen.lock().unwrap().push(frame.image.get_pixel(0, 0)[0]);
            Ok(())
        }
    }

    /// Tracks how many frames are being processed at once and panics on
    /// frames whose first red value is `poison`.
    struct ScriptedHandler {
        delay: Duration,
        poison: Option<u8>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl ScriptedHandler {
        fn new(delay: Duration, poison: Option<u8>) -> Arc<Self> {
            Arc::new(Self {
                delay,
                poison,
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            })
        }
    }

    impl FrameHandler for ScriptedHandler {
        fn process_frame(&self, frame: &Frame) -> Result<RenderedFrame, FrameError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let seq = frame.image().get_pixel(0, 0)[0];
            if Some(seq) == self.poison {
                panic!("filter blew up on frame {seq}");
            }
            Ok(RenderedFrame {
                frame_id: frame.frame_id(),
                source_id: frame.source_id(),
                captured_at: frame.captured_at(),
                image: frame.image().clone(),
                transform: crate::pipeline::display::Affine::IDENTITY,
                metrics: FrameMetrics::new(),
                calibrated: false,
            })
        }
    }

    fn pipeline(control: FilterControl, geometry: DisplayGeometry) -> Arc<FramePipeline> {
        let runtime = VisionRuntime::init(2).expect("runtime");
        let config = SamplerConfig {
            sample_size: 10.0,
            ..SamplerConfig::default()
        };
        let (_tx, rx) = watch::channel(geometry);
        Arc::new(FramePipeline::new(
            FilterProcessor::new(runtime.clone()),
            RegionSampler::new(config, runtime),
            control,
            rx,
        ))
    }

    fn numbered(seq: u8, released: &Arc<AtomicUsize>) -> Frame {
        let released = released.clone();
        Frame::new(Uuid::new_v4(), RgbImage::from_pixel(4, 4, Rgb([seq, 0, 0]))).with_release(
            move || {
                released.fetch_add(1, Ordering::SeqCst);
            },
        )
    }

    async fn wait_for(seen: &Arc<Mutex<Vec<u8>>>, last: u8) {
        for _ in 0..200 {
            if seen.lock().unwrap().last() == Some(&last) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("frame {last} was never rendered");
    }

    #[tokio::test]
    async fn bursts_are_dropped_latest_frame_wins() {
        let released = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (sink, mailbox) = mailbox();
        let cancel = CancellationToken::new();
        let renderer = SlowRenderer {
            delay: Duration::from_millis(15),
            seen: seen.clone(),
        };
        let handle = FrameScheduler::new(
            pipeline(FilterControl::default(), DisplayGeometry::default()),
            mailbox,
            Box::new(renderer),
            cancel.clone(),
        )
        .spawn();

        for seq in 0..50u8 {
            sink.offer(numbered(seq, &released));
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        wait_for(&seen, 49).await;
        cancel.cancel();
        let report = handle.await.unwrap();

        let seen = seen.lock().unwrap().clone();
        assert!(seen.len() < 50, "every frame was processed: {seen:?}");
        assert!(seen.windows(2).all(|w| w[0] < w[1]), "out of order: {seen:?}");
        assert_eq!(report.rendered, seen.len() as u64);
        assert_eq!(report.mailbox.offered, 50);
        assert!(report.admitted + report.dropped() <= 50);
        assert_eq!(released.load(Ordering::SeqCst), 50);
    }

    #[tokio::test]
    async fn at_most_one_frame_is_processed_at_a_time() {
        let released = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handler = ScriptedHandler::new(Duration::from_millis(4), None);
        let (sink, mailbox) = mailbox();
        let cancel = CancellationToken::new();
        let renderer = SlowRenderer {
            delay: Duration::ZERO,
            seen: seen.clone(),
        };
        let handle =
            FrameScheduler::new(handler.clone(), mailbox, Box::new(renderer), cancel.clone())
                .spawn();

        for seq in 0..40u8 {
            sink.offer(numbered(seq, &released));
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        wait_for(&seen, 39).await;
        cancel.cancel();
        let report = handle.await.unwrap();

        assert_eq!(handler.max_in_flight.load(Ordering::SeqCst), 1);
        assert!(report.admitted < 40);
        assert_eq!(released.load(Ordering::SeqCst), 40);
    }

    #[tokio::test]
    async fn panicking_frame_is_contained_and_released() {
        let released = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handler = ScriptedHandler::new(Duration::ZERO, Some(99));
        let (sink, mailbox) = mailbox();
        let cancel = CancellationToken::new();
        let renderer = SlowRenderer {
            delay: Duration::ZERO,
            seen: seen.clone(),
        };
        let handle =
            FrameScheduler::new(handler, mailbox, Box::new(renderer), cancel.clone()).spawn();

        sink.offer(numbered(99, &released));
        tokio::time::sleep(Duration::from_millis(50)).await;
        sink.offer(numbered(7, &released));
        wait_for(&seen, 7).await;
        cancel.cancel();
        let report = handle.await.unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.rendered, 1);
        assert_eq!(*seen.lock().unwrap(), vec![7]);
        assert_eq!(released.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failing_frame_does_not_stall_the_stream() {
        let released = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (sink, mailbox) = mailbox();
        let cancel = CancellationToken::new();
        let renderer = SlowRenderer {
            delay: Duration::ZERO,
            seen: seen.clone(),
        };
        let handle = FrameScheduler::new(
            pipeline(FilterControl::default(), DisplayGeometry::default()),
            mailbox,
            Box::new(renderer),
            cancel.clone(),
        )
        .spawn();

        let empty = {
            let released = released.clone();
            Frame::new(Uuid::new_v4(), RgbImage::new(0, 0)).with_release(move || {
                released.fetch_add(1, Ordering::SeqCst);
            })
        };
        sink.offer(empty);
        tokio::time::sleep(Duration::from_millis(50)).await;
        sink.offer(numbered(7, &released));
        wait_for(&seen, 7).await;
        cancel.cancel();
        let report = handle.await.unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.rendered, 1);
        assert_eq!(released.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn sample_mode_commits_before_filtering() {
        let state = FilterState::new(0, 20, 50, 50, FilterMode::Binary).unwrap();
        let control = FilterControl::new(FilterSettings::new(state).with_sample_mode(true));
        let mut events = control.events();
        let geometry = DisplayGeometry {
            viewport: Viewport {
                width: 40.0,
                height: 40.0,
                density: 1.0,
            },
            ..DisplayGeometry::default()
        };
        let (sink, mailbox) = mailbox();
        let (renderer, mut rendered) = ChannelRenderer::new(2);
        let cancel = CancellationToken::new();
        let handle = FrameScheduler::new(
            pipeline(control.clone(), geometry),
            mailbox,
            Box::new(renderer),
            cancel.clone(),
        )
        .spawn();

        sink.offer(Frame::new(
            Uuid::new_v4(),
            RgbImage::from_pixel(40, 40, Rgb([0, 255, 0])),
        ));
        let frame = tokio::time::timeout(Duration::from_secs(2), rendered.recv())
            .await
            .expect("rendered in time")
            .expect("a frame");
        assert!(frame.calibrated);
        // the sampled green is already selected on the same frame
        assert_eq!(frame.image.get_pixel(20, 20).0, [255, 255, 255]);
        assert_eq!(control.snapshot().state().hue(), 120);
        assert!(matches!(
            events.try_recv(),
            Ok(FilterEvent::Calibrated { state, .. }) if state.hue() == 120
        ));

        cancel.cancel();
        let report = handle.await.unwrap();
        assert_eq!(report.calibrations, 1);
    }

    #[tokio::test]
    async fn scheduler_stops_when_the_ui_goes_away() {
        let (sink, mailbox) = mailbox();
        let (renderer, rendered) = ChannelRenderer::new(1);
        drop(rendered);
        let handle = FrameScheduler::new(
            pipeline(FilterControl::default(), DisplayGeometry::default()),
            mailbox,
            Box::new(renderer),
            CancellationToken::new(),
        )
        .spawn();
        sink.offer(Frame::new(Uuid::new_v4(), RgbImage::new(2, 2)));
        let report = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("scheduler stopped")
            .unwrap();
        assert_eq!(report.rendered, 0);
        assert!(sink.is_closed());
    }
}
