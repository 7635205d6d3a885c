use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use image::{Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::capture::FrameSource;
use crate::common::Frame;
use crate::error::AppError;
use crate::pipeline::mailbox::{FrameSink, Offer};

/// Fully saturated, full-value RGB for a hue in degrees.
fn hue_to_rgb(hue: f32) -> [u8; 3] {
    let h = hue.rem_euclid(360.0) / 60.0;
    let x = 1.0 - (h % 2.0 - 1.0).abs();
    let (r, g, b) = match h as u32 {
        0 => (1.0, x, 0.0),
        1 => (x, 1.0, 0.0),
        2 => (0.0, 1.0, x),
        3 => (0.0, x, 1.0),
        4 => (x, 0.0, 1.0),
        _ => (1.0, 0.0, x),
    };
    [(r * 255.0) as u8, (g * 255.0) as u8, (b * 255.0) as u8]
}

/// A camera stand-in: a producer thread pushing a drifting hue gradient with
/// sensor-like noise at a fixed cadence.
///
/// Like a real capture session it owns a small number of buffers. While all
/// of them are held downstream, new frames are skipped rather than queued.
pub struct SyntheticCamera {
    id: Uuid,
    width: u32,
    height: u32,
    interval: Duration,
    max_buffers: usize,
    seed: u64,
    buffers_in_use: Arc<AtomicUsize>,
    cancel_token: CancellationToken,
    producer_thread: Option<std::thread::JoinHandle<()>>,
}

impl SyntheticCamera {
    pub fn new(width: u32, height: u32, interval: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            width,
            height,
            interval,
            max_buffers: 2,
            seed: 0x5eed,
            buffers_in_use: Arc::new(AtomicUsize::new(0)),
            cancel_token: CancellationToken::new(),
            producer_thread: None,
        }
    }

    pub fn with_max_buffers(mut self, max_buffers: usize) -> Self {
        self.max_buffers = max_buffers.max(1);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Frames produced by this camera that have not been released yet.
    pub fn buffers_in_use(&self) -> Arc<AtomicUsize> {
        self.buffers_in_use.clone()
    }

    pub fn is_running(&self) -> bool {
        self.producer_thread.is_some()
    }
}

impl FrameSource for SyntheticCamera {
    fn source_id(&self) -> Uuid {
        self.id
    }

    fn start(&mut self, sink: FrameSink) -> Result<(), AppError> {
        if self.producer_thread.is_some() {
            return Err(AppError::Session(format!("Camera {} already started", self.id)));
        }
        self.cancel_token = CancellationToken::new();
        let mut producer = Producer {
            id: self.id,
            width: self.width,
            height: self.height,
            interval: self.interval,
            max_buffers: self.max_buffers,
            rng: StdRng::seed_from_u64(self.seed),
            buffers_in_use: self.buffers_in_use.clone(),
            sink,
        };
        let cancel_token = self.cancel_token.clone();
        let thread = std::thread::Builder::new()
            .name(format!("camera-{}", self.id))
            .spawn(move || producer.run(cancel_token))
            .map_err(|e| AppError::Session(format!("Failed to start camera thread: {e}")))?;
        self.producer_thread = Some(thread);
        Ok(())
    }

    fn stop(&mut self) {
        self.cancel_token.cancel();
        if let Some(thread) = self.producer_thread.take() {
            if thread.join().is_err() {
                tracing::error!(camera = %self.id, "Camera thread panicked");
            }
        }
    }
}

impl Drop for SyntheticCamera {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Producer {
    id: Uuid,
    width: u32,
    height: u32,
    interval: Duration,
    max_buffers: usize,
    rng: StdRng,
    buffers_in_use: Arc<AtomicUsize>,
    sink: FrameSink,
}

impl Producer {
    fn render(&mut self, sequence: u64) -> RgbImage {
        let drift = (sequence % 360) as f32;
        let width = self.width.max(1) as f32;
        let mut image = RgbImage::new(self.width, self.height);
        for (x, _, pixel) in image.enumerate_pixels_mut() {
            let [r, g, b] = hue_to_rgb(drift + 360.0 * x as f32 / width);
            let noise: i16 = self.rng.random_range(-12..=12);
            let jitter = |c: u8| (c as i16 + noise).clamp(0, 255) as u8;
            *pixel = Rgb([jitter(r), jitter(g), jitter(b)]);
        }
        image
    }

    fn capture(&mut self, sequence: u64) -> Option<Frame> {
        if self.buffers_in_use.load(Ordering::Acquire) >= self.max_buffers {
            tracing::warn!(camera = %self.id, "Dropping frame: all capture buffers in use");
            return None;
        }
        self.buffers_in_use.fetch_add(1, Ordering::AcqRel);
        let buffers = self.buffers_in_use.clone();
        let image = self.render(sequence);
        Some(Frame::new(self.id, image).with_release(move || {
            buffers.fetch_sub(1, Ordering::AcqRel);
        }))
    }

    fn run(&mut self, cancel_token: CancellationToken) {
        tracing::info!(camera = %self.id, "Camera streaming");
        let mut sequence = 0u64;
        while !cancel_token.is_cancelled() {
            if let Some(frame) = self.capture(sequence) {
                if self.sink.offer(frame) == Offer::Closed {
                    tracing::info!(camera = %self.id, "Frame mailbox closed, stopping camera loop");
                    break;
                }
            }
            sequence += 1;
            std::thread::sleep(self.interval);
        }
        tracing::info!(camera = %self.id, frames = sequence, "Camera stopped");
    }
}
