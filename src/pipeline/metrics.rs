use std::time::Duration;

use crate::pipeline::mailbox::MailboxStats;

/// Timings collected while processing one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameMetrics {
    sample_duration: Option<Duration>,
    filter_duration: Option<Duration>,
    total_duration: Option<Duration>,
}

impl FrameMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sample_duration(&mut self, duration: Duration) {
        self.sample_duration = Some(duration);
    }

    pub fn record_filter_duration(&mut self, duration: Duration) {
        self.filter_duration = Some(duration);
    }

    pub fn record_total_duration(&mut self, duration: Duration) {
        self.total_duration = Some(duration);
    }

    /// `None` when the frame was not sampled.
    pub fn sample_duration(&self) -> Option<Duration> {
        self.sample_duration
    }

    pub fn filter_duration(&self) -> Option<Duration> {
        self.filter_duration
    }

    pub fn total_duration(&self) -> Option<Duration> {
        self.total_duration
    }
}

/// Counters for one scheduler run, returned when the session stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerReport {
    /// Frames taken from the mailbox for processing.
    pub admitted: u64,
    /// Frames handed to the renderer.
    pub rendered: u64,
    /// Admitted frames whose processing failed and were discarded.
    pub failed: u64,
    /// Sampling cycles that changed the filter.
    pub calibrations: u64,
    /// Everything the producer offered, including drops.
    pub mailbox: MailboxStats,
    /// Longest per-frame processing time seen.
    pub slowest_frame: Duration,
}

impl SchedulerReport {
    pub fn record(&mut self, metrics: &FrameMetrics) {
        if let Some(total) = metrics.total_duration() {
            self.slowest_frame = self.slowest_frame.max(total);
        }
    }

    /// Offered frames that never reached processing.
    pub fn dropped(&self) -> u64 {
        self.mailbox.superseded + self.mailbox.rejected
    }
}
