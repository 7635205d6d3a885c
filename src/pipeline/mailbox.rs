use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;

use crate::common::Frame;

/// What happened to an offered frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// The slot was empty.
    Admitted,
    /// An unprocessed frame was waiting; it was dropped in favour of this one.
    Replaced,
    /// The session is stopping; the frame was released immediately.
    Closed,
}

#[derive(Debug, Default)]
struct Slot {
    frame: Option<Frame>,
    closed: bool,
}

#[derive(Debug, Default)]
struct Counters {
    offered: AtomicU64,
    superseded: AtomicU64,
    rejected: AtomicU64,
}

#[derive(Debug, Default)]
struct Shared {
    slot: Mutex<Slot>,
    ready: Notify,
    counters: Counters,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Slot> {
        // The slot is only ever swapped whole, so a poisoned lock still holds
        // a consistent value.
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn close(&self) {
        let pending = {
            let mut slot = self.lock();
            slot.closed = true;
            slot.frame.take()
        };
        drop(pending);
        self.ready.notify_one();
    }
}

/// Mailbox counters at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MailboxStats {
    pub offered: u64,
    pub superseded: u64,
    pub rejected: u64,
}

/// Producer half: frame sources push into this.
#[derive(Debug, Clone)]
pub struct FrameSink {
    shared: Arc<Shared>,
}

/// Consumer half, owned by the scheduler.
#[derive(Debug)]
pub struct FrameMailbox {
    shared: Arc<Shared>,
}

/// A one-slot, latest-only hand-off between a frame source and the scheduler.
///
/// Offering never blocks. A frame that is still waiting when a newer one
/// arrives is dropped, which runs its release hook.
pub fn mailbox() -> (FrameSink, FrameMailbox) {
    let shared = Arc::new(Shared::default());
    (
        FrameSink {
            shared: shared.clone(),
        },
        FrameMailbox { shared },
    )
}

impl FrameSink {
    pub fn offer(&self, frame: Frame) -> Offer {
        let counters = &self.shared.counters;
        counters.offered.fetch_add(1, Ordering::Relaxed);
        let (outcome, displaced) = {
            let mut slot = self.shared.lock();
            if slot.closed {
                (Offer::Closed, Some(frame))
            } else {
                match slot.frame.replace(frame) {
                    Some(old) => (Offer::Replaced, Some(old)),
                    None => (Offer::Admitted, None),
                }
            }
        };
        // Release outside the lock.
        drop(displaced);
        match outcome {
            Offer::Admitted => self.shared.ready.notify_one(),
            Offer::Replaced => {
                counters.superseded.fetch_add(1, Ordering::Relaxed);
            }
            Offer::Closed => {
                counters.rejected.fetch_add(1, Ordering::Relaxed);
            }
        }
        outcome
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Stops admission and releases any waiting frame.
    pub fn close(&self) {
        self.shared.close();
    }
}

impl FrameMailbox {
    /// Waits for the next frame. `None` once the mailbox is closed.
    pub async fn recv(&self) -> Option<Frame> {
        loop {
            {
                let mut slot = self.shared.lock();
                if slot.closed {
                    return None;
                }
                if let Some(frame) = slot.frame.take() {
                    return Some(frame);
                }
            }
            self.shared.ready.notified().await;
        }
    }

    pub fn try_take(&self) -> Option<Frame> {
        let mut slot = self.shared.lock();
        if slot.closed {
            return None;
        }
        slot.frame.take()
    }

    pub fn close(&self) {
        self.shared.close();
    }

    pub fn stats(&self) -> MailboxStats {
        let counters = &self.shared.counters;
        MailboxStats {
            offered: counters.offered.load(Ordering::Relaxed),
            superseded: counters.superseded.load(Ordering::Relaxed),
            rejected: counters.rejected.load(Ordering::Relaxed),
        }
    }
}

impl Drop for FrameMailbox {
    fn drop(&mut self) {
        self.shared.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use uuid::Uuid;

    fn tracked(released: &Arc<AtomicUsize>) -> Frame {
        let released = released.clone();
        Frame::new(Uuid::new_v4(), RgbImage::new(2, 2)).with_release(move || {
            released.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn newer_frame_replaces_and_releases_the_waiting_one() {
        let released = Arc::new(AtomicUsize::new(0));
        let (sink, mailbox) = mailbox();
        assert_eq!(sink.offer(tracked(&released)), Offer::Admitted);
        let latest = tracked(&released);
        let latest_id = latest.frame_id();
        assert_eq!(sink.offer(latest), Offer::Replaced);
        assert_eq!(released.load(Ordering::SeqCst), 1);

        let taken = mailbox.try_take().unwrap();
        assert_eq!(taken.frame_id(), latest_id);
        assert!(mailbox.try_take().is_none());
        drop(taken);
        assert_eq!(released.load(Ordering::SeqCst), 2);
        assert_eq!(
            mailbox.stats(),
            MailboxStats {
                offered: 2,
                superseded: 1,
                rejected: 0
            }
        );
    }

    #[test]
    fn closing_releases_pending_and_rejects_new_frames() {
        let released = Arc::new(AtomicUsize::new(0));
        let (sink, mailbox) = mailbox();
        sink.offer(tracked(&released));
        mailbox.close();
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert!(sink.is_closed());
        assert_eq!(sink.offer(tracked(&released)), Offer::Closed);
        assert_eq!(released.load(Ordering::SeqCst), 2);
        assert_eq!(mailbox.stats().rejected, 1);
    }

    #[tokio::test]
    async fn recv_wakes_on_offer_and_on_close() {
        let (sink, mailbox) = mailbox();
        let producer = sink.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            producer.offer(Frame::new(Uuid::new_v4(), RgbImage::new(1, 1)));
        });
        let frame = tokio::time::timeout(Duration::from_secs(2), mailbox.recv())
            .await
            .expect("frame in time");
        assert!(frame.is_some());

        let closer = sink.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            closer.close();
        });
        let frame = tokio::time::timeout(Duration::from_secs(2), mailbox.recv())
            .await
            .expect("close in time");
        assert!(frame.is_none());
    }

    #[test]
    fn dropping_the_consumer_closes_the_sink() {
        let released = Arc::new(AtomicUsize::new(0));
        let (sink, mailbox) = mailbox();
        sink.offer(tracked(&released));
        drop(mailbox);
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert_eq!(sink.offer(tracked(&released)), Offer::Closed);
    }
}
