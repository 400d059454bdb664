//! Bounded, lossy publication of processed frames.
//!
//! The loop never blocks on a consumer: when the channel is full the oldest
//! queued event is discarded to make room for the newest.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::time::Duration;

use super::FrameEvent;

pub(crate) struct FramePublisher {
    tx: Sender<FrameEvent>,
    // Held to evict the oldest event on overflow.
    overflow: Receiver<FrameEvent>,
    dropped: u64,
}

/// Consumer side of a session's frame channel.
#[derive(Clone)]
pub struct FrameSubscriber {
    rx: Receiver<FrameEvent>,
}

pub(crate) fn channel(capacity: usize) -> (FramePublisher, FrameSubscriber) {
    let (tx, rx) = bounded(capacity.max(1));
    (
        FramePublisher {
            tx,
            overflow: rx.clone(),
            dropped: 0,
        },
        FrameSubscriber { rx },
    )
}

impl FramePublisher {
    /// Queue `event`, evicting older events if the channel is full. Returns
    /// how many events were evicted.
    pub(crate) fn publish(&mut self, event: FrameEvent) -> u64 {
        let mut pending = event;
        let mut evicted = 0;
        loop {
            match self.tx.try_send(pending) {
                Ok(()) => break,
                Err(TrySendError::Full(back)) => {
                    pending = back;
                    if self.overflow.try_recv().is_ok() {
                        evicted += 1;
                    }
                }
                // Only reachable once every receiver is gone; we hold one.
                Err(TrySendError::Disconnected(_)) => break,
            }
        }
        if evicted > 0 {
            self.dropped += evicted;
            log::debug!("publish: dropped {} stale frame(s)", evicted);
        }
        evicted
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl FrameSubscriber {
    /// Block until the next event. `None` once the session has ended and the
    /// queue is drained.
    pub fn recv(&self) -> Option<FrameEvent> {
        self.rx.recv().ok()
    }

    /// Like `recv`, giving up after `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<FrameEvent> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Drain whatever is queued without blocking.
    pub fn try_iter(&self) -> impl Iterator<Item = FrameEvent> + '_ {
        self.rx.try_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarm::AlarmState;
    use crate::frame::Frame;

    fn event(sequence: u64) -> FrameEvent {
        FrameEvent {
            sequence,
            frame: Frame::filled(2, 2, [0, 0, 0]),
            detections: Vec::new(),
            highest_tier: None,
            alarm: AlarmState::Idle,
        }
    }

    #[test]
    fn full_channel_drops_the_oldest() {
        let (mut publisher, subscriber) = channel(2);
        assert_eq!(publisher.publish(event(1)), 0);
        assert_eq!(publisher.publish(event(2)), 0);
        assert_eq!(publisher.publish(event(3)), 1);
        assert_eq!(publisher.dropped(), 1);

        let seqs: Vec<u64> = subscriber.try_iter().map(|e| e.sequence).collect();
        assert_eq!(seqs, vec![2, 3]);
    }

    #[test]
    fn publish_never_blocks_without_a_consumer() {
        let (mut publisher, subscriber) = channel(1);
        drop(subscriber);
        for seq in 0..100 {
            publisher.publish(event(seq));
        }
        assert_eq!(publisher.dropped(), 99);
    }

    #[test]
    fn recv_ends_after_publisher_drops() {
        let (mut publisher, subscriber) = channel(4);
        publisher.publish(event(7));
        drop(publisher);
        assert_eq!(subscriber.recv().map(|e| e.sequence), Some(7));
        assert!(subscriber.recv().is_none());
        assert!(subscriber
            .recv_timeout(Duration::from_millis(10))
            .is_none());
    }
}
