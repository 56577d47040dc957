use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::models::audio_frame::{AudioFormat, AudioFrame};
use crate::models::config::BackpressurePolicy;
use crate::models::diagnostics::HandoffStats;

/// Outcome of a consumer-side take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handoff {
    /// A frame was moved into the caller's buffer.
    Ready,
    /// The buffer was shut down; no more frames will be delivered.
    Stopped,
    /// The timeout elapsed with no frame available.
    TimedOut,
}

enum Store {
    Latest {
        samples: Vec<i16>,
        dirty: bool,
    },
    Queue {
        frames: VecDeque<Vec<i16>>,
        capacity: usize,
        spare: Vec<Vec<i16>>,
    },
}

/// Lock-protected state shared by producer and consumer.
struct HandoffSlot {
    store: Store,
    stopped: bool,
    published: u64,
    taken: u64,
    dropped: u64,
}

impl HandoffSlot {
    fn new(policy: BackpressurePolicy, samples_hint: usize) -> Self {
        let store = match policy {
            BackpressurePolicy::LatestFrame => Store::Latest {
                samples: Vec::with_capacity(samples_hint),
                dirty: false,
            },
            BackpressurePolicy::BoundedQueue { capacity } => Store::Queue {
                frames: VecDeque::with_capacity(capacity),
                capacity,
                spare: (0..capacity)
                    .map(|_| Vec::with_capacity(samples_hint))
                    .collect(),
            },
        };
        Self {
            store,
            stopped: false,
            published: 0,
            taken: 0,
            dropped: 0,
        }
    }

    /// Store `samples`; returns true if a frame was lost doing so.
    fn put(&mut self, samples: &[i16]) -> bool {
        self.published += 1;
        let lost = match &mut self.store {
            Store::Latest { samples: slot, dirty } => {
                let overwrote = *dirty;
                slot.clear();
                slot.extend_from_slice(samples);
                *dirty = true;
                overwrote
            }
            Store::Queue {
                frames,
                capacity,
                spare,
            } => {
                if frames.len() >= *capacity {
                    true
                } else {
                    let mut buf = spare
                        .pop()
                        .unwrap_or_else(|| Vec::with_capacity(samples.len()));
                    buf.clear();
                    buf.extend_from_slice(samples);
                    frames.push_back(buf);
                    false
                }
            }
        };
        if lost {
            self.dropped += 1;
        }
        lost
    }

    /// Move the next frame into `out`, handing `out`'s old buffer back for reuse.
    fn take_into(&mut self, out: &mut Vec<i16>) -> bool {
        let taken = match &mut self.store {
            Store::Latest { samples, dirty } => {
                if *dirty {
                    std::mem::swap(samples, out);
                    *dirty = false;
                    true
                } else {
                    false
                }
            }
            Store::Queue {
                frames,
                capacity,
                spare,
            } => match frames.pop_front() {
                Some(mut buf) => {
                    std::mem::swap(&mut buf, out);
                    if spare.len() <= *capacity {
                        spare.push(buf);
                    }
                    true
                }
                None => false,
            },
        };
        if taken {
            self.taken += 1;
        }
        taken
    }

    fn pending(&self) -> usize {
        match &self.store {
            Store::Latest { dirty, .. } => usize::from(*dirty),
            Store::Queue { frames, .. } => frames.len(),
        }
    }

    fn clear(&mut self) {
        match &mut self.store {
            Store::Latest { samples, dirty } => {
                samples.clear();
                *dirty = false;
            }
            Store::Queue {
                frames,
                capacity,
                spare,
            } => {
                while let Some(buf) = frames.pop_front() {
                    if spare.len() <= *capacity {
                        spare.push(buf);
                    }
                }
            }
        }
    }
}

/// Single-producer/single-consumer rendezvous between the real-time capture
/// callback and the forwarding thread.
///
/// All slot access happens under one `parking_lot::Mutex`. Data-ready and stop
/// wakeups share one `Condvar`, so `shutdown()` always releases a blocked
/// consumer. Overflow is never an error: it is counted in `dropped`.
///
/// Policies:
/// - `LatestFrame`: one slot, a new frame overwrites an unconsumed one
///   (at most one frame of staleness).
/// - `BoundedQueue`: FIFO of `capacity` frames, the incoming frame is
///   dropped when full. The producer never blocks.
pub struct HandoffBuffer {
    format: AudioFormat,
    policy: BackpressurePolicy,
    slot: Mutex<HandoffSlot>,
    ready: Condvar,
}

impl HandoffBuffer {
    /// Create a buffer; `samples_hint` pre-sizes slot storage so the producer
    /// does not allocate in steady state.
    pub fn new(policy: BackpressurePolicy, format: AudioFormat, samples_hint: usize) -> Self {
        Self {
            format,
            policy,
            slot: Mutex::new(HandoffSlot::new(policy, samples_hint)),
            ready: Condvar::new(),
        }
    }

    /// Producer side. Copies `samples` in and wakes the consumer.
    ///
    /// Ignored after `shutdown()`.
    pub fn publish(&self, samples: &[i16]) {
        {
            let mut slot = self.slot.lock();
            if slot.stopped {
                return;
            }
            slot.put(samples);
        }
        self.ready.notify_one();
    }

    /// Consumer side. Blocks until a frame is available, the buffer is shut
    /// down, or `timeout` elapses (`None` waits indefinitely).
    ///
    /// Shutdown wins over pending data.
    pub fn wait_and_take(&self, out: &mut AudioFrame, timeout: Option<Duration>) -> Handoff {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut slot = self.slot.lock();
        loop {
            if slot.stopped {
                return Handoff::Stopped;
            }
            if slot.take_into(&mut out.samples) {
                out.format = self.format;
                return Handoff::Ready;
            }
            match deadline {
                None => self.ready.wait(&mut slot),
                Some(deadline) => {
                    if self.ready.wait_until(&mut slot, deadline).timed_out() {
                        if slot.stopped {
                            return Handoff::Stopped;
                        }
                        if slot.take_into(&mut out.samples) {
                            out.format = self.format;
                            return Handoff::Ready;
                        }
                        return Handoff::TimedOut;
                    }
                }
            }
        }
    }

    /// Non-blocking take. Returns false when nothing is pending or after shutdown.
    pub fn try_take(&self, out: &mut AudioFrame) -> bool {
        let mut slot = self.slot.lock();
        if slot.stopped || !slot.take_into(&mut out.samples) {
            return false;
        }
        out.format = self.format;
        true
    }

    /// Mark the buffer stopped and wake every waiter.
    pub fn shutdown(&self) {
        self.slot.lock().stopped = true;
        self.ready.notify_all();
    }

    pub fn is_shut_down(&self) -> bool {
        self.slot.lock().stopped
    }

    /// Drop pending frames, zero the counters and re-arm after a shutdown.
    pub fn reset(&self) {
        let mut slot = self.slot.lock();
        slot.clear();
        slot.stopped = false;
        slot.published = 0;
        slot.taken = 0;
        slot.dropped = 0;
    }

    pub fn stats(&self) -> HandoffStats {
        let slot = self.slot.lock();
        HandoffStats {
            published: slot.published,
            taken: slot.taken,
            dropped: slot.dropped,
            pending: slot.pending(),
        }
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn policy(&self) -> BackpressurePolicy {
        self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn format() -> AudioFormat {
        AudioFormat::new(48_000, 2)
    }

    fn latest() -> HandoffBuffer {
        HandoffBuffer::new(BackpressurePolicy::LatestFrame, format(), 384)
    }

    fn queue(capacity: usize) -> HandoffBuffer {
        HandoffBuffer::new(BackpressurePolicy::BoundedQueue { capacity }, format(), 384)
    }

    #[test]
    fn latest_frame_keeps_only_last_publish() {
        let buf = latest();
        for i in 0..5i16 {
            buf.publish(&[i, i, i, i]);
        }

        let mut out = AudioFrame::new(format());
        assert_eq!(buf.wait_and_take(&mut out, None), Handoff::Ready);
        assert_eq!(out.samples, vec![4, 4, 4, 4]);

        let stats = buf.stats();
        assert_eq!(stats.published, 5);
        assert_eq!(stats.dropped, 4);
        assert_eq!(stats.taken, 1);
        assert_eq!(stats.pending, 0);

        assert!(!buf.try_take(&mut out));
    }

    #[test]
    fn latest_frame_resizes_on_size_change() {
        let buf = latest();
        let mut out = AudioFrame::new(format());

        buf.publish(&[1, 2, 3, 4]);
        assert!(buf.try_take(&mut out));
        assert_eq!(out.samples.len(), 4);

        buf.publish(&[9; 10]);
        assert!(buf.try_take(&mut out));
        assert_eq!(out.samples, vec![9; 10]);

        buf.publish(&[7, 7]);
        assert!(buf.try_take(&mut out));
        assert_eq!(out.samples, vec![7, 7]);
        assert_eq!(buf.stats().dropped, 0);
    }

    #[test]
    fn bounded_queue_keeps_first_capacity_frames_in_order() {
        let buf = queue(10);
        for i in 0..13i16 {
            buf.publish(&[i, -i]);
        }

        let stats = buf.stats();
        assert_eq!(stats.pending, 10);
        assert_eq!(stats.dropped, 3);

        let mut out = AudioFrame::new(format());
        for i in 0..10i16 {
            assert!(buf.try_take(&mut out));
            assert_eq!(out.samples, vec![i, -i]);
        }
        assert!(!buf.try_take(&mut out));
        assert_eq!(buf.stats().taken, 10);
    }

    #[test]
    fn queue_accepts_again_after_drain() {
        let buf = queue(2);
        let mut out = AudioFrame::new(format());

        buf.publish(&[1]);
        buf.publish(&[2]);
        buf.publish(&[3]); // dropped
        assert!(buf.try_take(&mut out));
        buf.publish(&[4]);

        assert!(buf.try_take(&mut out));
        assert_eq!(out.samples, vec![2]);
        assert!(buf.try_take(&mut out));
        assert_eq!(out.samples, vec![4]);
        assert_eq!(buf.stats().dropped, 1);
    }

    #[test]
    fn take_after_shutdown_returns_stopped() {
        let buf = latest();
        buf.publish(&[1, 2]);
        buf.shutdown();

        let mut out = AudioFrame::new(format());
        let start = Instant::now();
        assert_eq!(buf.wait_and_take(&mut out, None), Handoff::Stopped);
        assert!(start.elapsed() < Duration::from_millis(50));
        assert!(!buf.try_take(&mut out));
    }

    #[test]
    fn shutdown_wakes_blocked_consumer() {
        let buf = Arc::new(latest());
        let consumer = {
            let buf = Arc::clone(&buf);
            thread::spawn(move || {
                let mut out = AudioFrame::new(format());
                let result = buf.wait_and_take(&mut out, None);
                (result, Instant::now())
            })
        };

        thread::sleep(Duration::from_millis(30));
        let stopped_at = Instant::now();
        buf.shutdown();

        let (result, woke_at) = consumer.join().unwrap();
        assert_eq!(result, Handoff::Stopped);
        assert!(woke_at.duration_since(stopped_at) < Duration::from_millis(50));
    }

    #[test]
    fn publish_wakes_blocked_consumer() {
        let buf = Arc::new(queue(4));
        let consumer = {
            let buf = Arc::clone(&buf);
            thread::spawn(move || {
                let mut out = AudioFrame::new(format());
                let result = buf.wait_and_take(&mut out, Some(Duration::from_secs(2)));
                (result, out.samples)
            })
        };

        thread::sleep(Duration::from_millis(20));
        buf.publish(&[5, 6]);

        let (result, samples) = consumer.join().unwrap();
        assert_eq!(result, Handoff::Ready);
        assert_eq!(samples, vec![5, 6]);
    }

    #[test]
    fn wait_times_out_when_idle() {
        let buf = latest();
        let mut out = AudioFrame::new(format());
        let result = buf.wait_and_take(&mut out, Some(Duration::from_millis(20)));
        assert_eq!(result, Handoff::TimedOut);
    }

    #[test]
    fn publish_after_shutdown_is_ignored() {
        let buf = queue(4);
        buf.shutdown();
        buf.publish(&[1]);
        assert_eq!(buf.stats().published, 0);
    }

    #[test]
    fn reset_clears_and_rearms() {
        let buf = queue(4);
        buf.publish(&[1]);
        buf.publish(&[2]);
        buf.shutdown();
        buf.reset();

        assert!(!buf.is_shut_down());
        assert_eq!(buf.stats(), HandoffStats::default());

        let mut out = AudioFrame::new(format());
        assert!(!buf.try_take(&mut out));
        buf.publish(&[3]);
        assert!(buf.try_take(&mut out));
        assert_eq!(out.samples, vec![3]);
    }

    #[test]
    fn producer_consumer_preserve_order() {
        let buf = Arc::new(queue(64));
        let producer = {
            let buf = Arc::clone(&buf);
            thread::spawn(move || {
                for i in 0..200i16 {
                    buf.publish(&[i]);
                    if i % 16 == 0 {
                        thread::sleep(Duration::from_millis(1));
                    }
                }
            })
        };

        let mut out = AudioFrame::new(format());
        let mut seen = Vec::new();
        while seen.len() < 200 {
            match buf.wait_and_take(&mut out, Some(Duration::from_millis(200))) {
                Handoff::Ready => seen.push(out.samples[0]),
                _ => break,
            }
        }
        producer.join().unwrap();
        while buf.try_take(&mut out) {
            seen.push(out.samples[0]);
        }

        let dropped = buf.stats().dropped as usize;
        assert_eq!(seen.len() + dropped, 200);
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
    }
}
