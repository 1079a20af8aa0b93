use crate::frame::Frame;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

/// Frames covering the trailing preroll window, oldest first.
///
/// Entries older than the newest frame's capture time minus the window are
/// evicted on every push. The frame cap bounds memory when the camera runs
/// faster than expected.
pub struct PrerollBuffer {
    window: Duration,
    capacity: usize,
    frames: Mutex<VecDeque<Frame>>,
}

impl PrerollBuffer {
    pub fn new(window: Duration, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            window,
            capacity,
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Append a frame and evict what fell out of the window.
    ///
    /// Returns false, leaving the buffer untouched, if the frame is not newer
    /// than the last one held.
    pub fn push(&self, frame: Frame) -> bool {
        let mut frames = self.frames.lock();

        if let Some(last) = frames.back() {
            if frame.seq <= last.seq || frame.captured_at < last.captured_at {
                trace!("Rejected out-of-order preroll frame {} (last {})", frame.seq, last.seq);
                return false;
            }
        }

        if let Some(cutoff) = frame.captured_at.checked_sub(self.window) {
            while frames.front().is_some_and(|oldest| oldest.captured_at < cutoff) {
                frames.pop_front();
            }
        }

        frames.push_back(frame);
        while frames.len() > self.capacity {
            frames.pop_front();
        }
        true
    }

    /// Copy of the buffered frames, oldest first
    pub fn snapshot(&self) -> Vec<Frame> {
        self.frames.lock().iter().cloned().collect()
    }

    /// Copy of the frames no older than `now` minus the window, oldest first
    pub fn snapshot_at(&self, now: Instant) -> Vec<Frame> {
        let cutoff = now.checked_sub(self.window);
        self.frames
            .lock()
            .iter()
            .filter(|f| cutoff.map_or(true, |cutoff| f.captured_at >= cutoff))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }

    pub fn clear(&self) {
        self.frames.lock().clear();
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    fn frame(seq: u64) -> Frame {
        Frame::new(seq, vec![seq as u8], 1, 1)
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_covers_only_trailing_window() {
        let buffer = PrerollBuffer::new(Duration::from_secs(5), 1000);
        let start = Instant::now();

        // 10 seconds of frames at 10 fps
        for seq in 0..100 {
            buffer.push(frame(seq));
            advance(Duration::from_millis(100)).await;
        }

        // Newest frame sits at 9.9s, so 4.9s..=9.9s is retained
        assert_eq!(buffer.len(), 51);

        let trigger = start + Duration::from_secs(10);
        assert_eq!(Instant::now(), trigger);
        let snapshot = buffer.snapshot_at(trigger);
        for f in &snapshot {
            let at = f.captured_at.duration_since(start);
            assert!(at >= Duration::from_secs(5), "frame at {:?} is stale", at);
            assert!(f.captured_at <= trigger);
        }
        assert_eq!(snapshot.first().unwrap().seq, 50);
        assert_eq!(snapshot.last().unwrap().seq, 99);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_stay_time_ordered() {
        let buffer = PrerollBuffer::new(Duration::from_secs(1), 100);
        for seq in 0..30 {
            buffer.push(frame(seq));
            advance(Duration::from_millis(70)).await;
        }

        let snapshot = buffer.snapshot();
        for pair in snapshot.windows(2) {
            assert!(pair[0].captured_at < pair[1].captured_at);
            assert!(pair[0].seq < pair[1].seq);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_order_frames_rejected() {
        let buffer = PrerollBuffer::new(Duration::from_secs(5), 10);
        let early = frame(1);
        advance(Duration::from_millis(10)).await;
        assert!(buffer.push(frame(2)));

        assert!(!buffer.push(early));
        assert!(!buffer.push(frame(2)));
        assert_eq!(buffer.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_cap() {
        let buffer = PrerollBuffer::new(Duration::from_secs(60), 5);
        for seq in 0..20 {
            buffer.push(frame(seq));
            advance(Duration::from_millis(1)).await;
        }
        let seqs: Vec<u64> = buffer.snapshot().iter().map(|f| f.seq).collect();
        assert_eq!(seqs, vec![15, 16, 17, 18, 19]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_is_a_copy() {
        let buffer = PrerollBuffer::new(Duration::from_secs(5), 10);
        buffer.push(frame(1));
        let snapshot = buffer.snapshot();

        advance(Duration::from_millis(10)).await;
        buffer.push(frame(2));
        buffer.clear();

        assert_eq!(snapshot.len(), 1);
        assert!(buffer.is_empty());
    }
}
