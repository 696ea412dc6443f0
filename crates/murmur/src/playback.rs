//! AudioPlaybackQueue - sequence-ordered, gap-tolerant audio playback.
//!
//! The queue itself does no I/O. The controller asks it what to do next via
//! [`AudioPlaybackQueue::poll`], hands `Play` segments to an [`AudioSink`] on a
//! separate task, and reports back with [`AudioPlaybackQueue::complete`].
//! That keeps segments from overlapping without the queue owning a timer.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::error::PlaybackError;

/// One unit of audio, ordered by `seq`.
///
/// `played` is set once a sink has rendered the segment without error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AudioSegment {
    pub seq: u64,
    #[serde(skip)]
    pub payload: Bytes,
    pub played: bool,
}

impl AudioSegment {
    pub fn new(seq: u64, payload: Bytes) -> Self {
        Self {
            seq,
            payload,
            played: false,
        }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Result of [`AudioPlaybackQueue::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Accepted,
    /// At or below the last played/skipped sequence.
    Stale,
    /// Same sequence is already pending or playing.
    Duplicate,
}

/// What the caller should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackAction {
    /// Render this segment, then call `complete(seq, ..)`.
    Play(AudioSegment),
    /// The next expected segment is missing; poll again at the deadline.
    Wait(Instant),
    /// A segment is still rendering.
    Busy,
    /// Nothing queued.
    Idle,
}

/// Counters for logs and the CLI summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlaybackStats {
    pub played: u64,
    pub failed: u64,
    pub skipped: u64,
    pub rejected: u64,
}

#[derive(Debug)]
pub struct AudioPlaybackQueue {
    pending: BTreeMap<u64, AudioSegment>,
    next_seq: u64,
    /// Set after `u64::MAX` has been consumed; nothing can follow it.
    exhausted: bool,
    playing: Option<u64>,
    gap_since: Option<Instant>,
    max_gap_wait: Duration,
    stats: PlaybackStats,
}

impl AudioPlaybackQueue {
    pub fn new(first_seq: u64, max_gap_wait: Duration) -> Self {
        Self {
            pending: BTreeMap::new(),
            next_seq: first_seq,
            exhausted: false,
            playing: None,
            gap_since: None,
            max_gap_wait,
            stats: PlaybackStats::default(),
        }
    }

    pub fn enqueue(&mut self, segment: AudioSegment) -> EnqueueOutcome {
        let seq = segment.seq;
        if seq < self.next_seq || self.exhausted {
            warn!("playback: rejecting stale segment {} (next is {})", seq, self.next_seq);
            self.stats.rejected += 1;
            return EnqueueOutcome::Stale;
        }
        if self.playing == Some(seq) || self.pending.contains_key(&seq) {
            warn!("playback: rejecting duplicate segment {}", seq);
            self.stats.rejected += 1;
            return EnqueueOutcome::Duplicate;
        }
        trace!("playback: queued segment {} ({} bytes)", seq, segment.len());
        self.pending.insert(seq, segment);
        EnqueueOutcome::Accepted
    }

    /// Decide the next step at `now`.
    ///
    /// A gap in front of the lowest pending segment is tolerated for
    /// `max_gap_wait`, measured from the first poll that saw it. After that
    /// the missing sequence numbers are skipped.
    pub fn poll(&mut self, now: Instant) -> PlaybackAction {
        if self.playing.is_some() {
            return PlaybackAction::Busy;
        }

        let Some(&lowest) = self.pending.keys().next() else {
            self.gap_since = None;
            return PlaybackAction::Idle;
        };

        if lowest > self.next_seq {
            let since = *self.gap_since.get_or_insert(now);
            let deadline = since + self.max_gap_wait;
            if now < deadline {
                return PlaybackAction::Wait(deadline);
            }
            let missing = lowest - self.next_seq;
            warn!(
                "playback: gave up on {} missing segment(s) {}..{} after {:?}",
                missing,
                self.next_seq,
                lowest,
                self.max_gap_wait
            );
            self.stats.skipped += missing;
            self.next_seq = lowest;
        }

        self.gap_since = None;
        match self.pending.remove(&lowest) {
            Some(segment) => {
                self.playing = Some(lowest);
                PlaybackAction::Play(segment)
            }
            None => PlaybackAction::Idle,
        }
    }

    /// Report that segment `seq` finished. Returns false if it is not the
    /// segment currently playing (late callback after a drain).
    pub fn complete(&mut self, seq: u64, result: Result<(), PlaybackError>) -> bool {
        if self.playing != Some(seq) {
            debug!("playback: ignoring completion for segment {}", seq);
            return false;
        }
        self.playing = None;
        match seq.checked_add(1) {
            Some(next) => self.next_seq = next,
            None => self.exhausted = true,
        }
        match result {
            Ok(()) => self.stats.played += 1,
            Err(e) => {
                warn!("playback: {}", e);
                self.stats.failed += 1;
            }
        }
        true
    }

    /// Drop everything not yet played. Returns the number of segments
    /// discarded, counting one still rendering.
    pub fn drain(&mut self) -> usize {
        let dropped = self.pending.len() + usize::from(self.playing.is_some());
        self.pending.clear();
        self.playing = None;
        self.gap_since = None;
        if dropped > 0 {
            debug!("playback: drained {} segment(s)", dropped);
        }
        dropped
    }

    /// Drain and rewind for a new session.
    pub fn reset(&mut self, first_seq: u64) {
        self.drain();
        self.next_seq = first_seq;
        self.exhausted = false;
        self.stats = PlaybackStats::default();
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_playing(&self) -> bool {
        self.playing.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.playing.is_none()
    }

    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    pub fn stats(&self) -> PlaybackStats {
        self.stats
    }
}

/// Renders audio segments. One call at a time per queue.
#[async_trait]
pub trait AudioSink: Send + Sync + 'static {
    async fn play(&self, segment: &AudioSegment) -> Result<(), PlaybackError>;
}

/// Discards audio. Default for headless runs without `--audio-dir`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

#[async_trait]
impl AudioSink for NullSink {
    async fn play(&self, segment: &AudioSegment) -> Result<(), PlaybackError> {
        trace!("null sink: discarding segment {} ({} bytes)", segment.seq, segment.len());
        Ok(())
    }
}

/// Writes each segment to `<dir>/segment-<seq>.bin`.
#[derive(Debug, Clone)]
pub struct FileSink {
    dir: PathBuf,
}

impl FileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    pub fn path_for(&self, seq: u64) -> PathBuf {
        self.dir.join(format!("segment-{:06}.bin", seq))
    }
}

#[async_trait]
impl AudioSink for FileSink {
    async fn play(&self, segment: &AudioSegment) -> Result<(), PlaybackError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| PlaybackError::new(segment.seq, format!("create {}: {}", self.dir.display(), e)))?;
        let path = self.path_for(segment.seq);
        tokio::fs::write(&path, &segment.payload)
            .await
            .map_err(|e| PlaybackError::new(segment.seq, format!("write {}: {}", path.display(), e)))?;
        debug!("file sink: wrote {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn seg(seq: u64) -> AudioSegment {
        AudioSegment::new(seq, Bytes::from(vec![seq as u8; 4]))
    }

    fn queue() -> AudioPlaybackQueue {
        AudioPlaybackQueue::new(0, Duration::from_secs(2))
    }

    /// Drive the queue to completion with an instant sink, collecting the
    /// order segments were played in.
    fn play_all(q: &mut AudioPlaybackQueue, now: Instant) -> Vec<u64> {
        let mut order = Vec::new();
        while let PlaybackAction::Play(s) = q.poll(now) {
            order.push(s.seq);
            q.complete(s.seq, Ok(()));
        }
        order
    }

    #[test]
    fn plays_out_of_order_arrivals_in_sequence() {
        let mut q = queue();
        for s in [2, 0, 1] {
            assert_eq!(q.enqueue(seg(s)), EnqueueOutcome::Accepted);
        }
        assert_eq!(play_all(&mut q, Instant::now()), vec![0, 1, 2]);
        assert!(q.is_empty());
        assert_eq!(q.stats().played, 3);
    }

    #[test]
    fn gap_blocks_until_deadline() {
        let mut q = queue();
        let t0 = Instant::now();
        q.enqueue(seg(1));

        match q.poll(t0) {
            PlaybackAction::Wait(deadline) => assert_eq!(deadline, t0 + Duration::from_secs(2)),
            other => panic!("expected Wait, got {:?}", other),
        }
        // Still inside the window: deadline is anchored to the first poll
        assert_eq!(
            q.poll(t0 + Duration::from_secs(1)),
            PlaybackAction::Wait(t0 + Duration::from_secs(2))
        );

        // Missing segment shows up in time
        q.enqueue(seg(0));
        assert_eq!(play_all(&mut q, t0 + Duration::from_secs(1)), vec![0, 1]);
        assert_eq!(q.stats().skipped, 0);
    }

    #[test]
    fn gap_is_skipped_after_max_wait() {
        let mut q = queue();
        let t0 = Instant::now();
        q.enqueue(seg(0));
        q.enqueue(seg(3));

        assert_eq!(play_all(&mut q, t0), vec![0]);
        assert!(matches!(q.poll(t0), PlaybackAction::Wait(_)));

        let later = t0 + Duration::from_secs(2);
        assert_eq!(play_all(&mut q, later), vec![3]);
        assert_eq!(q.stats().skipped, 2);

        // Late arrival of a skipped slot is stale
        assert_eq!(q.enqueue(seg(1)), EnqueueOutcome::Stale);
    }

    #[test]
    fn last_possible_sequence_plays_then_closes_the_queue() {
        let mut q = queue();
        let t0 = Instant::now();
        assert_eq!(q.enqueue(seg(u64::MAX)), EnqueueOutcome::Accepted);
        assert!(matches!(q.poll(t0), PlaybackAction::Wait(_)));

        assert_eq!(play_all(&mut q, t0 + Duration::from_secs(2)), vec![u64::MAX]);
        assert_eq!(q.stats().played, 1);
        assert_eq!(q.enqueue(seg(u64::MAX)), EnqueueOutcome::Stale);
        assert_eq!(q.enqueue(seg(5)), EnqueueOutcome::Stale);

        q.reset(0);
        assert_eq!(q.enqueue(seg(0)), EnqueueOutcome::Accepted);
    }

    #[test]
    fn one_segment_at_a_time() {
        let mut q = queue();
        q.enqueue(seg(0));
        q.enqueue(seg(1));
        let now = Instant::now();

        assert!(matches!(q.poll(now), PlaybackAction::Play(s) if s.seq == 0));
        assert_eq!(q.poll(now), PlaybackAction::Busy);
        q.complete(0, Ok(()));
        assert!(matches!(q.poll(now), PlaybackAction::Play(s) if s.seq == 1));
    }

    #[test]
    fn failure_does_not_halt_queue() {
        let mut q = queue();
        q.enqueue(seg(0));
        q.enqueue(seg(1));
        let now = Instant::now();

        let PlaybackAction::Play(first) = q.poll(now) else {
            panic!("expected Play");
        };
        q.complete(first.seq, Err(PlaybackError::new(first.seq, "device busy")));
        assert!(matches!(q.poll(now), PlaybackAction::Play(s) if s.seq == 1));
        assert_eq!(q.stats().failed, 1);
    }

    #[test]
    fn rejects_duplicates_and_stale() {
        let mut q = queue();
        q.enqueue(seg(0));
        assert_eq!(q.enqueue(seg(0)), EnqueueOutcome::Duplicate);
        assert_eq!(play_all(&mut q, Instant::now()), vec![0]);
        assert_eq!(q.enqueue(seg(0)), EnqueueOutcome::Stale);
        assert_eq!(q.stats().rejected, 2);
    }

    #[test]
    fn drain_counts_playing_and_pending() {
        let mut q = queue();
        for s in 0..4 {
            q.enqueue(seg(s));
        }
        assert!(matches!(q.poll(Instant::now()), PlaybackAction::Play(_)));
        assert_eq!(q.drain(), 4);
        assert!(q.is_empty());
        // Completion racing the drain is ignored
        assert!(!q.complete(0, Ok(())));
        assert_eq!(q.poll(Instant::now()), PlaybackAction::Idle);
    }

    #[test]
    fn reset_rewinds_sequence() {
        let mut q = queue();
        q.enqueue(seg(0));
        play_all(&mut q, Instant::now());
        q.reset(0);
        assert_eq!(q.enqueue(seg(0)), EnqueueOutcome::Accepted);
        assert_eq!(q.stats(), PlaybackStats::default());
    }

    #[tokio::test]
    async fn file_sink_writes_segments() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::new(dir.path().join("audio"));
        sink.play(&seg(7)).await.unwrap();

        let written = std::fs::read(sink.path_for(7)).unwrap();
        assert_eq!(written, vec![7u8; 4]);
    }

    #[tokio::test]
    async fn file_sink_reports_failure_with_seq() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();

        let err = FileSink::new(&blocker).play(&seg(3)).await.unwrap_err();
        assert_eq!(err.seq, 3);
    }
}
