//! Integration tests for the background capture loop.
//!
//! Tests cover:
//! - Waiting for new frames
//! - Latest-frame semantics (no backlog)
//! - Releasing the source on stop, on exhaustion and on failure
//! - Skipping unreadable frames

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use banknote_inspect::{CaptureLoop, Error, FrameSource};
use image::{DynamicImage, GrayImage, Luma};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

/// Yields `limit` frames (or forever), then ends or fails
struct ScriptedSource {
    produced: u8,
    reads: u8,
    /// Read attempts (1-based) that fail with a decode error
    bad_reads: Vec<u8>,
    limit: Option<u8>,
    fail_at_end: bool,
    released: Arc<AtomicBool>,
}

impl ScriptedSource {
    fn new(limit: Option<u8>, fail_at_end: bool) -> (Self, Arc<AtomicBool>) {
        let released = Arc::new(AtomicBool::new(false));
        let source = Self {
            produced: 0,
            reads: 0,
            bad_reads: Vec::new(),
            limit,
            fail_at_end,
            released: Arc::clone(&released),
        };
        (source, released)
    }
}

impl FrameSource for ScriptedSource {
    fn read_frame(&mut self) -> banknote_inspect::Result<Option<DynamicImage>> {
        self.reads = self.reads.wrapping_add(1);
        if self.bad_reads.contains(&self.reads) {
            return Err(Error::ImageLoad {
                path: format!("frame_{}.png", self.reads).into(),
                source: image::ImageError::IoError(std::io::Error::other("truncated frame")),
            });
        }
        if self.limit == Some(self.produced) {
            return if self.fail_at_end {
                Err(Error::CaptureUnavailable {
                    reason: "device unplugged".to_string(),
                })
            } else {
                Ok(None)
            };
        }
        self.produced = self.produced.wrapping_add(1);
        Ok(Some(DynamicImage::ImageLuma8(GrayImage::from_pixel(
            8,
            8,
            Luma([self.produced]),
        ))))
    }

    fn release(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_next_frame_waits_for_newer_frames() -> anyhow::Result<()> {
    let (source, released) = ScriptedSource::new(None, false);
    let mut capture = CaptureLoop::start(source, Duration::from_millis(5))?;

    let mut display = capture.subscribe();

    let first = timeout(WAIT, capture.next_frame()).await?.expect("a frame");
    let second = timeout(WAIT, capture.next_frame()).await?.expect("a frame");
    assert!(second.sequence > first.sequence);
    assert!(capture.is_running());

    // A second reader sees the same slot independently
    timeout(WAIT, display.changed()).await??;
    assert!(display.borrow().is_some());

    capture.stop();
    assert!(released.load(Ordering::SeqCst));

    Ok(())
}

#[tokio::test]
async fn test_current_frame_is_latest() -> anyhow::Result<()> {
    let (source, _released) = ScriptedSource::new(None, false);
    let mut capture = CaptureLoop::start(source, Duration::from_millis(1))?;

    timeout(WAIT, capture.next_frame()).await?.expect("a frame");
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Frames produced meanwhile were overwritten, not queued
    let current = capture.current_frame().expect("a frame");
    assert!(current.sequence > 1);
    let again = capture.current_frame().expect("a frame");
    assert!(again.sequence >= current.sequence);

    capture.stop();
    Ok(())
}

#[tokio::test]
async fn test_exhausted_source_ends_capture() -> anyhow::Result<()> {
    let (source, released) = ScriptedSource::new(Some(2), false);
    let mut capture = CaptureLoop::start(source, Duration::from_millis(1))?;

    let mut last = None;
    while let Some(frame) = timeout(WAIT, capture.next_frame()).await? {
        last = Some(frame.sequence);
    }
    assert_eq!(last, Some(2));
    assert!(!capture.is_running());
    assert!(released.load(Ordering::SeqCst));

    // The last frame stays readable after capture ended
    assert_eq!(capture.current_frame().map(|f| f.sequence), Some(2));

    Ok(())
}

#[tokio::test]
async fn test_failing_source_is_released() -> anyhow::Result<()> {
    let (source, released) = ScriptedSource::new(Some(0), true);
    let mut capture = CaptureLoop::start(source, Duration::from_millis(1))?;

    assert!(timeout(WAIT, capture.next_frame()).await?.is_none());
    assert!(capture.current_frame().is_none());
    assert!(released.load(Ordering::SeqCst));

    Ok(())
}

#[tokio::test]
async fn test_unreadable_frames_are_skipped() -> anyhow::Result<()> {
    let (mut source, released) = ScriptedSource::new(Some(3), false);
    source.bad_reads = vec![1, 3];
    let mut capture = CaptureLoop::start(source, Duration::from_millis(1))?;

    let mut last = None;
    while let Some(frame) = timeout(WAIT, capture.next_frame()).await? {
        last = Some(frame.sequence);
    }
    // Every good frame arrived despite the failed reads in between
    assert_eq!(last, Some(3));
    assert!(released.load(Ordering::SeqCst));

    Ok(())
}

#[test]
fn test_drop_stops_capture() {
    let (source, released) = ScriptedSource::new(None, false);
    let capture = CaptureLoop::start(source, Duration::from_secs(60)).unwrap();
    drop(capture);
    assert!(released.load(Ordering::SeqCst));
}
