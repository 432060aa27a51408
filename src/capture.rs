//! Background frame capture.
//!
//! A capture thread reads frames from a [`FrameSource`] and publishes the
//! latest one into a single-slot `watch` channel. Readers always see the most
//! recent frame; frames nobody looked at are overwritten, never queued.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use image::{DynamicImage, ImageReader};
use tokio::sync::watch;

use crate::error::{Error, Result};

const FRAME_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// A captured image and its position in the capture sequence (starting at 1)
#[derive(Debug, Clone)]
pub struct Frame {
    pub sequence: u64,
    pub image: DynamicImage,
}

/// Something frames can be pulled from, such as a camera
pub trait FrameSource: Send + 'static {
    /// Next frame, or None when the source is exhausted.
    ///
    /// `CaptureUnavailable` ends capture; any other error only drops that frame.
    fn read_frame(&mut self) -> Result<Option<DynamicImage>>;

    /// Give the underlying device back; called once when capture ends
    fn release(&mut self) {}
}

/// Replays the images of a directory in file-name order, forever
#[derive(Debug)]
pub struct DirectoryFrameSource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    next: usize,
}

impl DirectoryFrameSource {
    pub fn open(dir: &Path) -> Result<Self> {
        let entries = fs::read_dir(dir).map_err(|e| Error::CaptureUnavailable {
            reason: format!("cannot read {}: {e}", dir.display()),
        })?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.is_file()
                    && p.extension()
                        .and_then(|e| e.to_str())
                        .is_some_and(|e| FRAME_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            })
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(Error::CaptureUnavailable {
                reason: format!("no image files in {}", dir.display()),
            });
        }
        log::debug!("Frame source {} has {} images", dir.display(), files.len());

        Ok(Self {
            dir: dir.to_path_buf(),
            files,
            next: 0,
        })
    }
}

impl FrameSource for DirectoryFrameSource {
    fn read_frame(&mut self) -> Result<Option<DynamicImage>> {
        let path = &self.files[self.next % self.files.len()];
        self.next = (self.next + 1) % self.files.len();

        let image = ImageReader::open(path)?
            .with_guessed_format()?
            .decode()
            .map_err(|source| Error::ImageLoad {
                path: path.clone(),
                source,
            })?;
        Ok(Some(image))
    }

    fn release(&mut self) {
        log::debug!("Released frame source {}", self.dir.display());
    }
}

/// Handle to a running capture thread
pub struct CaptureLoop {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    frames: watch::Receiver<Option<Arc<Frame>>>,
}

impl CaptureLoop {
    /// Spawn the capture thread, reading one frame every `interval`
    pub fn start<S: FrameSource>(mut source: S, interval: Duration) -> Result<Self> {
        let (tx, rx) = watch::channel(None);
        let running = Arc::new(AtomicBool::new(true));

        let flag = Arc::clone(&running);
        let handle = thread::Builder::new()
            .name("capture".to_string())
            .spawn(move || {
                let mut sequence = 0;
                while flag.load(Ordering::Acquire) {
                    match source.read_frame() {
                        Ok(Some(image)) => {
                            sequence += 1;
                            tx.send_replace(Some(Arc::new(Frame { sequence, image })));
                        }
                        Ok(None) => {
                            log::info!("Frame source exhausted after {sequence} frames");
                            break;
                        }
                        // Only a lost device ends capture; a bad frame is skipped
                        Err(e) if e.is_resource_unavailable() => {
                            log::warn!("Capture failed: {e}; stopping capture");
                            break;
                        }
                        Err(e) => log::warn!("Skipping unreadable frame: {e}"),
                    }
                    thread::park_timeout(interval);
                }
                source.release();
                flag.store(false, Ordering::Release);
            })
            .map_err(|e| Error::CaptureUnavailable {
                reason: format!("cannot spawn capture thread: {e}"),
            })?;

        log::info!("Capture started ({} ms interval)", interval.as_millis());
        Ok(Self {
            running,
            handle: Some(handle),
            frames: rx,
        })
    }

    /// Independent reader of the latest frame
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<Frame>>> {
        self.frames.clone()
    }

    /// Latest frame, without waiting
    pub fn current_frame(&self) -> Option<Arc<Frame>> {
        self.frames.borrow().clone()
    }

    /// Wait for a frame newer than the last one returned here.
    ///
    /// Returns None once capture has ended and every frame has been seen.
    pub async fn next_frame(&mut self) -> Option<Arc<Frame>> {
        self.frames.changed().await.ok()?;
        self.frames.borrow_and_update().clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop the thread and wait until the source has been released
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            if handle.join().is_err() {
                log::warn!("Capture thread panicked");
            }
            log::info!("Capture stopped");
        }
    }
}

impl Drop for CaptureLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}
