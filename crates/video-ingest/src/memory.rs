//! In-memory backend serving pre-decoded frames, used for replays and tests.

use std::{
    collections::{HashMap, VecDeque},
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use crate::types::{CaptureError, Frame, FrameSource, VideoBackend};

/// What a scripted source yields once its frames run out.
#[derive(Clone, Debug)]
enum Tail {
    End,
    Fail(String),
}

#[derive(Clone, Debug)]
struct Script {
    frames: Vec<Frame>,
    tail: Tail,
}

/// Backend keyed by source URI and asset path. Unknown keys fail to open.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    sources: HashMap<String, Script>,
    assets: HashMap<PathBuf, Script>,
    opened_assets: Arc<AtomicUsize>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capture source that ends after `frames`.
    pub fn with_source(mut self, uri: impl Into<String>, frames: Vec<Frame>) -> Self {
        self.sources.insert(
            uri.into(),
            Script {
                frames,
                tail: Tail::End,
            },
        );
        self
    }

    /// Register a capture source that reports a read failure after `frames`.
    pub fn with_failing_source(
        mut self,
        uri: impl Into<String>,
        frames: Vec<Frame>,
        reason: impl Into<String>,
    ) -> Self {
        self.sources.insert(
            uri.into(),
            Script {
                frames,
                tail: Tail::Fail(reason.into()),
            },
        );
        self
    }

    pub fn with_asset(mut self, path: impl Into<PathBuf>, frames: Vec<Frame>) -> Self {
        self.assets.insert(
            path.into(),
            Script {
                frames,
                tail: Tail::End,
            },
        );
        self
    }

    /// Number of times an asset has been opened successfully.
    pub fn asset_opens(&self) -> usize {
        self.opened_assets.load(Ordering::SeqCst)
    }
}

impl VideoBackend for MemoryBackend {
    fn open_source(&self, uri: &str) -> Result<Box<dyn FrameSource>, CaptureError> {
        let script = self.sources.get(uri).ok_or_else(|| CaptureError::Open {
            uri: uri.to_string(),
        })?;
        Ok(Box::new(MemorySource::from_script(script)))
    }

    fn open_asset(&self, path: &Path) -> Result<Box<dyn FrameSource>, CaptureError> {
        let script = self.assets.get(path).ok_or_else(|| CaptureError::Open {
            uri: path.display().to_string(),
        })?;
        self.opened_assets.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemorySource::from_script(script)))
    }
}

/// Replays a fixed list of frames.
pub struct MemorySource {
    frames: VecDeque<Frame>,
    tail: Tail,
}

impl MemorySource {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self {
            frames: frames.into(),
            tail: Tail::End,
        }
    }

    fn from_script(script: &Script) -> Self {
        Self {
            frames: script.frames.iter().cloned().collect(),
            tail: script.tail.clone(),
        }
    }
}

impl FrameSource for MemorySource {
    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        if let Some(frame) = self.frames.pop_front() {
            return Ok(Some(frame));
        }
        match &self.tail {
            Tail::End => Ok(None),
            Tail::Fail(reason) => Err(CaptureError::Decode(reason.clone())),
        }
    }
}
