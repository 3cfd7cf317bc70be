//! Paced clip playback into the display slot.
//!
//! Playback is cooperative: between frames it checks the display's interrupt
//! flag and the caller's continuation predicate, so a stop request is observed
//! within one pacing interval.

use std::{sync::Arc, thread, time::Duration};

use tracing::{debug, info, warn};
use video_ingest::VideoBackend;

use crate::pipeline::{
    config::PlaybackSettings,
    display::{DisplayState, Mode},
};

/// How a playback run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackEnd {
    /// The asset could not be opened; nothing was published.
    Unavailable,
    /// The asset ran out of frames (or failed to decode).
    Completed { frames: u64 },
    /// The interrupt flag was raised.
    Interrupted { frames: u64 },
    /// The continuation predicate returned false.
    Cancelled { frames: u64 },
}

impl PlaybackEnd {
    pub fn frames(self) -> u64 {
        match self {
            PlaybackEnd::Unavailable => 0,
            PlaybackEnd::Completed { frames }
            | PlaybackEnd::Interrupted { frames }
            | PlaybackEnd::Cancelled { frames } => frames,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PlaybackEnd::Unavailable => "unavailable",
            PlaybackEnd::Completed { .. } => "completed",
            PlaybackEnd::Interrupted { .. } => "interrupted",
            PlaybackEnd::Cancelled { .. } => "cancelled",
        }
    }
}

pub struct PlaybackController {
    backend: Arc<dyn VideoBackend>,
    display: Arc<DisplayState>,
    settings: PlaybackSettings,
}

impl PlaybackController {
    pub fn new(
        backend: Arc<dyn VideoBackend>,
        display: Arc<DisplayState>,
        settings: PlaybackSettings,
    ) -> Self {
        Self {
            backend,
            display,
            settings,
        }
    }

    pub fn frame_interval(&self) -> Duration {
        self.settings.frame_interval()
    }

    /// Play the configured asset to the end, or until interrupted or cancelled.
    ///
    /// The display is in `Playing` mode only while an opened asset owns it.
    pub fn play(&self, should_continue: impl Fn() -> bool) -> PlaybackEnd {
        let span = tracing::info_span!(
            "trigger.playback",
            asset = %self.settings.asset_path.display(),
            fps = self.settings.frame_rate
        );
        let _guard = span.enter();

        let mut asset = match self.backend.open_asset(&self.settings.asset_path) {
            Ok(asset) => asset,
            Err(err) => {
                warn!("Could not open playback asset: {err}");
                return self.finish(PlaybackEnd::Unavailable);
            }
        };
        self.display.set_mode(Mode::Playing);

        let interval = self.frame_interval();
        let mut frames: u64 = 0;
        let end = loop {
            if self.display.take_interrupt() {
                break PlaybackEnd::Interrupted { frames };
            }
            if !should_continue() {
                break PlaybackEnd::Cancelled { frames };
            }
            match asset.next_frame() {
                Ok(Some(frame)) => {
                    self.display.publish(frame);
                    frames += 1;
                }
                Ok(None) => break PlaybackEnd::Completed { frames },
                Err(err) => {
                    debug!("Asset decode ended playback: {err}");
                    break PlaybackEnd::Completed { frames };
                }
            }
            thread::sleep(interval);
        };
        drop(asset);
        self.display.set_mode(Mode::Detecting);
        self.finish(end)
    }

    fn finish(&self, end: PlaybackEnd) -> PlaybackEnd {
        metrics::counter!("trigger_playbacks_total", "outcome" => end.label()).increment(1);
        info!("Playback {} after {} frame(s)", end.label(), end.frames());
        end
    }
}
