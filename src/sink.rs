use std::path::PathBuf;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use tracing::{debug, info};

use crate::events::RenderCommand;

/// Consumer of the engine's per-frame render commands.
pub trait RenderSink {
    fn present(&mut self, command: &RenderCommand);
}

/// Hands commands to a display thread over a bounded channel. Frames are
/// dropped while the display is behind; the next tick carries fresher state.
pub struct ChannelSink {
    tx: Sender<RenderCommand>,
    dropped: u64,
}

impl ChannelSink {
    pub fn new(tx: Sender<RenderCommand>) -> Self {
        Self { tx, dropped: 0 }
    }

    /// A sink plus the receiving end for the display thread.
    pub fn bounded(capacity: usize) -> (Self, Receiver<RenderCommand>) {
        let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
        (Self::new(tx), rx)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl RenderSink for ChannelSink {
    fn present(&mut self, command: &RenderCommand) {
        match self.tx.try_send(command.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                if self.dropped.is_power_of_two() {
                    debug!(dropped = self.dropped, "display lagging; dropping frames");
                }
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!("display channel closed");
            }
        }
    }
}

/// Headless sink: logs what would be on screen.
#[derive(Debug, Default)]
pub struct LogSink {
    showing: Option<PathBuf>,
    blending: bool,
    blank: bool,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn showing(&self) -> Option<&PathBuf> {
        self.showing.as_ref()
    }
}

impl RenderSink for LogSink {
    fn present(&mut self, command: &RenderCommand) {
        match command {
            RenderCommand::Blank => {
                if !self.blank {
                    info!("display: placeholder");
                }
                self.blank = true;
                self.blending = false;
                self.showing = None;
            }
            RenderCommand::ShowSingle(photo) => {
                if self.showing.as_ref() != Some(&photo.source.path) {
                    let (w, h) = photo.bitmap.dimensions();
                    info!(path = %photo.source.path.display(), width = w, height = h, "display: photo");
                }
                self.blank = false;
                self.blending = false;
                self.showing = Some(photo.source.path.clone());
            }
            RenderCommand::ShowBlend { from, to, opacity } => {
                if !self.blending {
                    debug!(from = %from.source.path.display(), to = %to.source.path.display(), "display: crossfade");
                }
                self.blank = false;
                self.blending = *opacity < 1.0;
                if *opacity >= 1.0 {
                    info!(path = %to.source.path.display(), "display: photo");
                    self.showing = Some(to.source.path.clone());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Bitmap;
    use crate::events::Photo;
    use crate::scan::PhotoRef;
    use std::time::SystemTime;

    fn photo(name: &str) -> Photo {
        Photo::new(
            PhotoRef::new(PathBuf::from(name), SystemTime::UNIX_EPOCH, 0),
            Bitmap::from_rgba(image::RgbaImage::new(1, 1)),
        )
    }

    #[test]
    fn channel_sink_drops_when_full() {
        let (mut sink, rx) = ChannelSink::bounded(1);
        sink.present(&RenderCommand::Blank);
        sink.present(&RenderCommand::ShowSingle(photo("/a.jpg")));
        assert_eq!(sink.dropped(), 1);
        assert!(matches!(rx.try_recv(), Ok(RenderCommand::Blank)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn log_sink_tracks_completed_blend() {
        let mut sink = LogSink::new();
        sink.present(&RenderCommand::ShowSingle(photo("/a.jpg")));
        sink.present(&RenderCommand::ShowBlend {
            from: photo("/a.jpg"),
            to: photo("/b.jpg"),
            opacity: 1.0,
        });
        assert_eq!(sink.showing(), Some(&PathBuf::from("/b.jpg")));
        sink.present(&RenderCommand::Blank);
        assert!(sink.showing().is_none());
    }
}
