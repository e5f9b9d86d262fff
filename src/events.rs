use std::sync::Arc;

use crate::codec::Bitmap;
use crate::scan::PhotoRef;

/// A decoded photo ready for display. Cloning shares the pixels.
#[derive(Debug, Clone)]
pub struct Photo {
    /// The file the bitmap was decoded from.
    pub source: PhotoRef,
    pub bitmap: Arc<Bitmap>,
}

impl Photo {
    pub fn new(source: PhotoRef, bitmap: Bitmap) -> Self {
        Self {
            source,
            bitmap: Arc::new(bitmap),
        }
    }
}

/// What the display should show for one frame.
#[derive(Debug, Clone)]
pub enum RenderCommand {
    /// Placeholder while no photo is available.
    Blank,
    ShowSingle(Photo),
    /// `from` drawn at `1 - opacity`, `to` at `opacity`.
    ShowBlend { from: Photo, to: Photo, opacity: f32 },
}

impl RenderCommand {
    /// The photo that is (or is becoming) the primary one on screen.
    pub fn primary(&self) -> Option<&Photo> {
        match self {
            RenderCommand::Blank => None,
            RenderCommand::ShowSingle(photo) => Some(photo),
            RenderCommand::ShowBlend { to, .. } => Some(to),
        }
    }
}

/// Ask the import worker to run a pass now (e.g. after an upload landed).
#[derive(Debug, Clone, Copy)]
pub struct ImportRequest;
