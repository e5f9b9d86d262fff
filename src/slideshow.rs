//! The slideshow state machine.
//!
//! [`SlideshowEngine::tick`] is a plain synchronous function of the current
//! instant. It rescans the serving directory when a hold period expires (or
//! on every tick while idle), hands decoding to a [`DecodeWorker`] and polls
//! the result on later ticks, so the caller's frame cadence never waits on a
//! decode.

pub mod prefetch;

use std::path::PathBuf;
use std::time::{Duration, Instant, SystemTime};

use tracing::{debug, info, warn};

use crate::events::{Photo, RenderCommand};
use crate::scan::{PhotoSet, PhotoSource};

pub use prefetch::{DecodeOutcome, DecodePoll, DecodeWorker, PendingDecode};

/// Externally visible phase of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Nothing to show.
    Idle,
    Hold,
    Transitioning,
}

#[derive(Debug, Clone, Copy)]
enum State {
    Idle,
    Hold { since: Instant },
    Transitioning { started: Instant },
}

/// Hold and fade durations, fixed for the engine's lifetime.
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    pub hold: Duration,
    pub fade: Duration,
}

impl Timing {
    pub fn new(hold: Duration, fade: Duration) -> Self {
        Self { hold, fade }
    }
}

// (path, modified, size) of every entry in one scan
type Listing = Vec<(PathBuf, SystemTime, u64)>;

// A listing in which no candidate decoded, and when that was last found.
struct Exhausted {
    listing: Listing,
    since: Instant,
}

pub struct SlideshowEngine<S> {
    source: S,
    decoder: DecodeWorker,
    timing: Timing,
    state: State,
    current: Option<Photo>,
    next: Option<Photo>,
    progress: f32,
    pending: Option<PendingDecode>,
    requested: Listing,
    retrying: bool,
    last_shown: Option<PathBuf>,
    exhausted: Option<Exhausted>,
    scan_failure: Option<String>,
    decode_failures: u64,
    transitions: u64,
}

impl<S: PhotoSource> SlideshowEngine<S> {
    /// A new engine starts idle; the first tick scans.
    pub fn new(source: S, decoder: DecodeWorker, timing: Timing) -> Self {
        Self {
            source,
            decoder,
            timing,
            state: State::Idle,
            current: None,
            next: None,
            progress: 0.0,
            pending: None,
            requested: Vec::new(),
            retrying: false,
            last_shown: None,
            exhausted: None,
            scan_failure: None,
            decode_failures: 0,
            transitions: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        match self.state {
            State::Idle => Phase::Idle,
            State::Hold { .. } => Phase::Hold,
            State::Transitioning { .. } => Phase::Transitioning,
        }
    }

    pub fn current(&self) -> Option<&Photo> {
        self.current.as_ref()
    }

    pub fn next(&self) -> Option<&Photo> {
        self.next.as_ref()
    }

    /// Crossfade progress of the running transition, 0 outside one.
    pub fn progress(&self) -> f32 {
        self.progress
    }

    pub fn is_decoding(&self) -> bool {
        self.pending.is_some()
    }

    /// Decodes that failed since the engine started.
    pub fn decode_failures(&self) -> u64 {
        self.decode_failures
    }

    /// Transitions started since the engine started.
    pub fn transitions(&self) -> u64 {
        self.transitions
    }

    pub fn timing(&self) -> Timing {
        self.timing
    }

    /// Advance to `now` and return what to draw for this frame.
    pub fn tick(&mut self, now: Instant) -> RenderCommand {
        match self.state {
            State::Idle => self.tick_idle(now),
            State::Hold { since } => self.tick_hold(now, since),
            State::Transitioning { started } => self.tick_transition(now, started),
        }
    }

    fn tick_idle(&mut self, now: Instant) -> RenderCommand {
        if self.pending.is_none() {
            let Some(set) = self.rescan() else {
                return RenderCommand::Blank;
            };
            if set.is_empty() {
                self.exhausted = None;
                return RenderCommand::Blank;
            }
            let listing = listing_of(&set);
            // an unchanged listing that failed entirely is retried once per hold
            let retrying = match &self.exhausted {
                Some(ex) if ex.listing == listing => {
                    if now.saturating_duration_since(ex.since) < self.timing.hold {
                        return RenderCommand::Blank;
                    }
                    true
                }
                _ => false,
            };
            self.request_decode(&set, listing, retrying);
        }

        match self.poll_pending(now) {
            Some(Some(photo)) => self.show(photo, now),
            _ => RenderCommand::Blank,
        }
    }

    fn tick_hold(&mut self, now: Instant, since: Instant) -> RenderCommand {
        if self.pending.is_none() {
            if now.saturating_duration_since(since) < self.timing.hold {
                return self.show_current();
            }
            match self.rescan() {
                Some(set) if !set.is_empty() => {
                    let listing = listing_of(&set);
                    self.request_decode(&set, listing, false);
                }
                Some(_) => {
                    info!("photo directory is empty; idling");
                    return self.go_idle();
                }
                None => return self.go_idle(),
            }
        }

        match self.poll_pending(now) {
            Some(Some(next)) => self.begin_transition(next, now),
            Some(None) => {
                warn!("no photo in the directory could be decoded; idling");
                self.go_idle()
            }
            None => self.show_current(),
        }
    }

    fn tick_transition(&mut self, now: Instant, started: Instant) -> RenderCommand {
        let progress = if self.timing.fade.is_zero() {
            1.0
        } else {
            let elapsed = now.saturating_duration_since(started).as_secs_f64();
            (elapsed / self.timing.fade.as_secs_f64()).min(1.0) as f32
        };
        // a clock that steps backwards must not rewind the fade
        self.progress = self.progress.max(progress);

        let (Some(from), Some(to)) = (self.current.clone(), self.next.clone()) else {
            // both are set whenever a transition is running
            return self.go_idle();
        };
        let command = RenderCommand::ShowBlend {
            from,
            to,
            opacity: self.progress,
        };
        if self.progress >= 1.0 {
            self.finish_transition(now);
        }
        command
    }

    fn begin_transition(&mut self, next: Photo, now: Instant) -> RenderCommand {
        let Some(from) = self.current.clone() else {
            return self.show(next, now);
        };
        info!(
            from = %from.source.path.display(),
            to = %next.source.path.display(),
            fade_ms = self.timing.fade.as_millis() as u64,
            "transition started"
        );
        self.transitions += 1;
        self.progress = 0.0;
        self.next = Some(next.clone());
        self.state = State::Transitioning { started: now };
        RenderCommand::ShowBlend {
            from,
            to: next,
            opacity: 0.0,
        }
    }

    fn finish_transition(&mut self, now: Instant) {
        // the outgoing bitmap is released here
        self.current = self.next.take();
        self.progress = 0.0;
        self.state = State::Hold { since: now };
        if let Some(current) = &self.current {
            self.last_shown = Some(current.source.path.clone());
            debug!(path = %current.source.path.display(), "transition finished");
        }
    }

    fn show(&mut self, photo: Photo, now: Instant) -> RenderCommand {
        info!(path = %photo.source.path.display(), "showing photo");
        self.last_shown = Some(photo.source.path.clone());
        self.current = Some(photo.clone());
        self.next = None;
        self.progress = 0.0;
        self.state = State::Hold { since: now };
        RenderCommand::ShowSingle(photo)
    }

    fn show_current(&self) -> RenderCommand {
        match &self.current {
            Some(photo) => RenderCommand::ShowSingle(photo.clone()),
            None => RenderCommand::Blank,
        }
    }

    fn go_idle(&mut self) -> RenderCommand {
        self.current = None;
        self.next = None;
        self.pending = None;
        self.progress = 0.0;
        self.state = State::Idle;
        RenderCommand::Blank
    }

    fn request_decode(&mut self, set: &PhotoSet, listing: Listing, retrying: bool) {
        let current = self
            .current
            .as_ref()
            .map(|p| p.source.path.as_path())
            .or(self.last_shown.as_deref());
        let Some(start) = set.successor_of(current) else {
            return;
        };
        let candidates = set.rotated_from(start);
        if let Some(first) = candidates.first() {
            debug!(
                candidates = candidates.len(),
                first = %first.path.display(),
                "requesting decode"
            );
        }
        self.requested = listing;
        self.retrying = retrying;
        self.pending = Some(self.decoder.dispatch(candidates));
    }

    /// `None` while still decoding, `Some(None)` when every candidate failed.
    fn poll_pending(&mut self, now: Instant) -> Option<Option<Photo>> {
        let pending = self.pending.as_mut()?;
        match pending.poll() {
            DecodePoll::Pending => None,
            DecodePoll::Abandoned => {
                debug!("decode abandoned");
                self.pending = None;
                self.exhausted = None;
                None
            }
            DecodePoll::Ready(outcome) => {
                self.pending = None;
                for err in &outcome.failures {
                    if self.retrying {
                        debug!(path = %err.path.display(), error = %err.cause, "photo still fails to decode");
                    } else {
                        warn!(path = %err.path.display(), error = %err.cause, "skipping photo that failed to decode");
                    }
                }
                self.decode_failures += outcome.failures.len() as u64;
                let listing = std::mem::take(&mut self.requested);
                self.exhausted = match outcome.photo {
                    Some(_) => None,
                    None => Some(Exhausted {
                        listing,
                        since: now,
                    }),
                };
                Some(outcome.photo)
            }
        }
    }

    fn rescan(&mut self) -> Option<PhotoSet> {
        match self.source.scan() {
            Ok(set) => {
                if self.scan_failure.take().is_some() {
                    info!(photos = set.len(), "photo directory readable again");
                }
                Some(set)
            }
            Err(err) => {
                let message = err.to_string();
                if self.scan_failure.as_deref() == Some(message.as_str()) {
                    debug!(error = %message, "scan still failing");
                } else {
                    warn!(error = %message, "scan failed; showing placeholder");
                    self.scan_failure = Some(message);
                }
                None
            }
        }
    }
}

fn listing_of(set: &PhotoSet) -> Listing {
    set.iter()
        .map(|p| (p.path.clone(), p.modified, p.size))
        .collect()
}
