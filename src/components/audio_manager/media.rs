//! The audio element seam.
//!
//! The engine never touches the DOM directly: a `MediaBackend` hands out
//! `MediaElement`s bound to one source, and every element reports back through
//! the `MediaSink` it was opened with.

use std::rc::Rc;

use futures_util::future::LocalBoxFuture;

use super::visualizer::SpectrumSource;
use crate::error::{MediaError, PlayError};

/// Raw element notifications, mirroring the DOM media events the engine listens to.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaEvent {
    TimeUpdate,
    LoadedMetadata,
    Playing,
    Pause,
    Ended,
    Error(MediaError),
}

pub type MediaSink = Rc<dyn Fn(MediaEvent)>;

/// One audio element bound to a single source.
pub trait MediaElement: SpectrumSource {
    /// Start playback. Resolves once the browser accepted or refused.
    fn play(&self) -> LocalBoxFuture<'static, Result<(), PlayError>>;
    fn pause(&self);
    fn current_time(&self) -> f64;
    fn set_current_time(&self, seconds: f64);
    /// `None` until metadata has loaded.
    fn duration(&self) -> Option<f64>;
    fn is_paused(&self) -> bool;
    fn set_muted(&self, muted: bool);
    fn set_volume(&self, volume: f64);
    /// Remove listeners and release the element. No events are delivered afterwards.
    fn detach(&self);
}

pub trait MediaBackend {
    fn open(&self, src: &str, sink: MediaSink) -> Result<Rc<dyn MediaElement>, MediaError>;
}

/// Durations reported as NaN, infinite or non-positive count as unknown.
pub fn known_duration(raw: f64) -> Option<f64> {
    (raw.is_finite() && raw > 0.0).then_some(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_duration() {
        assert_eq!(known_duration(f64::NAN), None);
        assert_eq!(known_duration(f64::INFINITY), None);
        assert_eq!(known_duration(0.0), None);
        assert_eq!(known_duration(183.2), Some(183.2));
    }
}
