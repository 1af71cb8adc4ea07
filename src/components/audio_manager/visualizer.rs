//! Bar visualizer for the mini panel.
//!
//! Frames are capped at the configured rate and smoothed exponentially. When
//! no spectrum is available a seeded pseudo-random pattern stands in.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::visualizer::{BAR_COUNT, FRAME_INTERVAL_MS, MIN_BAR_HEIGHT, SMOOTHING};

pub type Bars = [f32; BAR_COUNT];

/// Anything that can provide byte frequency data (0-255 per bin).
pub trait SpectrumSource {
    /// Fill `bins` with the current spectrum. Returns `false` when no real
    /// analysis is available.
    fn frequency_data(&self, bins: &mut Vec<u8>) -> bool;
}

/// Source used when there is no element at all.
pub struct NoSpectrum;

impl SpectrumSource for NoSpectrum {
    fn frequency_data(&self, _bins: &mut Vec<u8>) -> bool {
        false
    }
}

pub struct Visualizer {
    bars: Bars,
    running: bool,
    last_frame_ms: Option<f64>,
    bins: Vec<u8>,
    rng: StdRng,
}

impl Default for Visualizer {
    fn default() -> Self {
        Self::new(0x6d69_6b75)
    }
}

impl Visualizer {
    pub fn new(seed: u64) -> Self {
        Self {
            bars: [MIN_BAR_HEIGHT; BAR_COUNT],
            running: false,
            last_frame_ms: None,
            bins: Vec::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn start(&mut self) {
        self.running = true;
    }

    /// Stop sampling and drop the bars back to the floor.
    pub fn stop(&mut self) {
        self.running = false;
        self.last_frame_ms = None;
        self.bars = [MIN_BAR_HEIGHT; BAR_COUNT];
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn bars(&self) -> Bars {
        self.bars
    }

    /// Produce the next frame, or `None` when stopped or throttled.
    pub fn frame<S: SpectrumSource + ?Sized>(&mut self, now_ms: f64, source: &S) -> Option<Bars> {
        if !self.running {
            return None;
        }
        if let Some(last) = self.last_frame_ms {
            if now_ms - last < f64::from(FRAME_INTERVAL_MS) {
                return None;
            }
        }
        self.last_frame_ms = Some(now_ms);

        let targets = if source.frequency_data(&mut self.bins) && !self.bins.is_empty() {
            spectrum_targets(&self.bins)
        } else {
            self.pseudo_targets(now_ms)
        };

        for (bar, target) in self.bars.iter_mut().zip(targets) {
            *bar = smooth(*bar, target).max(MIN_BAR_HEIGHT);
        }
        Some(self.bars)
    }

    fn pseudo_targets(&mut self, now_ms: f64) -> Bars {
        let t = (now_ms / 1000.0) as f32;
        let mut targets = [0.0; BAR_COUNT];
        for (i, target) in targets.iter_mut().enumerate() {
            let jitter: f32 = self.rng.gen();
            let wave = (t * 2.0 + i as f32 * 0.5).sin();
            *target = (40.0 + 30.0 * wave * jitter).max(10.0);
        }
        targets
    }
}

pub fn smooth(previous: f32, target: f32) -> f32 {
    previous + (target - previous) * SMOOTHING
}

/// Map the low quarter of the spectrum onto the bars, as percentages.
fn spectrum_targets(bins: &[u8]) -> Bars {
    let mut targets = [0.0; BAR_COUNT];
    let span = bins.len() / 4;
    for (i, target) in targets.iter_mut().enumerate() {
        let index = (i * span / BAR_COUNT).min(bins.len() - 1);
        *target = f32::from(bins[index]) / 255.0 * 100.0;
    }
    targets
}
