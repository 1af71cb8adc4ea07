//! Pure formatting for the mini player.

use crate::components::audio_manager::Bars;
use crate::config::visualizer::MIN_BAR_HEIGHT;

/// Resolution of the seek slider.
pub const SEEK_STEPS: f64 = 1000.0;

/// `m:ss`; anything that is not a finite, non-negative number renders as `0:00`.
pub fn format_time(seconds: f64) -> String {
    if !seconds.is_finite() || seconds < 0.0 {
        return "0:00".to_string();
    }
    let total = seconds.floor() as u64;
    format!("{}:{:02}", total / 60, total % 60)
}

/// `current / duration`, e.g. `1:05 / 3:20`.
pub fn time_label(current: f64, duration: Option<f64>) -> String {
    format!(
        "{} / {}",
        format_time(current),
        format_time(duration.unwrap_or(f64::NAN))
    )
}

/// Playback progress in `[0, 1]`.
pub fn progress(current: f64, duration: Option<f64>) -> f64 {
    match duration {
        Some(duration) if duration > 0.0 && current.is_finite() => {
            (current / duration).clamp(0.0, 1.0)
        }
        _ => 0.0,
    }
}

/// Slider position for the current progress.
pub fn slider_value(current: f64, duration: Option<f64>) -> i64 {
    (progress(current, duration) * SEEK_STEPS).round() as i64
}

/// Fraction of the track a slider value points at.
pub fn slider_fraction(raw: &str) -> Option<f64> {
    let value: f64 = raw.trim().parse().ok()?;
    value
        .is_finite()
        .then(|| (value / SEEK_STEPS).clamp(0.0, 1.0))
}

/// Inline heights for the visualizer bars.
pub fn bar_styles(bars: &Bars) -> Vec<String> {
    bars.iter()
        .map(|height| format!("height: {:.1}%;", height.max(MIN_BAR_HEIGHT)))
        .collect()
}
