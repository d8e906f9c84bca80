//! Frequency bin helpers.
//!
//! The engine takes frequencies in whatever unit the caller picks. These
//! helpers produce them in cycles per sample, where `0.5` is Nyquist.

/// Convert a frequency in Hz to cycles per sample.
#[inline]
pub fn hz_to_normalized(hz: f32, sample_rate: f32) -> f32 {
    hz / sample_rate
}

/// `count` evenly spaced frequencies from 0 up to, but excluding, `max`.
pub fn linear_bins(count: usize, max: f32) -> Vec<f32> {
    if count == 0 {
        return Vec::new();
    }
    let step = max / count as f32;
    (0..count).map(|i| i as f32 * step).collect()
}

/// `count` logarithmically spaced frequencies from `min` to `max` inclusive.
///
/// Both bounds must be positive. A single bin sits at `min`.
pub fn log_bins(count: usize, min: f32, max: f32) -> Vec<f32> {
    match count {
        0 => Vec::new(),
        1 => vec![min],
        _ => {
            let ratio = (max / min).ln() / (count - 1) as f32;
            (0..count).map(|i| min * (ratio * i as f32).exp()).collect()
        }
    }
}

/// Display heights for magnitudes on a log scale: `gain · ln(1 + m)`.
pub fn bar_heights(magnitudes: &[f32], gain: f32) -> Vec<f32> {
    magnitudes.iter().map(|m| gain * m.ln_1p()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hz_to_normalized() {
        assert!((hz_to_normalized(11_025.0, 44_100.0) - 0.25).abs() < 1e-7);
    }

    #[test]
    fn test_linear_bins() {
        assert_eq!(linear_bins(4, 0.5), vec![0.0, 0.125, 0.25, 0.375]);
        assert!(linear_bins(0, 0.5).is_empty());
    }

    #[test]
    fn test_log_bins_endpoints() {
        let bins = log_bins(5, 0.001, 0.4);
        assert_eq!(bins.len(), 5);
        assert!((bins[0] - 0.001).abs() < 1e-7);
        assert!((bins[4] - 0.4).abs() < 1e-5);
        assert!(bins.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(log_bins(1, 0.01, 0.4), vec![0.01]);
    }

    #[test]
    fn test_bar_heights() {
        let bars = bar_heights(&[0.0, std::f32::consts::E - 1.0], 50.0);
        assert_eq!(bars[0], 0.0);
        assert!((bars[1] - 50.0).abs() < 1e-4);
    }
}
