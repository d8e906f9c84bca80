//! Cutting sample streams into engine windows.

/// Sum interleaved L/R pairs into one mono channel.
///
/// A trailing unpaired sample is dropped.
pub fn downmix_stereo(interleaved: &[f32]) -> Vec<f32> {
    interleaved
        .chunks_exact(2)
        .map(|pair| pair[0] + pair[1])
        .collect()
}

fn window_len(log_window_size: u32) -> usize {
    1usize.checked_shl(log_window_size).unwrap_or(usize::MAX)
}

/// Iterate full windows of `2^log_window_size` samples, `hop` samples apart.
///
/// A partial window at the end is not yielded. `hop` of 0 is treated as 1.
pub fn windows(samples: &[f32], log_window_size: u32, hop: usize) -> impl Iterator<Item = &[f32]> {
    let size = window_len(log_window_size);
    let hop = hop.max(1);
    let count = if samples.len() < size {
        0
    } else {
        (samples.len() - size) / hop + 1
    };
    (0..count).map(move |i| &samples[i * hop..i * hop + size])
}

/// Number of windows [`windows`] yields.
pub fn window_count(len: usize, log_window_size: u32, hop: usize) -> usize {
    let size = window_len(log_window_size);
    if len < size {
        0
    } else {
        (len - size) / hop.max(1) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downmix() {
        assert_eq!(downmix_stereo(&[1.0, 0.0, -1.0, -1.0, 0.5]), vec![1.0, -2.0]);
    }

    #[test]
    fn test_windows_hop() {
        let samples: Vec<f32> = (0..10).map(|v| v as f32).collect();
        let all: Vec<&[f32]> = windows(&samples, 2, 3).collect();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0], &[0.0, 1.0, 2.0, 3.0]);
        assert_eq!(all[2], &[6.0, 7.0, 8.0, 9.0]);
        assert_eq!(window_count(samples.len(), 2, 3), 3);
    }

    #[test]
    fn test_windows_too_short() {
        let samples = [1.0f32; 3];
        assert_eq!(windows(&samples, 2, 4).count(), 0);
        assert_eq!(window_count(3, 2, 4), 0);
    }

    #[test]
    fn test_oversized_exponent_yields_nothing() {
        let samples = [1.0f32; 16];
        assert_eq!(window_count(samples.len(), 64, 1), 0);
        assert_eq!(windows(&samples, 200, 1).count(), 0);
    }
}
