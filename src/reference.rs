//! Host implementation of the three pipeline stages.
//!
//! Used to validate device output and as the oracle for the reduction tree.
//! Layouts match the device buffers: `reals`/`imags` hold F blocks of N
//! values, frequency-major.

use rayon::prelude::*;
use std::f32::consts::TAU;

/// Stage A on the host: every per-sample correlation term.
///
/// Returns `(reals, imags)`, each `freqs.len() · samples.len()` long.
pub fn correlate_cells(samples: &[f32], freqs: &[f32]) -> (Vec<f32>, Vec<f32>) {
    let n = samples.len();
    let mut reals = vec![0.0f32; freqs.len() * n];
    let mut imags = vec![0.0f32; freqs.len() * n];

    reals
        .par_chunks_mut(n.max(1))
        .zip(imags.par_chunks_mut(n.max(1)))
        .zip(freqs.par_iter())
        .for_each(|((re_block, im_block), &freq)| {
            for (s, (&sample, (re, im))) in samples
                .iter()
                .zip(re_block.iter_mut().zip(im_block.iter_mut()))
                .enumerate()
            {
                let phase = -TAU * freq * s as f32;
                *re = sample * phase.cos();
                *im = sample * phase.sin();
            }
        });

    (reals, imags)
}

/// Stage B on the host with the device's round schedule.
///
/// For `round` in `1..=log_window_size`, index `i << round` absorbs
/// `(i << round) + 2^(round-1)`. Afterwards each block's sum is at its offset 0.
pub fn tree_reduce(values: &mut [f32], log_window_size: u32) {
    for round in 1..=log_window_size {
        let active = values.len() >> round;
        let half = 1usize << (round - 1);
        for i in 0..active {
            let idx1 = i << round;
            values[idx1] += values[idx1 + half];
        }
    }
}

/// Plain left-to-right sum of each block of `window_size` values.
pub fn linear_sums(values: &[f32], window_size: usize) -> Vec<f32> {
    values
        .chunks(window_size.max(1))
        .map(|block| block.iter().sum())
        .collect()
}

/// Stage C on the host: `sqrt(re² + im²) / N` for each reduced block.
pub fn average(reals: &[f32], imags: &[f32], log_window_size: u32) -> Vec<f32> {
    let n = 1usize << log_window_size;
    reals
        .iter()
        .step_by(n)
        .zip(imags.iter().step_by(n))
        .map(|(re, im)| (re * re + im * im).sqrt() / n as f32)
        .collect()
}

/// All three stages on the host.
///
/// `samples.len()` must be a power of two.
pub fn magnitudes(samples: &[f32], freqs: &[f32]) -> Vec<f32> {
    debug_assert!(samples.len().is_power_of_two());
    let log_window_size = samples.len().trailing_zeros();
    let (mut reals, mut imags) = correlate_cells(samples, freqs);
    tree_reduce(&mut reals, log_window_size);
    tree_reduce(&mut imags, log_window_size);
    average(&reals, &imags, log_window_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn assert_close(a: f32, b: f32, tol: f32) {
        assert!((a - b).abs() <= tol, "{} vs {} (tol {})", a, b, tol);
    }

    #[test]
    fn test_dc_of_constant() {
        let out = magnitudes(&[1.0; 8], &[0.0]);
        assert_close(out[0], 1.0, 1e-6);
    }

    #[test]
    fn test_dc_of_alternating() {
        let out = magnitudes(&[1.0, -1.0, 1.0, -1.0, 1.0, -1.0, 1.0, -1.0], &[0.0]);
        assert_close(out[0], 0.0, 1e-6);
    }

    #[test]
    fn test_bin_selectivity() {
        let out = magnitudes(&[1.0, 0.0, -1.0, 0.0], &[0.0, 0.25]);
        assert_close(out[0], 0.0, 1e-6);
        assert_close(out[1], 0.5, 1e-5);
        assert!(out[1] > out[0]);
    }

    #[test]
    fn test_tree_matches_linear_sum() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        for log_window_size in 0..=10u32 {
            let n = 1usize << log_window_size;
            let blocks = 3;
            let values: Vec<f32> = (0..n * blocks).map(|_| rng.gen_range(-1.0..1.0)).collect();

            let expected = linear_sums(&values, n);
            let mut reduced = values.clone();
            tree_reduce(&mut reduced, log_window_size);

            for (f, &want) in expected.iter().enumerate() {
                assert_close(reduced[f * n], want, 1e-4 * n as f32);
            }
        }
    }

    #[test]
    fn test_tree_single_round_touches_only_active_slots() {
        let values: Vec<f32> = (0..16).map(|v| v as f32).collect();
        let mut reduced = values.clone();
        let active = values.len() >> 1;
        for i in 0..active {
            reduced[i << 1] += reduced[(i << 1) + 1];
        }
        let mut scheduled = values.clone();
        tree_reduce(&mut scheduled[..], 1);
        assert_eq!(scheduled, reduced);
        for i in (1..16).step_by(2) {
            assert_eq!(scheduled[i], values[i]);
        }
    }

    #[test]
    fn test_correlate_cells_layout() {
        let (reals, imags) = correlate_cells(&[2.0, 3.0], &[0.0, 0.5]);
        assert_eq!(reals.len(), 4);
        // f=0: no rotation
        assert_close(reals[0], 2.0, 1e-6);
        assert_close(reals[1], 3.0, 1e-6);
        assert_close(imags[1], 0.0, 1e-6);
        // f=0.5, s=1: phase -π
        assert_close(reals[3], -3.0, 1e-5);
        assert_close(imags[3], 0.0, 1e-5);
    }
}
