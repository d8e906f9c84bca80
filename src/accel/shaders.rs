//! WGSL compute kernels for the three-stage spectral pipeline.
//!
//! All three kernels live in one module and share one binding table:
//!
//! | Binding | Buffer | Access |
//! |---|---|---|
//! | 0 | params (uniform) | read |
//! | 1 | samples (N) | read |
//! | 2 | freqs (F) | read |
//! | 3 | reals (F·N) | read_write |
//! | 4 | imags (F·N) | read_write |
//! | 5 | magnitudes (F) | read_write |
//!
//! Launches may use a 2-D grid when the group count exceeds the per-dimension
//! dispatch limit; the flat item index is rebuilt from `num_workgroups`.

/// Placeholder replaced with the chosen local work-group size at `init`.
pub const WORKGROUP_SIZE_TOKEN: &str = "{{WORKGROUP_SIZE}}";

/// Entry point of Stage A (per-sample correlation terms).
pub const COMPUTE_CELL_ENTRY: &str = "compute_cell";

/// Entry point of Stage B (one pairwise reduction round).
pub const PARTIAL_SUM_ENTRY: &str = "partial_sum";

/// Entry point of Stage C (magnitude of each reduced sum).
pub const AVERAGE_ENTRY: &str = "average";

/// Three-stage correlation program.
///
/// - `compute_cell`: item `i < count` writes `samples[s] * cos(phase)` and
///   `samples[s] * sin(phase)` with `phase = -2π · freqs[f] · s`, where
///   `f = i >> log_window_size` and `s = i & (N - 1)`. The phase is wrapped
///   to one turn before `sin`/`cos`.
/// - `partial_sum`: item `i < count` folds `idx1 + 2^(round-1)` into
///   `idx1 = i << round`.
/// - `average`: item `f < count` writes `sqrt(re² + im²) / N` from the
///   reduced sums at `f · N`.
pub const SPECTRAL_SHADER: &str = r#"
const WORKGROUP_SIZE: u32 = {{WORKGROUP_SIZE}}u;
const TAU: f32 = 6.283185307179586;

struct Params {
    log_window_size: u32,
    round: u32,
    count: u32,
    _padding: u32,
}

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var<storage, read> samples: array<f32>;
@group(0) @binding(2) var<storage, read> freqs: array<f32>;
@group(0) @binding(3) var<storage, read_write> reals: array<f32>;
@group(0) @binding(4) var<storage, read_write> imags: array<f32>;
@group(0) @binding(5) var<storage, read_write> magnitudes: array<f32>;

fn flat_index(global_id: vec3<u32>, groups: vec3<u32>) -> u32 {
    return global_id.y * groups.x * WORKGROUP_SIZE + global_id.x;
}

@compute @workgroup_size(WORKGROUP_SIZE)
fn compute_cell(
    @builtin(global_invocation_id) global_id: vec3<u32>,
    @builtin(num_workgroups) groups: vec3<u32>
) {
    let i = flat_index(global_id, groups);
    if (i >= params.count) {
        return;
    }

    let freq_idx = i >> params.log_window_size;
    let sample_idx = i & ((1u << params.log_window_size) - 1u);
    let value = samples[sample_idx];
    // Same angle as -TAU * f * s, wrapped into [-PI, PI) where sin/cos are exact enough
    let turns = fract(freqs[freq_idx] * f32(sample_idx) + 0.5) - 0.5;
    let phase = -TAU * turns;

    reals[i] = value * cos(phase);
    imags[i] = value * sin(phase);
}

@compute @workgroup_size(WORKGROUP_SIZE)
fn partial_sum(
    @builtin(global_invocation_id) global_id: vec3<u32>,
    @builtin(num_workgroups) groups: vec3<u32>
) {
    let i = flat_index(global_id, groups);
    if (i >= params.count) {
        return;
    }

    let idx1 = i << params.round;
    let idx2 = idx1 + (1u << (params.round - 1u));

    reals[idx1] = reals[idx1] + reals[idx2];
    imags[idx1] = imags[idx1] + imags[idx2];
}

@compute @workgroup_size(WORKGROUP_SIZE)
fn average(
    @builtin(global_invocation_id) global_id: vec3<u32>,
    @builtin(num_workgroups) groups: vec3<u32>
) {
    let i = flat_index(global_id, groups);
    if (i >= params.count) {
        return;
    }

    let idx = i << params.log_window_size;
    let re = reals[idx];
    let im = imags[idx];

    magnitudes[i] = sqrt(re * re + im * im) / f32(1u << params.log_window_size);
}
"#;

/// Return the program text with the local work-group size filled in.
pub fn spectral_source(workgroup_size: u32) -> String {
    SPECTRAL_SHADER.replace(WORKGROUP_SIZE_TOKEN, &workgroup_size.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_substitutes_workgroup_size() {
        let source = spectral_source(128);
        assert!(source.contains("const WORKGROUP_SIZE: u32 = 128u;"));
        assert!(!source.contains(WORKGROUP_SIZE_TOKEN));
    }

    #[test]
    fn test_source_has_all_entry_points() {
        for entry in [COMPUTE_CELL_ENTRY, PARTIAL_SUM_ENTRY, AVERAGE_ENTRY] {
            assert!(
                SPECTRAL_SHADER.contains(&format!("fn {}(", entry)),
                "missing entry point {}",
                entry
            );
        }
    }
}
