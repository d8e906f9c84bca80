//! Work-group sizing shared by every kernel launch.

use crate::error::{Result, SpectralError};

/// Round `count` up to the next multiple of `local`.
///
/// The result is the smallest multiple of `local` that is `>= count`.
/// Items in `count..global` are launched but return early in the kernel.
#[inline]
pub fn global_size(count: u64, local: u64) -> u64 {
    debug_assert!(local > 0);
    let mut global = count;
    let d = global % local;
    if d != 0 {
        global += local - d;
    }
    global
}

/// Workgroup counts handed to `dispatch_workgroups`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchGrid {
    /// Groups along x.
    pub x: u32,
    /// Groups along y (1 unless x hit the per-dimension limit).
    pub y: u32,
}

impl DispatchGrid {
    /// Number of items the grid launches.
    pub fn invocations(&self, local: u32) -> u64 {
        self.x as u64 * self.y as u64 * local as u64
    }
}

/// Lay out `count` items over groups of `local`, wrapping into a second
/// dimension when the group count exceeds `max_per_dimension`.
pub fn dispatch_grid(count: u32, local: u32, max_per_dimension: u32) -> Result<DispatchGrid> {
    if local == 0 || max_per_dimension == 0 {
        return Err(SpectralError::Config(format!(
            "invalid work-group limits (local {}, max groups {})",
            local, max_per_dimension
        )));
    }

    let groups = global_size(count as u64, local as u64) / local as u64;
    if groups <= max_per_dimension as u64 {
        return Ok(DispatchGrid {
            x: groups as u32,
            y: 1,
        });
    }

    let x = max_per_dimension as u64;
    let y = groups.div_ceil(x);
    if y > max_per_dimension as u64 {
        return Err(SpectralError::Config(format!(
            "{} items need {} work-groups, more than the device can dispatch",
            count, groups
        )));
    }

    Ok(DispatchGrid {
        x: x as u32,
        y: y as u32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_size_is_smallest_multiple() {
        for local in 1..=70u64 {
            for count in 0..=300u64 {
                let global = global_size(count, local);
                assert_eq!(global % local, 0);
                assert!(global >= count);
                assert!(global < count + local, "count {} local {}", count, local);
            }
        }
    }

    #[test]
    fn test_global_size_exact_multiple_unchanged() {
        assert_eq!(global_size(128, 64), 128);
        assert_eq!(global_size(129, 64), 192);
        assert_eq!(global_size(1, 256), 256);
    }

    #[test]
    fn test_dispatch_grid_single_row() {
        let grid = dispatch_grid(1000, 64, 65_535).unwrap();
        assert_eq!(grid, DispatchGrid { x: 16, y: 1 });
        assert_eq!(grid.invocations(64), 1024);
    }

    #[test]
    fn test_dispatch_grid_wraps() {
        let grid = dispatch_grid(10_000, 1, 100).unwrap();
        assert_eq!(grid, DispatchGrid { x: 100, y: 100 });

        let grid = dispatch_grid(10_001, 1, 100);
        assert!(grid.is_err());

        let grid = dispatch_grid(5_050, 4, 100).unwrap();
        assert_eq!(grid.x, 100);
        assert_eq!(grid.y, 13);
        assert!(grid.invocations(4) >= 5_050);
    }

    #[test]
    fn test_dispatch_grid_rejects_zero_local() {
        assert!(dispatch_grid(10, 0, 100).is_err());
    }
}
