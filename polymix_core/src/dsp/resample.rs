//! Fixed-point resampling kernels.
//!
//! Each kernel reads one channel of the current source block (`src`, one granule long)
//! and may look back into the previous block (`prev`) for interpolation taps that fall
//! before index 0. The cursor is a 44.20 fixed-point position inside `src`; callers
//! guarantee that `(offset + (count - 1) * step) >> 20` stays inside the block.

use crate::config::ResamplerKind;
use crate::constants::{FIXPOINT_FRAC_BITS, FIXPOINT_FRAC_MASK, FIXPOINT_FRAC_MUL};

const FRAC_SCALE: f32 = 1.0 / FIXPOINT_FRAC_MUL as f32;

/// Resample `dst.len()` output samples starting at fixed-point `offset`.
#[inline]
pub fn resample(
    kind: ResamplerKind,
    src: &[f32],
    prev: &[f32],
    dst: &mut [f32],
    offset: u64,
    step: u64,
) {
    match kind {
        ResamplerKind::Point => resample_point(src, dst, offset, step),
        ResamplerKind::Linear => resample_linear(src, prev, dst, offset, step),
        ResamplerKind::CatmullRom => resample_catmull_rom(src, prev, dst, offset, step),
    }
}

pub fn resample_point(src: &[f32], dst: &mut [f32], offset: u64, step: u64) {
    let mut pos = offset;
    for out in dst.iter_mut() {
        *out = src[(pos >> FIXPOINT_FRAC_BITS) as usize];
        pos += step;
    }
}

pub fn resample_linear(src: &[f32], prev: &[f32], dst: &mut [f32], offset: u64, step: u64) {
    let tail = prev[prev.len() - 1];
    let mut pos = offset;
    for out in dst.iter_mut() {
        let p = (pos >> FIXPOINT_FRAC_BITS) as usize;
        let f = (pos & FIXPOINT_FRAC_MASK) as f32 * FRAC_SCALE;
        let s1 = if p == 0 { tail } else { src[p - 1] };
        let s2 = src[p];
        *out = s1 + (s2 - s1) * f;
        pos += step;
    }
}

pub fn resample_catmull_rom(src: &[f32], prev: &[f32], dst: &mut [f32], offset: u64, step: u64) {
    let block = prev.len();
    // Tap `back` samples behind `p`, reaching into the previous block when needed.
    let tap = |p: usize, back: usize| -> f32 {
        if p < back { prev[block + p - back] } else { src[p - back] }
    };
    let mut pos = offset;
    for out in dst.iter_mut() {
        let p = (pos >> FIXPOINT_FRAC_BITS) as usize;
        let f = (pos & FIXPOINT_FRAC_MASK) as f32 * FRAC_SCALE;
        *out = catmull_rom(f, tap(p, 3), tap(p, 2), tap(p, 1), src[p]);
        pos += step;
    }
}

/// Catmull-Rom spline between `p1` and `p2` at `t` in [0, 1).
#[inline]
pub fn catmull_rom(t: f32, p0: f32, p1: f32, p2: f32, p3: f32) -> f32 {
    0.5 * ((2.0 * p1)
        + (-p0 + p2) * t
        + (2.0 * p0 - 5.0 * p1 + 4.0 * p2 - p3) * t * t
        + (-p0 + 3.0 * p1 - 3.0 * p2 + p3) * t * t * t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::SAMPLE_GRANULARITY;

    fn ramp_block(start: f32) -> Vec<f32> {
        (0..SAMPLE_GRANULARITY).map(|i| start + i as f32).collect()
    }

    #[test]
    fn test_point_picks_floor_sample() {
        let src = ramp_block(0.0);
        let mut dst = [0.0f32; 4];
        // Step of 1.5 samples.
        resample_point(&src, &mut dst, 0, FIXPOINT_FRAC_MUL * 3 / 2);
        assert_eq!(dst, [0.0, 1.0, 3.0, 4.0]);
    }

    #[test]
    fn test_linear_uses_previous_block_tail_at_boundary() {
        let prev = ramp_block(-(SAMPLE_GRANULARITY as f32));
        let src = ramp_block(0.0);
        let mut dst = [0.0f32; 3];
        // Half-sample step starting at position 0.
        resample_linear(&src, &prev, &mut dst, 0, FIXPOINT_FRAC_MUL / 2);
        // Position 0.0 blends prev tail (-1) towards src[0] with weight 0.
        assert_eq!(dst[0], -1.0);
        assert_eq!(dst[1], -0.5);
        assert_eq!(dst[2], 0.0);
    }

    #[test]
    fn test_linear_unity_step_is_one_sample_delay() {
        let prev = vec![0.0; SAMPLE_GRANULARITY];
        let src = ramp_block(10.0);
        let mut dst = [0.0f32; 4];
        resample_linear(&src, &prev, &mut dst, 0, FIXPOINT_FRAC_MUL);
        assert_eq!(dst, [0.0, 10.0, 11.0, 12.0]);
    }

    #[test]
    fn test_catmull_rom_preserves_constant_signal() {
        let prev = vec![0.25; SAMPLE_GRANULARITY];
        let src = vec![0.25; SAMPLE_GRANULARITY];
        let mut dst = [0.0f32; 64];
        resample_catmull_rom(&src, &prev, &mut dst, 0, FIXPOINT_FRAC_MUL * 7 / 3);
        for v in dst {
            assert!((v - 0.25).abs() < 1e-6);
        }
    }

    #[test]
    fn test_catmull_rom_hits_control_points() {
        assert_eq!(catmull_rom(0.0, 9.0, 2.0, 5.0, -3.0), 2.0);
        assert!((catmull_rom(1.0, 9.0, 2.0, 5.0, -3.0) - 5.0).abs() < 1e-5);
    }

    #[test]
    fn test_dispatch_matches_kernels() {
        let prev = ramp_block(-512.0);
        let src = ramp_block(0.0);
        let mut a = [0.0f32; 8];
        let mut b = [0.0f32; 8];
        resample(ResamplerKind::Linear, &src, &prev, &mut a, 3, FIXPOINT_FRAC_MUL / 3);
        resample_linear(&src, &prev, &mut b, 3, FIXPOINT_FRAC_MUL / 3);
        assert_eq!(a, b);
    }
}
