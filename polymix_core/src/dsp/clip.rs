//! Final-stage clipping and interleaving.
//!
//! Design goals:
//! - Process four samples per step with `wide::f32x4`; scalar tail for the remainder.
//! - No allocation: callers hand in planar scratch buffers sized by the engine.
//! - Global volume is ramped linearly across the buffer so volume changes never click.

use wide::f32x4;

use crate::constants::{SOFT_CLIP_KNEE, SOFT_CLIP_WALL};

/// Parameters for one clip pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipParams {
    /// Global volume at the first frame
    pub volume_start: f32,
    /// Global volume reached at the end of the buffer
    pub volume_end: f32,
    /// Soft-clip (`0.87x - 0.1x³`) instead of clamping to ±1
    pub roundoff: bool,
    /// Gain applied after clipping
    pub post_scale: f32,
}

#[inline]
fn soft_clip(x: f32) -> f32 {
    if x <= -SOFT_CLIP_KNEE {
        -SOFT_CLIP_WALL
    } else if x >= SOFT_CLIP_KNEE {
        SOFT_CLIP_WALL
    } else {
        0.87 * x - 0.1 * x * x * x
    }
}

#[inline]
fn soft_clip_x4(x: f32x4) -> f32x4 {
    // The polynomial evaluates to the wall value exactly at the knee, so clamping the
    // input first saturates the same way the scalar branch does.
    let knee = f32x4::splat(SOFT_CLIP_KNEE);
    let x = x.max(-knee).min(knee);
    f32x4::splat(0.87) * x - f32x4::splat(0.1) * x * x * x
}

#[inline]
fn hard_clip_x4(x: f32x4) -> f32x4 {
    x.max(f32x4::splat(-1.0)).min(f32x4::splat(1.0))
}

/// Apply volume, clipping and post-scale from the planar `src` into the planar `dst`.
///
/// - `frames`: samples per channel to process.
/// - `stride`: distance between channel starts in both buffers.
/// - `channels`: number of planar channels.
pub fn clip(
    src: &[f32],
    dst: &mut [f32],
    frames: usize,
    stride: usize,
    channels: usize,
    params: ClipParams,
) {
    if frames == 0 {
        return;
    }
    let volume_step = (params.volume_end - params.volume_start) / frames as f32;
    let post = f32x4::splat(params.post_scale);
    let lanes = f32x4::from([0.0, 1.0, 2.0, 3.0]);
    let vector_frames = frames & !3;

    for channel in 0..channels {
        let base = channel * stride;
        let input = &src[base..base + frames];
        let output = &mut dst[base..base + frames];

        let mut i = 0;
        while i < vector_frames {
            let volume = f32x4::splat(params.volume_start + volume_step * i as f32)
                + lanes * f32x4::splat(volume_step);
            let x = f32x4::from([input[i], input[i + 1], input[i + 2], input[i + 3]]) * volume;
            let y = if params.roundoff {
                soft_clip_x4(x)
            } else {
                hard_clip_x4(x)
            } * post;
            output[i..i + 4].copy_from_slice(&y.to_array());
            i += 4;
        }

        while i < frames {
            let volume = params.volume_start + volume_step * i as f32;
            let x = input[i] * volume;
            let y = if params.roundoff {
                soft_clip(x)
            } else {
                x.clamp(-1.0, 1.0)
            };
            output[i] = y * params.post_scale;
            i += 1;
        }
    }
}

/// Planar to interleaved float.
pub fn interleave_f32(src: &[f32], out: &mut [f32], frames: usize, stride: usize, channels: usize) {
    for channel in 0..channels {
        let plane = &src[channel * stride..channel * stride + frames];
        for (frame, &sample) in plane.iter().enumerate() {
            out[frame * channels + channel] = sample;
        }
    }
}

/// Planar to interleaved signed 16-bit, scaling by `0x7FFF` with truncation.
pub fn interleave_s16(src: &[f32], out: &mut [i16], frames: usize, stride: usize, channels: usize) {
    for channel in 0..channels {
        let plane = &src[channel * stride..channel * stride + frames];
        for (frame, &sample) in plane.iter().enumerate() {
            out[frame * channels + channel] = (sample * 32767.0) as i16;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(roundoff: bool) -> ClipParams {
        ClipParams {
            volume_start: 1.0,
            volume_end: 1.0,
            roundoff,
            post_scale: 0.95,
        }
    }

    #[test]
    fn test_soft_clip_saturates_at_wall() {
        assert_eq!(soft_clip(10.0), SOFT_CLIP_WALL);
        assert_eq!(soft_clip(-10.0), -SOFT_CLIP_WALL);
        assert!((soft_clip(SOFT_CLIP_KNEE - 1e-6) - SOFT_CLIP_WALL).abs() < 1e-4);
    }

    #[test]
    fn test_output_never_exceeds_post_scale() {
        let src: Vec<f32> = (0..37).map(|i| (i as f32 - 18.0) * 0.7).collect();
        for roundoff in [false, true] {
            let mut dst = vec![0.0; src.len()];
            clip(&src, &mut dst, src.len(), src.len(), 1, params(roundoff));
            for v in &dst {
                assert!(v.abs() <= 0.95 + 1e-6, "{v}");
            }
        }
    }

    #[test]
    fn test_vector_and_scalar_paths_agree() {
        let src: Vec<f32> = (0..11).map(|i| (i as f32 - 5.0) * 0.33).collect();
        let mut dst = vec![0.0; 11];
        let p = ClipParams {
            volume_start: 0.5,
            volume_end: 1.5,
            roundoff: true,
            post_scale: 1.0,
        };
        clip(&src, &mut dst, 11, 11, 1, p);
        let step = 1.0 / 11.0;
        for (i, (&x, &y)) in src.iter().zip(&dst).enumerate() {
            let expected = soft_clip(x * (0.5 + step * i as f32));
            assert!((expected - y).abs() < 1e-5, "frame {i}: {expected} vs {y}");
        }
    }

    #[test]
    fn test_hard_clip_passes_small_signals() {
        let src = [0.5f32, -0.25, 2.0, -3.0];
        let mut dst = [0.0f32; 4];
        clip(&src, &mut dst, 4, 4, 1, params(false));
        assert!((dst[0] - 0.475).abs() < 1e-6);
        assert!((dst[1] + 0.2375).abs() < 1e-6);
        assert!((dst[2] - 0.95).abs() < 1e-6);
        assert!((dst[3] + 0.95).abs() < 1e-6);
    }

    #[test]
    fn test_interleave_formats() {
        // Two channels, stride 4, three frames.
        let src = [0.1, 0.2, 0.3, 9.0, -0.1, -0.2, -0.3, 9.0];
        let mut f = [0.0f32; 6];
        interleave_f32(&src, &mut f, 3, 4, 2);
        assert_eq!(f, [0.1, -0.1, 0.2, -0.2, 0.3, -0.3]);

        let mut s = [0i16; 6];
        interleave_s16(&[1.0, -1.0], &mut s[..2], 1, 1, 2);
        assert_eq!(&s[..2], &[32767, -32767]);
    }
}
