//! Channel remapping of a voice into its bus, with per-speaker gain ramps.
//!
//! The routing table is keyed by (source channels, bus channels), both from
//! {1, 2, 4, 6, 8}. Each destination speaker lists the source channels feeding it and
//! their weights. Gains ramp linearly from the voice's current per-speaker volume to the
//! target over the buffer, so consecutive buffers join without zipper noise.

use crate::constants::MAX_CHANNELS;

type Taps = &'static [(usize, f32)];
type Routing = &'static [Taps];

const HALF: f32 = 0.5;
const QUARTER: f32 = 0.25;

// Mono bus: every source channel is summed.
const TO_1_FROM_1: Routing = &[&[(0, 1.0)]];
const TO_1_FROM_2: Routing = &[&[(0, 1.0), (1, 1.0)]];
const TO_1_FROM_4: Routing = &[&[(0, 1.0), (1, 1.0), (2, 1.0), (3, 1.0)]];
const TO_1_FROM_6: Routing = &[&[(0, 1.0), (1, 1.0), (2, 1.0), (3, 1.0), (4, 1.0), (5, 1.0)]];
const TO_1_FROM_8: Routing = &[&[
    (0, 1.0),
    (1, 1.0),
    (2, 1.0),
    (3, 1.0),
    (4, 1.0),
    (5, 1.0),
    (6, 1.0),
    (7, 1.0),
]];

const TO_2_FROM_1: Routing = &[&[(0, 1.0)], &[(0, 1.0)]];
const TO_2_FROM_2: Routing = &[&[(0, 1.0)], &[(1, 1.0)]];
const TO_2_FROM_4: Routing = &[&[(0, HALF), (2, HALF)], &[(1, HALF), (3, HALF)]];
const TO_2_FROM_6: Routing = &[
    &[(0, 0.3), (2, 0.3), (3, 0.3), (4, 0.3)],
    &[(1, 0.3), (2, 0.3), (3, 0.3), (5, 0.3)],
];
const TO_2_FROM_8: Routing = &[
    &[(0, 0.2), (2, 0.2), (3, 0.2), (4, 0.2), (6, 0.2)],
    &[(1, 0.2), (2, 0.2), (3, 0.2), (5, 0.2), (7, 0.2)],
];

const TO_4_FROM_1: Routing = &[&[(0, 1.0)], &[(0, 1.0)], &[(0, 1.0)], &[(0, 1.0)]];
const TO_4_FROM_2: Routing = &[&[(0, 1.0)], &[(1, 1.0)], &[(0, 1.0)], &[(1, 1.0)]];
const TO_4_FROM_4: Routing = &[&[(0, 1.0)], &[(1, 1.0)], &[(2, 1.0)], &[(3, 1.0)]];
const TO_4_FROM_6: Routing = &[
    &[(0, 1.0), (2, 0.7), (3, 0.7)],
    &[(1, 1.0), (2, 0.7), (3, 0.7)],
    &[(4, 1.0)],
    &[(5, 1.0)],
];
const TO_4_FROM_8: Routing = &[
    &[(0, 1.0), (2, 0.7), (3, 0.7)],
    &[(1, 1.0), (2, 0.7), (3, 0.7)],
    &[(4, HALF), (6, HALF)],
    &[(5, HALF), (7, HALF)],
];

const TO_6_FROM_1: Routing = &[
    &[(0, 1.0)],
    &[(0, 1.0)],
    &[(0, 1.0)],
    &[(0, 1.0)],
    &[(0, 1.0)],
    &[(0, 1.0)],
];
const TO_6_FROM_2: Routing = &[
    &[(0, 1.0)],
    &[(1, 1.0)],
    &[(0, HALF), (1, HALF)],
    &[(0, HALF), (1, HALF)],
    &[(0, 1.0)],
    &[(1, 1.0)],
];
const TO_6_FROM_4: Routing = &[
    &[(0, 1.0)],
    &[(1, 1.0)],
    &[(0, HALF), (1, HALF)],
    &[(0, QUARTER), (1, QUARTER), (2, QUARTER), (3, QUARTER)],
    &[(2, 1.0)],
    &[(3, 1.0)],
];
const TO_6_FROM_6: Routing = &[
    &[(0, 1.0)],
    &[(1, 1.0)],
    &[(2, 1.0)],
    &[(3, 1.0)],
    &[(4, 1.0)],
    &[(5, 1.0)],
];
const TO_6_FROM_8: Routing = &[
    &[(0, 1.0)],
    &[(1, 1.0)],
    &[(2, 1.0)],
    &[(3, 1.0)],
    &[(4, HALF), (6, HALF)],
    &[(5, HALF), (7, HALF)],
];

const TO_8_FROM_1: Routing = &[
    &[(0, 1.0)],
    &[(0, 1.0)],
    &[(0, 1.0)],
    &[(0, 1.0)],
    &[(0, 1.0)],
    &[(0, 1.0)],
    &[(0, 1.0)],
    &[(0, 1.0)],
];
const TO_8_FROM_2: Routing = &[
    &[(0, 1.0)],
    &[(1, 1.0)],
    &[(0, HALF), (1, HALF)],
    &[(0, HALF), (1, HALF)],
    &[(0, 1.0)],
    &[(1, 1.0)],
    &[(0, 1.0)],
    &[(1, 1.0)],
];
const TO_8_FROM_4: Routing = &[
    &[(0, 1.0)],
    &[(1, 1.0)],
    &[(0, HALF), (1, HALF)],
    &[(0, QUARTER), (1, QUARTER), (2, QUARTER), (3, QUARTER)],
    &[(0, HALF), (2, HALF)],
    &[(1, HALF), (3, HALF)],
    &[(2, 1.0)],
    &[(3, 1.0)],
];
const TO_8_FROM_6: Routing = &[
    &[(0, 1.0)],
    &[(1, 1.0)],
    &[(2, 1.0)],
    &[(3, 1.0)],
    &[(4, HALF), (0, HALF)],
    &[(5, HALF), (1, HALF)],
    &[(4, 1.0)],
    &[(5, 1.0)],
];
const TO_8_FROM_8: Routing = &[
    &[(0, 1.0)],
    &[(1, 1.0)],
    &[(2, 1.0)],
    &[(3, 1.0)],
    &[(4, 1.0)],
    &[(5, 1.0)],
    &[(6, 1.0)],
    &[(7, 1.0)],
];

/// Routing for a (source, destination) layout pair, one tap list per destination speaker.
pub fn routing(source_channels: usize, bus_channels: usize) -> Option<&'static [Taps]> {
    let table = match (bus_channels, source_channels) {
        (1, 1) => TO_1_FROM_1,
        (1, 2) => TO_1_FROM_2,
        (1, 4) => TO_1_FROM_4,
        (1, 6) => TO_1_FROM_6,
        (1, 8) => TO_1_FROM_8,
        (2, 1) => TO_2_FROM_1,
        (2, 2) => TO_2_FROM_2,
        (2, 4) => TO_2_FROM_4,
        (2, 6) => TO_2_FROM_6,
        (2, 8) => TO_2_FROM_8,
        (4, 1) => TO_4_FROM_1,
        (4, 2) => TO_4_FROM_2,
        (4, 4) => TO_4_FROM_4,
        (4, 6) => TO_4_FROM_6,
        (4, 8) => TO_4_FROM_8,
        (6, 1) => TO_6_FROM_1,
        (6, 2) => TO_6_FROM_2,
        (6, 4) => TO_6_FROM_4,
        (6, 6) => TO_6_FROM_6,
        (6, 8) => TO_6_FROM_8,
        (8, 1) => TO_8_FROM_1,
        (8, 2) => TO_8_FROM_2,
        (8, 4) => TO_8_FROM_4,
        (8, 6) => TO_8_FROM_6,
        (8, 8) => TO_8_FROM_8,
        _ => return None,
    };
    Some(table)
}

/// Gain ramp state shared by a voice across buffers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PanRamp<'a> {
    /// Per-speaker gain at the start of this buffer
    pub current: &'a [f32; MAX_CHANNELS],
    /// Per-speaker gain to reach by the last frame
    pub target: &'a [f32; MAX_CHANNELS],
}

/// Accumulate `frames` samples of the planar `voice` block into the planar `bus` buffer.
///
/// Both buffers use `stride` between channels. Returns the per-speaker gains the ramp
/// ended on, which the caller stores as the next buffer's starting point. Layout pairs
/// outside the table contribute nothing.
pub fn pan_and_expand(
    bus: &mut [f32],
    voice: &[f32],
    frames: usize,
    stride: usize,
    source_channels: usize,
    bus_channels: usize,
    ramp: PanRamp<'_>,
) -> [f32; MAX_CHANNELS] {
    let mut gains = *ramp.current;
    let Some(routes) = routing(source_channels, bus_channels) else {
        return end_gains(ramp);
    };
    if frames == 0 {
        return end_gains(ramp);
    }

    let mut increment = [0.0f32; MAX_CHANNELS];
    for k in 0..bus_channels {
        increment[k] = (ramp.target[k] - ramp.current[k]) / frames as f32;
    }

    for j in 0..frames {
        for k in 0..bus_channels {
            gains[k] += increment[k];
        }
        for (k, taps) in routes.iter().enumerate() {
            let mut mixed = 0.0;
            for &(channel, weight) in taps.iter() {
                mixed += voice[channel * stride + j] * weight;
            }
            bus[k * stride + j] += mixed * gains[k];
        }
    }

    end_gains(ramp)
}

fn end_gains(ramp: PanRamp<'_>) -> [f32; MAX_CHANNELS] {
    *ramp.target
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::SUPPORTED_CHANNEL_COUNTS;

    #[test]
    fn test_every_supported_pair_has_a_route() {
        for &src in &SUPPORTED_CHANNEL_COUNTS {
            for &dst in &SUPPORTED_CHANNEL_COUNTS {
                let routes = routing(src, dst).expect("route");
                assert_eq!(routes.len(), dst);
                for taps in routes {
                    assert!(taps.iter().all(|&(ch, _)| ch < src));
                }
            }
        }
        assert!(routing(3, 2).is_none());
    }

    #[test]
    fn test_stereo_passthrough_with_constant_gain() {
        let frames = 4;
        let voice = [1.0, 2.0, 3.0, 4.0, -1.0, -2.0, -3.0, -4.0];
        let mut bus = [0.0f32; 8];
        let gains = [0.5, 0.25, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0];
        let end = pan_and_expand(
            &mut bus,
            &voice,
            frames,
            frames,
            2,
            2,
            PanRamp {
                current: &gains,
                target: &gains,
            },
        );
        assert_eq!(bus, [0.5, 1.0, 1.5, 2.0, -0.25, -0.5, -0.75, -1.0]);
        assert_eq!(end, gains);
    }

    #[test]
    fn test_ramp_reaches_target_on_last_frame() {
        let frames = 4;
        let voice = [1.0f32; 4];
        let mut bus = [0.0f32; 8];
        let current = [0.0f32; MAX_CHANNELS];
        let target = [1.0f32; MAX_CHANNELS];
        pan_and_expand(
            &mut bus,
            &voice,
            frames,
            frames,
            1,
            2,
            PanRamp {
                current: &current,
                target: &target,
            },
        );
        assert_eq!(&bus[..4], &[0.25, 0.5, 0.75, 1.0]);
        assert_eq!(&bus[4..], &[0.25, 0.5, 0.75, 1.0]);
    }

    #[test]
    fn test_surround_downmix_to_stereo() {
        let frames = 1;
        // L R C LFE SL SR BL BR
        let voice = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
        let mut bus = [0.0f32; 2];
        let unity = [1.0f32; MAX_CHANNELS];
        pan_and_expand(
            &mut bus,
            &voice,
            frames,
            frames,
            8,
            2,
            PanRamp {
                current: &unity,
                target: &unity,
            },
        );
        assert!((bus[0] - 0.2 * (1.0 + 3.0 + 4.0 + 5.0 + 7.0)).abs() < 1e-5);
        assert!((bus[1] - 0.2 * (2.0 + 3.0 + 4.0 + 6.0 + 8.0)).abs() < 1e-5);
    }

    #[test]
    fn test_stereo_upmix_to_5_1() {
        let voice = [0.8, 0.4];
        let mut bus = [0.0f32; 6];
        let unity = [1.0f32; MAX_CHANNELS];
        pan_and_expand(
            &mut bus,
            &voice,
            1,
            1,
            2,
            6,
            PanRamp {
                current: &unity,
                target: &unity,
            },
        );
        let centre = 0.5 * (0.8 + 0.4);
        let expected = [0.8, 0.4, centre, centre, 0.8, 0.4];
        for (got, want) in bus.iter().zip(expected) {
            assert!((got - want).abs() < 1e-6);
        }
    }

    #[test]
    fn test_centre_blend_follows_speaker_gain() {
        let frames = 1;
        // L R C LFE SL SR
        let voice = [1.0, 1.0, 1.0, 1.0, 1.0, 1.0];
        let mut bus = [0.0f32; 4];
        let muted = [0.0f32; MAX_CHANNELS];
        pan_and_expand(
            &mut bus,
            &voice,
            frames,
            frames,
            6,
            4,
            PanRamp {
                current: &muted,
                target: &muted,
            },
        );
        assert_eq!(bus, [0.0; 4]);

        let mut gains = [1.0f32; MAX_CHANNELS];
        gains[0] = 0.5;
        pan_and_expand(
            &mut bus,
            &voice,
            frames,
            frames,
            6,
            4,
            PanRamp {
                current: &gains,
                target: &gains,
            },
        );
        assert!((bus[0] - 0.5 * 2.4).abs() < 1e-6);
        assert!((bus[1] - 2.4).abs() < 1e-6);
    }

    #[test]
    fn test_quad_back_pair_drives_rear_speakers_with_their_own_gain() {
        let frames = 1;
        let voice = [0.0, 0.0, 1.0, 1.0];
        let mut bus = [0.0f32; 8];
        let mut gains = [1.0f32; MAX_CHANNELS];
        gains[4] = 0.0;
        gains[5] = 0.0;
        pan_and_expand(
            &mut bus,
            &voice,
            frames,
            frames,
            4,
            8,
            PanRamp {
                current: &gains,
                target: &gains,
            },
        );
        assert_eq!(&bus[6..], &[1.0, 1.0]);
    }
}
