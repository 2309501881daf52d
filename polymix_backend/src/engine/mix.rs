//! Bus mixing.
//!
//! `mix_bus` pulls every active voice routed to a bus, resamples it to the bus rate in
//! `SAMPLE_GRANULARITY` blocks and pans it into the bus's planar output. A bus voice's
//! source is itself a `mix_bus` call, so nested buses recurse naturally.

use polymix_core::constants::{
    FIXPOINT_FRAC_BITS, FIXPOINT_FRAC_MUL, MAX_CHANNELS, MAX_RESAMPLE_STEP, SAMPLE_GRANULARITY,
    VISUALIZATION_SAMPLES,
};
use polymix_core::dsp::{PanRamp, pan_and_expand, resample};
use polymix_core::filters::{FilterBlock, run_filter};
use polymix_core::{Handle, ResamplerKind};

use super::core::MixerCore;
use super::voice::{ResampleBuffers, Voice};
use crate::sources::{Instance, SourceInstance};

const G: usize = SAMPLE_GRANULARITY;
const BLOCK_END: u64 = (G as u64) << FIXPOINT_FRAC_BITS;

/// Geometry and rate of one bus mix.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BusMix {
    pub bus: Handle,
    pub frames: usize,
    pub stride: usize,
    pub channels: usize,
    pub sample_rate: f32,
    pub resampler: ResamplerKind,
}

/// Peak per channel and the channel sum of the first 256 frames of a planar buffer.
pub(crate) fn capture_visualization(
    samples: &[f32],
    frames: usize,
    stride: usize,
    channels: usize,
    wave: &mut [f32; VISUALIZATION_SAMPLES],
    peaks: &mut [f32; MAX_CHANNELS],
) {
    *peaks = [0.0; MAX_CHANNELS];
    if frames == 0 {
        *wave = [0.0; VISUALIZATION_SAMPLES];
        return;
    }
    for (i, w) in wave.iter_mut().enumerate() {
        let frame = i % frames;
        *w = 0.0;
        for (c, peak) in peaks[..channels].iter_mut().enumerate() {
            let sample = samples[c * stride + frame];
            *peak = peak.max(sample.abs());
            *w += sample;
        }
    }
}

impl MixerCore {
    /// Mix every active voice routed to `job.bus` into the planar `out`.
    ///
    /// `scratch` receives each voice's resampled frames before panning; it must hold
    /// `MAX_CHANNELS * job.stride` samples.
    pub fn mix_bus(&mut self, out: &mut [f32], scratch: &mut [f32], job: BusMix) {
        for c in 0..job.channels {
            out[c * job.stride..c * job.stride + job.frames].fill(0.0);
        }

        for i in 0..self.active_count {
            let slot = self.active[i];
            let Some(voice) = self.voices[slot].as_deref() else {
                continue;
            };
            if voice.bus != job.bus || voice.flags.paused {
                continue;
            }
            let audible = !voice.flags.inaudible;
            if !audible && !voice.flags.inaudible_tick {
                continue;
            }
            let Some(binding) = voice.binding else {
                continue;
            };
            let Some(mut voice) = self.voices[slot].take() else {
                continue;
            };

            let mut buffers = std::mem::take(&mut self.pool[binding]);
            self.pull_voice(&mut voice, &mut buffers, scratch, job, audible);
            self.pool[binding] = buffers;

            if audible {
                voice.current_channel_volume = pan_and_expand(
                    out,
                    scratch,
                    job.frames,
                    job.stride,
                    voice.channels,
                    job.channels,
                    PanRamp {
                        current: &voice.current_channel_volume,
                        target: &voice.target_channel_volume(),
                    },
                );
            }

            let finished = !voice.flags.looping
                && !voice.flags.disable_autostop
                && voice.instance.has_ended();
            if finished {
                self.release_voice(slot, voice);
            } else {
                self.voices[slot] = Some(voice);
            }
        }
    }

    /// Produce `job.frames` frames of `voice` at the bus rate into `scratch`.
    ///
    /// Silent voices still read and advance their source so loops and positions move on,
    /// but nothing is resampled or filtered.
    fn pull_voice(
        &mut self,
        voice: &mut Voice,
        buffers: &mut ResampleBuffers,
        scratch: &mut [f32],
        job: BusMix,
        audible: bool,
    ) {
        let step = voice.sample_rate as f64 / job.sample_rate as f64;
        let step_fixed = if step > 0.0 && step <= MAX_RESAMPLE_STEP as f64 {
            (step * FIXPOINT_FRAC_MUL as f64).floor() as u64
        } else {
            0
        };

        let mut out_offset = 0;
        if voice.delay > 0 {
            let skip = voice.delay.min(job.frames);
            voice.delay -= skip;
            out_offset = skip;
            if audible {
                for c in 0..voice.channels {
                    scratch[c * job.stride..c * job.stride + skip].fill(0.0);
                }
            }
        }

        while step_fixed != 0 && out_offset < job.frames {
            if voice.leftover == 0 {
                buffers.swap();
                let mut read = 0;
                if !voice.instance.has_ended() || voice.flags.looping {
                    read = self.fill_voice(voice, &mut buffers.current, 0, G);
                    while read < G && voice.flags.looping {
                        if let Err(err) = voice.seek(voice.loop_point, &mut self.seek_scratch) {
                            log::debug!("Loop seek failed for {}: {err}", voice.handle);
                            break;
                        }
                        voice.loop_count += 1;
                        let more = self.fill_voice(voice, &mut buffers.current, read, G - read);
                        read += more;
                        if more == 0 {
                            break;
                        }
                    }
                }
                if read < G {
                    for c in 0..voice.channels {
                        buffers.current[c * G + read..(c + 1) * G].fill(0.0);
                    }
                }
                voice.src_offset = voice.src_offset.saturating_sub(BLOCK_END);

                if audible {
                    let mut block = FilterBlock {
                        samples: &mut buffers.current[..voice.channels * G],
                        frames: G,
                        stride: G,
                        channels: voice.channels,
                        sample_rate: voice.sample_rate,
                        time: self.stream_time,
                    };
                    for filter in voice.filters.iter_mut().flatten() {
                        run_filter(filter.as_mut(), &mut block, &*self);
                    }
                }
            } else {
                voice.leftover = 0;
            }

            // Every read position left inside the block. Afterwards the cursor sits at or
            // past BLOCK_END, so the next block always moves it forward.
            let mut writes = 0;
            if voice.src_offset < BLOCK_END {
                writes = ((BLOCK_END - 1 - voice.src_offset) / step_fixed + 1) as usize;
            }
            if writes + out_offset > job.frames {
                voice.leftover = writes + out_offset - job.frames;
                writes = job.frames - out_offset;
            }

            if audible && writes > 0 {
                for c in 0..voice.channels {
                    let dst = c * job.stride + out_offset;
                    resample(
                        job.resampler,
                        &buffers.current[c * G..(c + 1) * G],
                        &buffers.previous[c * G..(c + 1) * G],
                        &mut scratch[dst..dst + writes],
                        voice.src_offset,
                        step_fixed,
                    );
                }
            }

            out_offset += writes;
            voice.src_offset += writes as u64 * step_fixed;
        }

        if audible && out_offset < job.frames {
            for c in 0..voice.channels {
                scratch[c * job.stride + out_offset..c * job.stride + job.frames].fill(0.0);
            }
        }
    }

    /// Read `count` planar frames of `voice` into `buf` starting at frame `offset`.
    fn fill_voice(&mut self, voice: &mut Voice, buf: &mut [f32], offset: usize, count: usize) -> usize {
        match &mut voice.instance {
            Instance::Stream(stream) => stream.fill(&mut buf[offset..], count, G),
            Instance::Queue(queue) => queue.fill(&mut buf[offset..], count, G),
            Instance::Bus(bus) => {
                let job = BusMix {
                    bus: voice.handle,
                    frames: count,
                    stride: G,
                    channels: bus.channels,
                    sample_rate: voice.sample_rate,
                    resampler: bus.resampler(),
                };
                let out = &mut buf[offset..];
                self.mix_bus(out, &mut bus.scratch, job);
                if bus.visualize() {
                    capture_visualization(out, count, G, bus.channels, &mut bus.wave, &mut bus.peaks);
                }
                count
            }
        }
    }
}
