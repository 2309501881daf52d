//! Output device backed by cpal.

use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream};
use polymix_core::{DeviceParams, MixResult, MixerError};

use super::negotiation::{ConfigNegotiator, ConfigurationRequest, DeviceCapabilities, NegotiatedConfig};
use crate::engine::Mixer;
use crate::rt_processing::{CallbackSlot, MixerCallback, PerformanceMonitor, PerformanceSnapshot};

const BACKEND: &str = "cpal";

/// A running output stream feeding a [`Mixer`]. Dropping it stops the stream and
/// deinitializes the mixer.
pub struct CpalDriver {
    stream: Stream,
    mixer: Arc<Mixer>,
    slot: Arc<CallbackSlot>,
    monitor: Arc<PerformanceMonitor>,
    config: NegotiatedConfig,
}

impl CpalDriver {
    /// Open the default output device, negotiate a configuration close to `request` and
    /// start rendering `mixer` into it.
    pub fn start(mixer: Arc<Mixer>, request: &ConfigurationRequest) -> MixResult<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| MixerError::backend(BACKEND, "no default output device"))?;
        let caps = DeviceCapabilities::query(&device)?;
        let config = ConfigNegotiator::negotiate(&caps, request)?;
        log::info!(
            "Opening {caps} as {config} (~{:.1} ms latency)",
            config.latency_ms()
        );

        let channels = config.channels as usize;
        let frames = config.buffer_frames();
        let monitor = Arc::new(PerformanceMonitor::new(frames, config.sample_rate as f32, 0.1));
        let slot = Arc::new(CallbackSlot::new(
            Box::new(MixerCallback::new(Arc::clone(&mixer), Arc::clone(&monitor))),
            config.sample_rate,
            channels,
        ));

        mixer.postinit(DeviceParams::new(config.sample_rate, frames, channels))?;
        let stream = match build_stream(&device, &config, &slot, &monitor) {
            Ok(stream) => stream,
            Err(err) => {
                mixer.deinit();
                return Err(err);
            }
        };
        if let Err(err) = stream.play() {
            mixer.deinit();
            return Err(MixerError::backend(BACKEND, err));
        }

        Ok(Self {
            stream,
            mixer,
            slot,
            monitor,
            config,
        })
    }

    pub fn pause(&self) -> MixResult<()> {
        self.stream
            .pause()
            .map_err(|err| MixerError::backend(BACKEND, err))
    }

    pub fn resume(&self) -> MixResult<()> {
        self.stream
            .play()
            .map_err(|err| MixerError::backend(BACKEND, err))
    }

    /// Callback timing and load since the stream started.
    pub fn performance(&self) -> PerformanceSnapshot {
        self.monitor.snapshot(false)
    }

    pub fn config(&self) -> &NegotiatedConfig {
        &self.config
    }

    /// Seconds of audio handed to the device.
    pub fn playback_time(&self) -> f64 {
        self.slot.playback_time()
    }

    pub fn mixer(&self) -> &Arc<Mixer> {
        &self.mixer
    }
}

impl Drop for CpalDriver {
    fn drop(&mut self) {
        if let Err(err) = self.stream.pause() {
            log::debug!("Pausing output stream on shutdown failed: {err}");
        }
        self.mixer.deinit();
    }
}

fn build_stream(
    device: &cpal::Device,
    config: &NegotiatedConfig,
    slot: &Arc<CallbackSlot>,
    monitor: &Arc<PerformanceMonitor>,
) -> MixResult<Stream> {
    let errors = Arc::clone(monitor);
    let on_error = move |err: cpal::StreamError| {
        errors.increment_stream_error_count();
        log::error!("Output stream error: {err}");
    };

    let slot = Arc::clone(slot);
    let stream = match config.sample_format {
        SampleFormat::F32 => device.build_output_stream(
            &config.stream_config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                slot.process_realtime(data);
            },
            on_error,
            None,
        ),
        SampleFormat::I16 => device.build_output_stream(
            &config.stream_config,
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                slot.process_realtime_s16(data);
            },
            on_error,
            None,
        ),
        other => {
            return Err(MixerError::UnsupportedFormat(format!(
                "{other:?} output samples"
            )));
        }
    };
    stream.map_err(|err| MixerError::backend(BACKEND, err))
}
