//! Real-time polyphonic mixer.
//!
//! Build a [`Mixer`], hand it to a device driver (or call [`Mixer::postinit`] and pull
//! audio with [`Mixer::render_f32`] yourself), then play [`sources`] on it:
//!
//! ```no_run
//! use polymix_backend::{Mixer, PlayParams};
//! use polymix_backend::sources::Waveform;
//! use polymix_backend::polymix_core::{DeviceParams, EngineConfig};
//!
//! let mixer = Mixer::new(EngineConfig::default())?;
//! mixer.postinit(DeviceParams::new(48_000, 512, 2))?;
//! let voice = mixer.play(&Waveform::sine(440.0), PlayParams::default().with_volume(0.5));
//! mixer.fade_volume(voice, 0.0, 2.0);
//!
//! let mut out = vec![0.0f32; 512 * 2];
//! mixer.render_f32(&mut out);
//! # Ok::<(), polymix_backend::polymix_core::MixerError>(())
//! ```

#[cfg(feature = "cpal-driver")]
pub mod audio_device;
pub mod engine;
pub mod rt_processing;
pub mod sources;

pub use engine::{Mixer, PlayParams};
pub use polymix_core;
pub use polymix_core::{Handle, MixResult, MixerError};
