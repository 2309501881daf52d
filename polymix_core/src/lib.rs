//! Device-independent building blocks of the polymix engine: handles, faders, DSP
//! kernels, filters and configuration.

pub mod config;
pub mod constants;
pub mod dsp;
pub mod error;
pub mod fader;
pub mod filters;
pub mod handle;
pub mod math;

pub use config::{DeviceParams, EngineConfig, ResamplerKind};
pub use error::{MixResult, MixerError};
pub use fader::{Fader, FaderStep};
pub use filters::{Filter, FilterContext, FilterInstance, FilterParams};
pub use handle::Handle;
pub use math::{Mat3, Vec3};
