//! Stateless signal kernels used by the mix loop.

pub mod clip;
pub mod pan_expand;
pub mod resample;

pub use clip::{ClipParams, clip, interleave_f32, interleave_s16};
pub use pan_expand::{PanRamp, pan_and_expand};
pub use resample::resample;
