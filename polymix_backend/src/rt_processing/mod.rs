//! Code that runs on the device thread.

pub mod callback;
pub mod performance;

pub use callback::{AudioCallback, CallbackSlot, MixerCallback};
pub use performance::{PerformanceMonitor, PerformanceSnapshot, RealtimeGuard};
