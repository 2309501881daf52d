//! Platform output through cpal.

pub mod cpal_driver;
pub mod negotiation;

pub use cpal_driver::CpalDriver;
pub use negotiation::{
    BufferSizePriority, ChannelPriority, ConfigNegotiator, ConfigurationRequest,
    DeviceCapabilities, NegotiatedConfig, NegotiationError, SampleRatePriority,
};
