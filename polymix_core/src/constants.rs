//! Engine-wide limits and defaults.
//!
//! Everything here is observable through the public API (handle layout, block sizes,
//! default device settings), so these values are part of the contract and must not drift.

/// Number of voice slots in the pool.
pub const VOICE_COUNT: usize = 1024;

/// Highest speaker count the mixer can address.
pub const MAX_CHANNELS: usize = 8;

/// Filter slots per voice and in the global chain.
pub const FILTERS_PER_STREAM: usize = 8;

/// Block size (frames) used for source reads and per-voice filtering.
pub const SAMPLE_GRANULARITY: usize = 512;

/// Fractional bits of the fixed-point resampling cursor.
pub const FIXPOINT_FRAC_BITS: u32 = 20;
pub const FIXPOINT_FRAC_MUL: u64 = 1 << FIXPOINT_FRAC_BITS;
pub const FIXPOINT_FRAC_MASK: u64 = FIXPOINT_FRAC_MUL - 1;

/// Source/device rate ratios above this silence the voice for the buffer.
pub const MAX_RESAMPLE_STEP: f32 = 4096.0;

pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;
pub const DEFAULT_BUFFER_SIZE: usize = 2048;
pub const DEFAULT_CHANNELS: usize = 2;
pub const DEFAULT_MAX_ACTIVE_VOICES: usize = 16;
pub const DEFAULT_POST_CLIP_SCALER: f32 = 0.95;
pub const DEFAULT_SPEED_OF_SOUND: f32 = 343.3;

/// Upper bound for the sample delay a clocked play may request.
pub const MAX_CLOCKED_DELAY_SAMPLES: usize = 2048;

/// Frames captured per buffer for the visualization snapshot.
pub const VISUALIZATION_SAMPLES: usize = 256;

/// Play index (generation) is stored in the top 20 bits of a handle.
pub const PLAY_INDEX_BITS: u32 = 20;
pub const PLAY_INDEX_MASK: u32 = (1 << PLAY_INDEX_BITS) - 1;

/// Handles with all of these bits set address a voice group.
pub const VOICE_GROUP_PREFIX: u32 = 0xFFFF_F000;
pub const MAX_VOICE_GROUPS: usize = 4096;

/// Pending sources a queue can hold.
pub const QUEUE_CAPACITY: usize = 32;

/// Soft-clip knee: inputs beyond this magnitude saturate.
pub const SOFT_CLIP_KNEE: f32 = 1.65;
/// Output of the soft-clip polynomial at the knee.
pub const SOFT_CLIP_WALL: f32 = 0.986_287_5;

/// Overall volume under which the 3-D pass marks a voice inaudible.
pub const INAUDIBLE_VOLUME: f32 = 0.001;
/// Threshold used when a 3-D voice is first started.
pub const INAUDIBLE_VOLUME_ON_PLAY: f32 = 0.01;

/// Valid speaker layouts.
pub const SUPPORTED_CHANNEL_COUNTS: [usize; 5] = [1, 2, 4, 6, 8];

#[inline]
pub fn is_supported_channel_count(channels: usize) -> bool {
    SUPPORTED_CHANNEL_COUNTS.contains(&channels)
}
