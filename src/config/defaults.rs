pub const DEFAULT_SAMPLE_RATE: u32 = 11_025;
pub const DEFAULT_CHANNELS: u16 = 1;
pub const DEFAULT_WINDOW_MS: u64 = 2_000;
pub const DEFAULT_QUEUE_SLOTS: usize = 5;
pub const DEFAULT_BINARY_THRESHOLD: f32 = 0.7;

pub const MIN_SAMPLE_RATE: u32 = 8_000;
pub const MAX_SAMPLE_RATE: u32 = 96_000;
pub const MIN_CHANNELS: u16 = 1;
pub const MAX_CHANNELS: u16 = 2;
pub const MIN_WINDOW_MS: u64 = 250;
pub const MAX_WINDOW_MS: u64 = 10_000;
pub const MIN_QUEUE_SLOTS: usize = 2;
pub const MAX_QUEUE_SLOTS: usize = 64;

pub(super) const MAX_DEVICE_NAME_BYTES: usize = 256;
