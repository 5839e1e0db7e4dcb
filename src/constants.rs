use std::time::Duration;

// PCM format handed to the voice transport
pub const SAMPLE_RATE: u32 = 48000; // 48 kHz sample rate
pub const BIT_DEPTH: u16 = 16; // 16 bits per sample
pub const CHANNELS: u16 = 2; // Stereo channel

/// Length of one frame as consumed by the voice transport.
pub const FRAME_DURATION: Duration = Duration::from_millis(20);

/// Same as [`FRAME_DURATION`], in seconds, for offset bookkeeping.
pub const FRAME_DURATION_SECS: f64 = 0.02;

/// Bytes in one 20 ms frame of 16-bit stereo audio at 48 kHz.
pub const FRAME_SIZE: usize =
    (SAMPLE_RATE as usize / 50) * CHANNELS as usize * (BIT_DEPTH as usize / 8);

/// Chunk size used when piping a byte stream into the decoder's stdin.
pub const STDIN_CHUNK_SIZE: usize = 8192;
