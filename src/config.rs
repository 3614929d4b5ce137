//! PCM configuration profiles and hardware layout constants.
//!
//! The profiles mirror the fixed kernel PCM geometries of the target
//! hardware: two media playback configs (low-latency and deep-buffer), one
//! capture config, and narrowband/wideband variants for the voice-call and
//! Bluetooth SCO duplex pairs.

/// Sample encoding of a PCM stream. The hardware is fixed to 16-bit
/// little-endian; the enum exists so configs stay self-describing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleFormat {
    /// Signed 16-bit little-endian.
    #[default]
    S16Le,
}

impl SampleFormat {
    /// Bytes per sample.
    pub fn bytes_per_sample(self) -> usize {
        match self {
            Self::S16Le => 2,
        }
    }
}

/// Geometry of a kernel PCM stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmConfig {
    /// Interleaved channel count.
    pub channels: u32,
    /// Sample rate in Hz.
    pub rate: u32,
    /// Frames transferred per hardware transaction.
    pub period_size: usize,
    /// Number of periods in the driver ring.
    pub period_count: u32,
    /// Sample encoding.
    pub format: SampleFormat,
}

impl PcmConfig {
    /// Total driver buffer size in frames.
    pub fn buffer_frames(&self) -> usize {
        self.period_size * self.period_count as usize
    }

    /// Bytes per frame (all channels).
    pub fn frame_bytes(&self) -> usize {
        self.channels as usize * self.format.bytes_per_sample()
    }

    /// Playback duration of the full driver buffer, in milliseconds.
    pub fn buffer_ms(&self) -> u32 {
        (self.buffer_frames() as u64 * 1000 / u64::from(self.rate)) as u32
    }
}

/// Sound card index hosting every PCM in this HAL.
pub const PCM_CARD: u32 = 0;

/// PCM device index for media playback (both output types).
pub const PCM_DEVICE_MEDIA: u32 = 0;
/// PCM device index for the cellular voice-call duplex pair.
pub const PCM_DEVICE_VOICE: u32 = 1;
/// PCM device index for the Bluetooth SCO duplex pair.
pub const PCM_DEVICE_SCO: u32 = 2;
/// PCM device index for microphone capture.
pub const PCM_DEVICE_CAPTURE: u32 = 3;

/// Duration of the capture startup volume ramp.
pub const CAPTURE_START_RAMP_MS: u32 = 8;

/// Low-latency playback profile.
pub fn pcm_config_fast() -> PcmConfig {
    PcmConfig {
        channels: 2,
        rate: 48000,
        period_size: 240,
        period_count: 2,
        format: SampleFormat::S16Le,
    }
}

/// Deep-buffer playback profile for media with relaxed latency.
pub fn pcm_config_deep() -> PcmConfig {
    PcmConfig {
        channels: 2,
        rate: 48000,
        period_size: 3840,
        period_count: 2,
        format: SampleFormat::S16Le,
    }
}

/// Native capture profile. Capture always runs at this geometry; other
/// client rates go through the resampler.
pub fn pcm_config_capture() -> PcmConfig {
    PcmConfig {
        channels: 2,
        rate: 48000,
        period_size: 240,
        period_count: 2,
        format: SampleFormat::S16Le,
    }
}

/// Bluetooth SCO duplex profile; `wideband` selects the 16 kHz variant.
pub fn pcm_config_sco(wideband: bool) -> PcmConfig {
    PcmConfig {
        channels: 1,
        rate: if wideband { 16000 } else { 8000 },
        period_size: 128,
        period_count: 2,
        format: SampleFormat::S16Le,
    }
}

/// Cellular voice-call duplex profile; `wideband` selects the 16 kHz
/// (wideband-AMR) variant.
pub fn pcm_config_voice(wideband: bool) -> PcmConfig {
    PcmConfig {
        channels: 2,
        rate: if wideband { 16000 } else { 8000 },
        period_size: 960,
        period_count: 2,
        format: SampleFormat::S16Le,
    }
}

/// Capture buffer size in bytes for a client at `sample_rate`/`channels`.
///
/// Scales one native capture period to the requested rate and rounds up to
/// a multiple of 16 frames, which the mixer above this layer expects.
pub fn input_buffer_size(sample_rate: u32, channels: usize) -> usize {
    let native = pcm_config_capture();
    let frames = native.period_size * sample_rate as usize / native.rate as usize;
    let frames = frames.div_ceil(16) * 16;
    frames * channels * native.format.bytes_per_sample()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profiles_match_hardware_geometry() {
        assert_eq!(pcm_config_fast().period_size, 240);
        assert_eq!(pcm_config_deep().period_size, 3840);
        assert_eq!(pcm_config_capture().rate, 48000);
        assert_eq!(pcm_config_sco(false).rate, 8000);
        assert_eq!(pcm_config_sco(true).rate, 16000);
        assert_eq!(pcm_config_voice(false).channels, 2);
        assert_eq!(pcm_config_voice(true).rate, 16000);
    }

    #[test]
    fn test_buffer_math() {
        let config = pcm_config_fast();
        assert_eq!(config.buffer_frames(), 480);
        assert_eq!(config.frame_bytes(), 4);
        assert_eq!(config.buffer_ms(), 10);
    }

    #[test]
    fn test_input_buffer_size_rounds_to_16_frames() {
        // 240 * 44100 / 48000 = 220.5 -> 220 -> rounded up to 224 frames.
        let size = input_buffer_size(44100, 2);
        assert_eq!(size, 224 * 2 * 2);
    }

    #[test]
    fn test_input_buffer_size_native_rate() {
        // One native period is already a multiple of 16 frames.
        assert_eq!(input_buffer_size(48000, 2), 240 * 2 * 2);
    }
}
