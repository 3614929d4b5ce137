//! Output and input PCM streams.

pub mod input;
pub mod output;

pub use input::InputStream;
pub use output::OutputStream;

/// Output stream slot. Each type carries its own PCM geometry and at most
/// one open stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputType {
    /// Deep-buffer media playback.
    DeepBuffer = 0,
    /// Low-latency playback.
    LowLatency = 1,
}

/// Number of output slots.
pub(crate) const OUTPUT_TOTAL: usize = 2;

impl OutputType {
    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

/// Client-requested output stream behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutputFlags {
    /// Prefer the deep-buffer path over low latency.
    pub deep_buffer: bool,
}
