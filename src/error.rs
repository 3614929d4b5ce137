//! Error types for route-audio.
//!
//! Errors are split into two categories:
//! - **API errors** ([`HalError`]): returned from device and stream
//!   operations to the audio client
//! - **Collaborator errors** ([`BackendError`]): reported by the hardware
//!   backends (PCM driver, path backend, voice processor, radio client)

use crate::devices::InputChannelMask;
use crate::routing::{InputRouteId, OutputRouteId};
use crate::stream::OutputType;

/// Errors surfaced to the audio client by device and stream operations.
///
/// Stream start failures inside `write`/`read` are *not* surfaced as errors:
/// per the HAL contract those calls always report the full requested count
/// and degrade to a throttling sleep (see [`OutputStream::write`] and
/// [`InputStream::read`]).
///
/// [`OutputStream::write`]: crate::OutputStream::write
/// [`InputStream::read`]: crate::InputStream::read
#[derive(Debug, thiserror::Error)]
pub enum HalError {
    /// A hardware PCM failed to open or never reached a ready state.
    ///
    /// The handle is closed before this is returned; no retry is performed
    /// at this layer.
    #[error("pcm device {device} failed to open: {reason}")]
    PcmOpen {
        /// PCM device index on the card.
        device: u32,
        /// Driver-reported reason.
        reason: String,
    },

    /// An output stream of this type is already open.
    #[error("output slot {slot:?} is already in use")]
    Busy {
        /// The occupied output slot.
        slot: OutputType,
    },

    /// The requested input channel mask is not supported.
    ///
    /// The caller should retry with the suggested mask.
    #[error("unsupported channel mask, retry with {suggested:?}")]
    UnsupportedChannelMask {
        /// Mask the hardware can deliver.
        suggested: InputChannelMask,
    },

    /// The operation is not supported on this stream (fixed format/rate).
    #[error("operation not supported on this stream")]
    Unsupported,

    /// The hardware PCM disappeared during capture.
    #[error("pcm device gone during capture")]
    DeviceGone,

    /// The resampler factory could not build a converter.
    #[error("resampler setup failed: {0}")]
    Resampler(String),

    /// The route table is missing an entry for a valid key pair.
    ///
    /// Only possible if the table definitions are edited; construction
    /// validates total coverage.
    #[error("route table is missing an entry for {source_id:?}/{device:?}")]
    IncompleteRouteTable {
        /// Input-source row of the missing entry.
        source_id: InputRouteId,
        /// Output-device column of the missing entry.
        device: OutputRouteId,
    },
}

/// Error reported by a hardware collaborator.
///
/// Collaborator traits keep a single uniform error type; the core either
/// maps it into a [`HalError`] at the API boundary or, on the capture path,
/// degrades into the throttling-sleep contract.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// The device backing this handle is gone.
    #[error("device gone")]
    DeviceGone,

    /// Any other backend failure, with a driver-reported reason.
    #[error("{0}")]
    Failed(String),
}

impl BackendError {
    /// Creates a backend failure with the given reason.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hal_error_display() {
        let err = HalError::PcmOpen {
            device: 2,
            reason: "timeout".to_string(),
        };
        assert_eq!(err.to_string(), "pcm device 2 failed to open: timeout");
    }

    #[test]
    fn test_busy_display_names_slot() {
        let err = HalError::Busy {
            slot: OutputType::DeepBuffer,
        };
        assert!(err.to_string().contains("DeepBuffer"));
    }

    #[test]
    fn test_backend_error_failed() {
        let err = BackendError::failed("xrun");
        assert_eq!(err.to_string(), "xrun");
    }

    #[test]
    fn test_backend_error_device_gone() {
        assert_eq!(BackendError::DeviceGone.to_string(), "device gone");
    }
}
