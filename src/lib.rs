//! # route-audio
//!
//! Audio routing and PCM stream lifecycle core for a phone-class sound
//! card: one playback/capture codec, a cellular modem voice path, and a
//! Bluetooth SCO link.
//!
//! `route-audio` decides which named mixer routes, voice-processing preset,
//! and radio audio path are active for the current combination of output
//! devices and capture use case, and manages the kernel PCM streams behind
//! playback, capture, voice calls, and SCO.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use route_audio::{AudioDevice, Hal, OutputDevices, OutputFlags};
//!
//! let device = AudioDevice::open(Hal {
//!     path: Box::new(my_mixer_backend),
//!     pcm: Arc::new(my_pcm_backend),
//!     voice_fx: Box::new(my_voice_dsp),
//!     radio: Box::new(my_radio_client),
//!     resamplers: Arc::new(LinearResamplerFactory),
//! });
//!
//! let out = device.open_output_stream(OutputDevices::SPEAKER, OutputFlags::default())?;
//! out.write(&samples); // first write opens the PCM and applies the route
//! ```
//!
//! ## Architecture
//!
//! - **Device core**: all shared state (device sets, mode, route cache,
//!   voice/SCO PCM pairs) under a single rank-ordered mutex
//! - **Streams**: lazy-start PCM wrappers that join and leave the active
//!   route on start/standby
//! - **Backends**: mixer, PCM, DSP, radio, and resampler behind traits,
//!   with recording mocks for tests
//!
//! Writes and reads never fail toward the client: on a driver error they
//! report the full request and throttle to the buffer's real-time pace.

#![warn(missing_docs)]
// Audio code requires intentional numeric casts between sample widths
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_lossless
)]
// unwrap/expect allowed in tests only
#![cfg_attr(test, allow(clippy::unwrap_used))]
// These doc lints are too strict for internal implementation details
#![allow(clippy::missing_panics_doc, clippy::missing_errors_doc)]

mod call;
pub mod config;
pub mod device;
pub mod devices;
pub mod error;
pub mod hw;
mod lock;
pub mod params;
pub mod resample;
pub mod routing;
pub mod stream;

pub use config::{input_buffer_size, PcmConfig, SampleFormat};
pub use device::{AudioDevice, Hal};
pub use devices::{
    AudioMode, InputChannelMask, InputDevices, InputSource, OutputChannelMask, OutputDevices,
};
pub use error::{BackendError, HalError};
pub use hw::{EffectDescriptor, IoHandle};
pub use params::Parameters;
pub use resample::{LinearResampler, LinearResamplerFactory};
pub use stream::{InputStream, OutputFlags, OutputStream, OutputType};
