//! Hardware collaborator traits.
//!
//! The routing core never touches a kernel PCM, mixer, DSP, or radio
//! directly; it drives these traits. Production wires real backends in,
//! tests wire the [`mock`] implementations in, and the core logic is
//! identical either way.

pub mod mock;

use std::fmt;

use crate::config::PcmConfig;
use crate::error::BackendError;
use crate::routing::VoicePreset;

/// Transfer direction of a PCM stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcmDirection {
    /// Playback, toward the device.
    Out,
    /// Capture, from the device.
    In,
}

/// Audio path selector sent to the radio during a voice call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallAudioPath {
    /// Handset earpiece.
    Handset,
    /// Wired headset with microphone.
    Headset,
    /// Loudspeaker.
    Speaker,
    /// Headphones without microphone (handset mic stays active).
    Headphone,
    /// Bluetooth SCO with in-headset noise reduction.
    Bluetooth,
    /// Bluetooth SCO with noise reduction disabled.
    BluetoothNoNr,
}

/// Volume class understood by the radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoundType {
    /// Earpiece voice volume.
    Voice,
    /// Speakerphone volume.
    Speaker,
    /// Wired headset volume.
    Headset,
    /// Bluetooth voice volume.
    BtVoice,
}

/// Voice-path clock state commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockSync {
    /// Stop the voice-path clock.
    Stop,
    /// Start the voice-path clock.
    Start,
}

/// Uplink mute state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuteState {
    /// Transmit path open.
    TxUnmute,
    /// Transmit path muted.
    TxMute,
}

/// Two-microphone noise-control solution vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TwoMicDevice {
    /// Audience chip.
    Audience,
    /// Fortemedia chip.
    ForteMedia,
}

/// Two-microphone noise-control state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TwoMicState {
    /// Processing disabled.
    Off,
    /// Processing enabled.
    On,
}

/// Conversion quality hint for resampler construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResamplerQuality {
    /// Cheapest available conversion.
    #[default]
    Default,
}

/// Opaque identifier of an audio I/O session, assigned by the layer above.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IoHandle(pub i32);

impl fmt::Display for IoHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Descriptor of a preprocessing effect attached to an input stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectDescriptor {
    /// Effect name, opaque to the core.
    pub name: String,
}

/// Callback invoked by the radio when the network toggles wideband AMR.
pub type WbAmrCallback = Box<dyn Fn(bool) + Send + Sync>;

/// Named-path mixer control.
pub trait PathBackend: Send {
    /// Returns every mixer control to its default state.
    fn reset(&mut self);

    /// Applies a named path on top of the current state.
    fn apply_path(&mut self, path: &str);

    /// Commits the staged control values to the hardware.
    fn update_mixer(&mut self);
}

/// Opens kernel PCM streams.
pub trait PcmBackend: Send + Sync {
    /// Opens a PCM on `card`/`device` in the given direction.
    ///
    /// A successful return does not guarantee the handle is usable; callers
    /// check [`PcmStream::is_ready`] before relying on it.
    fn open(
        &self,
        card: u32,
        device: u32,
        direction: PcmDirection,
        config: PcmConfig,
    ) -> Result<Box<dyn PcmStream>, BackendError>;
}

/// An open kernel PCM handle. Dropping the handle closes it.
pub trait PcmStream: Send {
    /// Returns `true` if the handle reached a usable state.
    fn is_ready(&self) -> bool;

    /// Starts the stream without transferring data.
    fn start(&mut self) -> Result<(), BackendError>;

    /// Stops the stream.
    fn stop(&mut self) -> Result<(), BackendError>;

    /// Reads exactly `buffer.len()` interleaved samples.
    fn read(&mut self, buffer: &mut [i16]) -> Result<(), BackendError>;

    /// Writes all of `buffer`'s interleaved samples.
    fn write(&mut self, buffer: &[i16]) -> Result<(), BackendError>;
}

/// Pull source of interleaved frames, consumed by a [`Resampler`].
pub trait FrameProvider {
    /// Returns up to `max_frames` frames of interleaved samples.
    ///
    /// Returning an empty slice with `Ok` is not used; exhaustion or
    /// failure is reported through `Err`.
    fn get_next_buffer(&mut self, max_frames: usize) -> Result<&[i16], BackendError>;

    /// Marks `frames` frames of the last buffer as consumed.
    fn release_buffer(&mut self, frames: usize);
}

/// Sample-rate converter pulling from a [`FrameProvider`].
pub trait Resampler: Send {
    /// Discards converter history, e.g. across a standby.
    fn reset(&mut self);

    /// Fills `output` with converted samples.
    ///
    /// On entry `*frames` is the requested output frame count; on return it
    /// is the count actually produced. Errors from the provider propagate.
    fn resample_from_provider(
        &mut self,
        provider: &mut dyn FrameProvider,
        output: &mut [i16],
        frames: &mut usize,
    ) -> Result<(), BackendError>;
}

/// Builds [`Resampler`]s for a given rate conversion.
pub trait ResamplerFactory: Send + Sync {
    /// Creates a converter from `in_rate` to `out_rate` Hz.
    fn create(
        &self,
        in_rate: u32,
        out_rate: u32,
        channels: u32,
        quality: ResamplerQuality,
    ) -> Result<Box<dyn Resampler>, BackendError>;
}

/// External voice-processing DSP sitting on the capture path.
pub trait VoiceProcessor: Send {
    /// Loads a tuning preset. The caller caches the preset only when this
    /// succeeds, so a failed load is retried on the next route change.
    fn use_preset(&mut self, preset: VoicePreset) -> Result<(), BackendError>;

    /// Tells the DSP which capture session is active, or `None` when
    /// capture stops.
    fn set_active_io_handle(&mut self, handle: Option<IoHandle>);

    /// Registers a preprocessing effect on a capture session.
    fn add_effect(&mut self, handle: IoHandle, effect: &EffectDescriptor);

    /// Removes a preprocessing effect from a capture session.
    fn remove_effect(&mut self, handle: IoHandle, effect: &EffectDescriptor);

    /// Releases the DSP, called on device teardown.
    fn release(&mut self);
}

/// Radio-processor client controlling the cellular voice path.
pub trait Radio: Send {
    /// Selects the acoustic path for call audio.
    fn set_call_audio_path(&mut self, path: CallAudioPath);

    /// Sets the call volume for a volume class; `volume` is `0.0..=1.0`.
    fn set_call_volume(&mut self, sound_type: SoundType, volume: f32);

    /// Starts or stops the voice-path clock.
    fn set_call_clock_sync(&mut self, sync: ClockSync);

    /// Mutes or unmutes the uplink.
    fn set_mute(&mut self, state: MuteState);

    /// Enables or disables two-microphone noise control.
    fn set_two_mic_control(&mut self, device: TwoMicDevice, state: TwoMicState);

    /// Registers the callback fired when the network switches between
    /// narrowband and wideband AMR.
    fn register_wb_amr_callback(&mut self, callback: WbAmrCallback);
}
