//! Device-wide state and routing selection.
//!
//! [`AudioDevice`] owns the hardware collaborators and all state shared
//! between streams: the active device sets, the operating mode, the voice
//! and SCO PCM pairs, and the composite route id cache. Everything lives
//! under a single rank-ordered mutex; streams take it before their own
//! lock.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::call::PcmPair;
use crate::config::{self, pcm_config_capture, pcm_config_deep, pcm_config_fast, PCM_DEVICE_MEDIA};
use crate::devices::{
    AudioMode, InputChannelMask, InputDevices, InputSource, OutputChannelMask, OutputDevices,
};
use crate::error::HalError;
use crate::hw::{
    ClockSync, IoHandle, MuteState, PathBackend, PcmBackend, Radio, ResamplerFactory,
    ResamplerQuality, SoundType, TwoMicDevice, TwoMicState, VoiceProcessor,
};
use crate::lock::{LockRank, OrderedMutex};
use crate::params::{keys, Parameters};
use crate::routing::{route_id, InputRouteId, OutputRouteId, VoiceFxMode, VoicePreset, ROUTE_TABLE};
use crate::stream::input::{CaptureBuffer, InputStream};
use crate::stream::output::OutputStream;
use crate::stream::{OutputFlags, OutputType, OUTPUT_TOTAL};

/// Hardware collaborators wired into a device at open time.
///
/// Production passes real backends; tests pass the [`crate::hw::mock`]
/// implementations.
pub struct Hal {
    /// Named-path mixer control.
    pub path: Box<dyn PathBackend>,
    /// Kernel PCM opener.
    pub pcm: Arc<dyn PcmBackend>,
    /// Voice-processing DSP on the capture path.
    pub voice_fx: Box<dyn VoiceProcessor>,
    /// Radio-processor client.
    pub radio: Box<dyn Radio>,
    /// Builder for capture-rate converters.
    pub resamplers: Arc<dyn ResamplerFactory>,
}

/// Per-slot bookkeeping for an open output stream, readable under the
/// device lock alone so routing can union the other streams' devices.
#[derive(Debug, Clone, Copy)]
pub(crate) struct OutputSlot {
    pub(crate) device: OutputDevices,
    pub(crate) standby: bool,
}

/// All device-wide state, guarded by the device-rank mutex.
pub(crate) struct DeviceState {
    pub(crate) path: Box<dyn PathBackend>,
    pub(crate) voice_fx: Box<dyn VoiceProcessor>,
    pub(crate) radio: Box<dyn Radio>,
    pub(crate) pcm: Arc<dyn PcmBackend>,

    pub(crate) out_device: OutputDevices,
    pub(crate) in_device: InputDevices,
    pub(crate) input_source: InputSource,
    pub(crate) mic_mute: bool,
    pub(crate) mode: AudioMode,
    /// Composite id of the applied route; zero until the first selection.
    pub(crate) cur_route_id: u32,
    pub(crate) fx_mode: VoiceFxMode,
    pub(crate) pending_fx_mode: VoiceFxMode,
    /// Preset loaded into the DSP; `None` until the first successful load.
    pub(crate) fx_preset: Option<VoicePreset>,
    pub(crate) voice_volume: f32,
    pub(crate) in_call: bool,
    pub(crate) bluetooth_nrec: bool,
    pub(crate) wb_amr: bool,
    pub(crate) pcm_voice: Option<PcmPair>,
    pub(crate) pcm_sco: Option<PcmPair>,
    pub(crate) outputs: [Option<OutputSlot>; OUTPUT_TOTAL],
}

impl DeviceState {
    /// Applies mixer routes, DSP preset, and call audio path for the
    /// current (input source, output devices) pair.
    ///
    /// Idempotent: when the composite route id and the DSP tuning mode are
    /// both unchanged, no backend is touched.
    pub(crate) fn select_devices(&mut self) {
        let output_device_id = OutputRouteId::from_devices(self.out_device);
        let input_source_id = InputRouteId::from_source(self.input_source);

        let new_route_id = route_id(input_source_id, output_device_id);
        if new_route_id == self.cur_route_id && self.fx_mode == self.pending_fx_mode {
            return;
        }
        self.cur_route_id = new_route_id;
        self.fx_mode = self.pending_fx_mode;

        self.path.reset();

        let mut output_route = None;
        let mut input_route = None;
        let mut new_preset = None;

        if input_source_id != InputRouteId::None {
            if output_device_id != OutputRouteId::None {
                let route = ROUTE_TABLE.get(input_source_id, output_device_id);
                output_route = Some(route.output_route);
                input_route = Some(route.input_route);
                new_preset = Some(route.preset_for(self.fx_mode));
            } else {
                // No active output; infer the acoustic position from the
                // capture device instead.
                let device_id = if self.in_device == InputDevices::WIRED_HEADSET {
                    OutputRouteId::Headset
                } else if self.in_device == InputDevices::BT_SCO_HEADSET {
                    OutputRouteId::BtSco
                } else {
                    OutputRouteId::Speaker
                };
                let route = ROUTE_TABLE.get(input_source_id, device_id);
                input_route = Some(route.input_route);
                new_preset = Some(route.preset_for(self.fx_mode));
            }
        } else if output_device_id != OutputRouteId::None {
            output_route =
                Some(ROUTE_TABLE.get(InputRouteId::Mic, output_device_id).output_route);
        }

        debug!(
            devices = format_args!("{:#x}", self.out_device),
            source = ?self.input_source,
            output_route = output_route.unwrap_or("none"),
            input_route = input_route.unwrap_or("none"),
            "selecting routes"
        );

        if let Some(route) = output_route {
            self.path.apply_path(route);
        }
        if let Some(route) = input_route {
            self.path.apply_path(route);
        }

        if let Some(preset) = new_preset {
            if preset != VoicePreset::Current && Some(preset) != self.fx_preset {
                debug!(from = ?self.fx_preset, to = ?preset, "changing voice fx preset");
                // Only cache on success so a failed load is retried on the
                // next route change.
                if self.voice_fx.use_preset(preset).is_ok() {
                    self.fx_preset = Some(preset);
                }
            }
        }

        self.path.update_mixer();

        self.notify_call_audio_path();
    }

    /// Union of the devices of every non-standby output slot other than
    /// `exclude`.
    pub(crate) fn other_output_devices(&self, exclude: OutputType) -> OutputDevices {
        let mut devices = OutputDevices::NONE;
        for (index, slot) in self.outputs.iter().enumerate() {
            if index == exclude.index() {
                continue;
            }
            if let Some(slot) = slot {
                if !slot.standby {
                    devices |= slot.device;
                }
            }
        }
        devices
    }

    pub(crate) fn slot_mut(&mut self, ty: OutputType) -> &mut OutputSlot {
        self.outputs[ty.index()]
            .as_mut()
            .unwrap_or_else(|| unreachable!("output slot {ty:?} cleared while stream exists"))
    }

    pub(crate) fn slot(&self, ty: OutputType) -> &OutputSlot {
        self.outputs[ty.index()]
            .as_ref()
            .unwrap_or_else(|| unreachable!("output slot {ty:?} cleared while stream exists"))
    }
}

impl Drop for DeviceState {
    fn drop(&mut self) {
        self.voice_fx.release();
    }
}

/// The audio routing core: one instance per sound card.
pub struct AudioDevice {
    pub(crate) state: OrderedMutex<DeviceState>,
    pub(crate) resamplers: Arc<dyn ResamplerFactory>,
}

impl AudioDevice {
    /// Opens the device on the given collaborators and registers for
    /// wideband-AMR change notifications from the radio.
    pub fn open(hal: Hal) -> Arc<Self> {
        let state = DeviceState {
            path: hal.path,
            voice_fx: hal.voice_fx,
            radio: hal.radio,
            pcm: hal.pcm,
            out_device: OutputDevices::NONE,
            in_device: InputDevices::NONE,
            input_source: InputSource::Default,
            mic_mute: false,
            mode: AudioMode::Normal,
            cur_route_id: 0,
            fx_mode: VoiceFxMode::Level,
            pending_fx_mode: VoiceFxMode::Level,
            fx_preset: None,
            voice_volume: 1.0,
            in_call: false,
            bluetooth_nrec: false,
            wb_amr: false,
            pcm_voice: None,
            pcm_sco: None,
            outputs: [None; OUTPUT_TOTAL],
        };
        let device = Arc::new(Self {
            state: OrderedMutex::new(LockRank::Device, state),
            resamplers: hal.resamplers,
        });

        let weak = Arc::downgrade(&device);
        device
            .state
            .lock()
            .radio
            .register_wb_amr_callback(Box::new(move |enable| {
                if let Some(device) = weak.upgrade() {
                    device.wb_amr_changed(enable);
                }
            }));

        device
    }

    /// Handles a narrowband/wideband AMR switch reported by the network.
    ///
    /// The new rate only takes effect when the voice PCMs are next opened;
    /// a switch during an established call leaves the running pair at the
    /// old rate.
    fn wb_amr_changed(&self, enable: bool) {
        debug!(enable, "wb-amr setting changed");
        let mut dev = self.state.lock();
        if dev.wb_amr != enable {
            dev.wb_amr = enable;
            if dev.in_call {
                warn!("wb-amr changed during a call; voice pcms keep the current rate");
            }
        }
    }

    /// Switches the device-wide operating mode.
    ///
    /// Entering the in-call state forces a call-capable output device,
    /// brings up the voice PCM pair, starts the voice clock, and applies
    /// the cached call volume. Leaving tears the call path down again.
    pub fn set_mode(&self, mode: AudioMode) {
        let mut dev = self.state.lock();
        if dev.mode == mode {
            return;
        }
        dev.mode = mode;

        if mode == AudioMode::InCall {
            debug!("entering in-call mode");
            if !dev.in_call {
                if dev.out_device.is_empty() || dev.out_device == OutputDevices::SPEAKER {
                    dev.out_device = OutputDevices::EARPIECE;
                }
                dev.input_source = InputSource::VoiceCall;
                dev.select_devices();
                if let Err(error) = dev.start_voice_call() {
                    error!(%error, "cannot open voice pcms");
                }
                dev.radio.set_call_clock_sync(ClockSync::Start);
                let volume = dev.voice_volume;
                dev.radio.set_call_volume(SoundType::Voice, volume);
                dev.in_call = true;
            }
        } else {
            debug!("leaving in-call mode");
            if dev.in_call {
                dev.in_call = false;
                dev.end_voice_call();
                dev.radio.set_call_clock_sync(ClockSync::Stop);
                if dev.out_device.intersects(OutputDevices::ALL_SCO) {
                    dev.end_bt_sco();
                }
                dev.input_source = InputSource::Default;
                dev.select_devices();
            }
        }
    }

    /// Mutes or unmutes capture. During a call the radio uplink is muted
    /// as well; outside a call the flag only zeroes captured frames.
    pub fn set_mic_mute(&self, mute: bool) {
        debug!(mute, "setting mic mute");
        let mut dev = self.state.lock();
        dev.mic_mute = mute;
        if dev.in_call {
            dev.radio.set_mute(if mute {
                MuteState::TxMute
            } else {
                MuteState::TxUnmute
            });
        }
    }

    /// Current capture mute state.
    pub fn mic_mute(&self) -> bool {
        self.state.lock().mic_mute
    }

    /// Caches the voice volume and forwards it to the radio while a call
    /// is established.
    pub fn set_voice_volume(&self, volume: f32) {
        let mut dev = self.state.lock();
        dev.voice_volume = volume;
        if dev.mode == AudioMode::InCall {
            dev.radio.set_call_volume(SoundType::Voice, volume);
        }
    }

    /// Applies device-wide parameters: `bt_headset_nrec` and
    /// `noise_suppression`. Unknown keys are ignored.
    pub fn set_parameters(&self, params: &Parameters) {
        let mut dev = self.state.lock();

        if let Some(value) = params.get(keys::BT_NREC) {
            dev.bluetooth_nrec = value == keys::ON;
        }

        if let Some(value) = params.get(keys::NOISE_SUPPRESSION) {
            let state = if value == keys::ON {
                TwoMicState::On
            } else {
                TwoMicState::Off
            };
            info!(?state, "two mic control");
            dev.radio.set_two_mic_control(TwoMicDevice::Audience, state);
        }
    }

    /// Capture buffer size in bytes for a client configuration.
    pub fn input_buffer_size(&self, sample_rate: u32, channel_mask: InputChannelMask) -> usize {
        config::input_buffer_size(sample_rate, channel_mask.channel_count())
    }

    /// Opens an output stream.
    ///
    /// `flags.deep_buffer` selects the deep-buffer slot and geometry;
    /// otherwise the stream is low-latency. An empty device set defaults to
    /// the speaker. Each slot holds at most one stream.
    pub fn open_output_stream(
        self: &Arc<Self>,
        devices: OutputDevices,
        flags: OutputFlags,
    ) -> Result<OutputStream, HalError> {
        let devices = if devices.is_empty() {
            OutputDevices::SPEAKER
        } else {
            devices
        };
        let (ty, config) = if flags.deep_buffer {
            (OutputType::DeepBuffer, pcm_config_deep())
        } else {
            (OutputType::LowLatency, pcm_config_fast())
        };

        let mut dev = self.state.lock();
        if dev.outputs[ty.index()].is_some() {
            return Err(HalError::Busy { slot: ty });
        }
        dev.outputs[ty.index()] = Some(OutputSlot {
            device: devices,
            standby: true,
        });
        drop(dev);

        debug!(?ty, devices = format_args!("{devices:#x}"), "opened output stream");
        Ok(OutputStream::new(
            Arc::clone(self),
            ty,
            config,
            PCM_DEVICE_MEDIA,
            OutputChannelMask::Stereo,
            vec![OutputChannelMask::Stereo],
        ))
    }

    /// Opens an input stream capturing from `devices` at `sample_rate`.
    ///
    /// Only stereo capture is accepted; other masks are rejected with the
    /// stereo suggestion so the client can retry. Rates other than the
    /// native capture rate go through a resampler.
    pub fn open_input_stream(
        self: &Arc<Self>,
        io_handle: IoHandle,
        devices: InputDevices,
        sample_rate: u32,
        channel_mask: InputChannelMask,
    ) -> Result<InputStream, HalError> {
        if channel_mask != InputChannelMask::Stereo {
            return Err(HalError::UnsupportedChannelMask {
                suggested: InputChannelMask::Stereo,
            });
        }

        let config = pcm_config_capture();
        let resampler = if sample_rate != config.rate {
            let resampler = self
                .resamplers
                .create(
                    config.rate,
                    sample_rate,
                    channel_mask.channel_count() as u32,
                    ResamplerQuality::Default,
                )
                .map_err(|error| HalError::Resampler(error.to_string()))?;
            debug!(from = config.rate, to = sample_rate, "created capture resampler");
            Some(resampler)
        } else {
            None
        };

        Ok(InputStream::new(
            Arc::clone(self),
            io_handle,
            devices,
            sample_rate,
            channel_mask,
            CaptureBuffer::new(config, channel_mask),
            resampler,
        ))
    }
}
