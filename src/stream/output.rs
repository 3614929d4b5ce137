//! Playback stream lifecycle.
//!
//! An output stream opens its kernel PCM lazily on the first write and
//! releases it on standby. Routing state shared with the rest of the
//! device (the slot's device set and standby flag) lives under the device
//! lock; only the PCM handle is guarded by the stream's own lock.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::config::{PcmConfig, PCM_CARD};
use crate::device::{AudioDevice, DeviceState};
use crate::devices::{OutputChannelMask, OutputDevices};
use crate::error::HalError;
use crate::hw::{PcmDirection, PcmStream};
use crate::lock::{LockRank, OrderedMutex};
use crate::params::{keys, Parameters};
use crate::stream::OutputType;

struct OutState {
    pcm: Option<Box<dyn PcmStream>>,
}

/// A playback stream bound to one output slot.
pub struct OutputStream {
    dev: Arc<AudioDevice>,
    ty: OutputType,
    config: PcmConfig,
    pcm_device: u32,
    channel_mask: OutputChannelMask,
    supported_channel_masks: Vec<OutputChannelMask>,
    state: OrderedMutex<OutState>,
}

impl std::fmt::Debug for OutputStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputStream")
            .field("ty", &self.ty)
            .field("config", &self.config)
            .field("pcm_device", &self.pcm_device)
            .field("channel_mask", &self.channel_mask)
            .finish_non_exhaustive()
    }
}

impl OutputStream {
    pub(crate) fn new(
        dev: Arc<AudioDevice>,
        ty: OutputType,
        config: PcmConfig,
        pcm_device: u32,
        channel_mask: OutputChannelMask,
        supported_channel_masks: Vec<OutputChannelMask>,
    ) -> Self {
        Self {
            dev,
            ty,
            config,
            pcm_device,
            channel_mask,
            supported_channel_masks,
            state: OrderedMutex::new(LockRank::Stream, OutState { pcm: None }),
        }
    }

    /// Fixed stream sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.config.rate
    }

    /// Write chunk size in bytes.
    pub fn buffer_size(&self) -> usize {
        self.config.period_size * self.config.frame_bytes()
    }

    /// Channel layout of written frames.
    pub fn channel_mask(&self) -> OutputChannelMask {
        self.channel_mask
    }

    /// Playback latency in milliseconds, from the driver buffer depth.
    pub fn latency_ms(&self) -> u32 {
        self.config.buffer_ms()
    }

    /// The sample rate is fixed by the hardware.
    pub fn set_sample_rate(&self, _rate: u32) -> Result<(), HalError> {
        Err(HalError::Unsupported)
    }

    /// The sample format is fixed by the hardware.
    pub fn set_format(&self) -> Result<(), HalError> {
        Err(HalError::Unsupported)
    }

    /// Volume is applied in the mixer above this layer, not per stream.
    pub fn set_volume(&self, _left: f32, _right: f32) -> Result<(), HalError> {
        Err(HalError::Unsupported)
    }

    /// Opens the PCM and joins the stream's devices into the active route.
    ///
    /// Called with both locks held. In-call routing is owned by the mode
    /// switch, so the device union is skipped while a call is up.
    fn start_locked(&self, dev: &mut DeviceState, st: &mut OutState) -> Result<(), HalError> {
        debug!(ty = ?self.ty, "starting output stream");

        let pcm = dev
            .pcm
            .open(PCM_CARD, self.pcm_device, PcmDirection::Out, self.config)
            .map_err(|error| HalError::PcmOpen {
                device: self.pcm_device,
                reason: error.to_string(),
            })?;
        if !pcm.is_ready() {
            return Err(HalError::PcmOpen {
                device: self.pcm_device,
                reason: "output stream not ready".to_string(),
            });
        }
        st.pcm = Some(pcm);

        let device = dev.slot(self.ty).device;
        if !dev.in_call {
            dev.out_device |= device;
            dev.select_devices();
        }

        if device.intersects(OutputDevices::ALL_SCO) {
            dev.start_bt_sco();
        }

        Ok(())
    }

    /// Writes one buffer of interleaved samples.
    ///
    /// Always reports the full request as written. When the stream cannot
    /// start or the driver write fails, the call instead sleeps for the
    /// buffer's duration so the client keeps pacing in real time.
    pub fn write(&self, buffer: &[i16]) -> usize {
        let mut throttle = false;
        {
            // The device lock is taken first even when the stream is
            // already running, so a thread blocked in set_parameters()
            // cannot starve behind the write path.
            let mut dev = self.dev.state.lock();
            let mut st = self.state.lock();

            if dev.slot(self.ty).standby {
                match self.start_locked(&mut dev, &mut st) {
                    Ok(()) => dev.slot_mut(self.ty).standby = false,
                    Err(error) => {
                        error!(%error, "cannot start output stream");
                        throttle = true;
                    }
                }
            }
            drop(dev);

            if !throttle {
                if let Some(pcm) = st.pcm.as_mut() {
                    if let Err(error) = pcm.write(buffer) {
                        warn!(%error, "pcm write failed");
                        throttle = true;
                    }
                }
            }
        }

        if throttle {
            thread::sleep(self.buffer_duration(buffer.len()));
        }
        buffer.len()
    }

    /// Puts the stream into standby, closing its PCM and re-routing to the
    /// remaining active outputs.
    pub fn standby(&self) {
        let mut dev = self.dev.state.lock();
        let mut st = self.state.lock();
        self.do_standby(&mut dev, &mut st);
    }

    /// Standby body, called with both locks held.
    fn do_standby(&self, dev: &mut DeviceState, st: &mut OutState) {
        if dev.slot(self.ty).standby {
            return;
        }
        debug!(ty = ?self.ty, "output standby");

        st.pcm = None;
        dev.slot_mut(self.ty).standby = true;

        if dev.slot(self.ty).device.intersects(OutputDevices::ALL_SCO) {
            dev.end_bt_sco();
        }

        // Re-derive the active device set from the other streams; leave the
        // mixer alone when nothing is playing.
        dev.out_device = dev.other_output_devices(self.ty);
        if !dev.out_device.is_empty() {
            dev.select_devices();
        }
    }

    /// Applies stream parameters; only the `routing` key is recognized.
    ///
    /// Moving onto or off a SCO device forces a standby first so the SCO
    /// PCM pair is torn down or brought up cleanly.
    pub fn set_parameters(&self, params: &Parameters) {
        let Some(bits) = params.get_u32(keys::ROUTING) else {
            return;
        };
        let requested = OutputDevices::from_bits(bits);

        let mut dev = self.dev.state.lock();
        let mut st = self.state.lock();
        if requested.is_empty() || dev.out_device == requested {
            return;
        }

        let current = dev.slot(self.ty).device;
        if requested.intersects(OutputDevices::ALL_SCO) != current.intersects(OutputDevices::ALL_SCO)
        {
            self.do_standby(&mut dev, &mut st);
        }

        dev.slot_mut(self.ty).device = requested;
        dev.out_device = requested;
        dev.select_devices();

        if requested.intersects(OutputDevices::ALL_SCO) {
            dev.start_bt_sco();
        }
    }

    /// Answers stream parameter queries; only `sup_channels` is recognized.
    pub fn get_parameters(&self, query: &Parameters) -> Parameters {
        let mut reply = Parameters::new();
        if query.get(keys::SUP_CHANNELS).is_some() {
            let names: Vec<&str> = self
                .supported_channel_masks
                .iter()
                .map(|mask| mask.name())
                .collect();
            reply.set(keys::SUP_CHANNELS, names.join("|"));
        }
        reply
    }

    fn buffer_duration(&self, samples: usize) -> Duration {
        let frames = samples / self.config.channels as usize;
        Duration::from_micros(frames as u64 * 1_000_000 / u64::from(self.config.rate))
    }
}

impl Drop for OutputStream {
    fn drop(&mut self) {
        self.standby();
        let mut dev = self.dev.state.lock();
        dev.outputs[self.ty.index()] = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Hal;
    use crate::hw::mock::{MockPathBackend, MockPcmBackend, MockRadio, MockVoiceProcessor};
    use crate::resample::LinearResamplerFactory;
    use crate::stream::OutputFlags;

    fn test_device() -> (Arc<AudioDevice>, MockPathBackend, MockPcmBackend) {
        let path = MockPathBackend::new();
        let pcm = MockPcmBackend::new();
        let device = AudioDevice::open(Hal {
            path: Box::new(path.clone()),
            pcm: Arc::new(pcm.clone()),
            voice_fx: Box::new(MockVoiceProcessor::new()),
            radio: Box::new(MockRadio::new()),
            resamplers: Arc::new(LinearResamplerFactory),
        });
        (device, path, pcm)
    }

    #[test]
    fn test_first_write_starts_stream_and_routes() {
        let (device, path, pcm) = test_device();
        let stream = device
            .open_output_stream(OutputDevices::SPEAKER, OutputFlags::default())
            .unwrap();

        let written = stream.write(&[0i16; 480]);
        assert_eq!(written, 480);
        assert_eq!(pcm.open_count(0, PcmDirection::Out), 1);
        assert_eq!(pcm.writes(), vec![(0, 480)]);
        assert_eq!(path.applied_paths(), vec!["media-speaker"]);
    }

    #[test]
    fn test_second_write_does_not_reopen() {
        let (device, _path, pcm) = test_device();
        let stream = device
            .open_output_stream(OutputDevices::SPEAKER, OutputFlags::default())
            .unwrap();
        stream.write(&[0i16; 480]);
        stream.write(&[0i16; 480]);
        assert_eq!(pcm.open_count(0, PcmDirection::Out), 1);
        assert_eq!(pcm.writes().len(), 2);
    }

    #[test]
    fn test_failed_start_still_reports_full_write() {
        let (device, path, pcm) = test_device();
        pcm.fail_open(0, PcmDirection::Out);
        let stream = device
            .open_output_stream(OutputDevices::SPEAKER, OutputFlags::default())
            .unwrap();

        // Small buffer keeps the throttle sleep short.
        let written = stream.write(&[0i16; 48]);
        assert_eq!(written, 48);
        assert!(pcm.writes().is_empty());
        // Start failed before routing was applied.
        assert_eq!(path.mixer_updates(), 0);
    }

    #[test]
    fn test_failed_write_reports_full_count() {
        let (device, _path, pcm) = test_device();
        pcm.fail_write(0, PcmDirection::Out);
        let stream = device
            .open_output_stream(OutputDevices::SPEAKER, OutputFlags::default())
            .unwrap();
        assert_eq!(stream.write(&[0i16; 48]), 48);
    }

    #[test]
    fn test_standby_closes_pcm_and_keeps_mixer_when_idle() {
        let (device, path, pcm) = test_device();
        let stream = device
            .open_output_stream(OutputDevices::SPEAKER, OutputFlags::default())
            .unwrap();
        stream.write(&[0i16; 480]);
        let updates = path.mixer_updates();

        stream.standby();
        assert!(pcm.closed(0, PcmDirection::Out));
        // No other stream is active, so the route is left as-is.
        assert_eq!(path.mixer_updates(), updates);
    }

    #[test]
    fn test_standby_twice_is_harmless() {
        let (device, _path, pcm) = test_device();
        let stream = device
            .open_output_stream(OutputDevices::SPEAKER, OutputFlags::default())
            .unwrap();
        stream.write(&[0i16; 480]);
        stream.standby();
        stream.standby();
        assert_eq!(pcm.open_count(0, PcmDirection::Out), 1);
    }

    #[test]
    fn test_standby_reroutes_to_other_active_stream() {
        let (device, path, _pcm) = test_device();
        let fast = device
            .open_output_stream(OutputDevices::SPEAKER, OutputFlags::default())
            .unwrap();
        let deep = device
            .open_output_stream(OutputDevices::WIRED_HEADPHONE, OutputFlags { deep_buffer: true })
            .unwrap();
        fast.write(&[0i16; 480]);
        deep.write(&[0i16; 480]);

        fast.standby();
        // The headphone-only route of the remaining stream is reapplied.
        assert_eq!(path.applied_paths().last().unwrap(), "media-headphones");
    }

    #[test]
    fn test_routing_to_sco_forces_standby_and_opens_sco() {
        let (device, _path, pcm) = test_device();
        let stream = device
            .open_output_stream(OutputDevices::SPEAKER, OutputFlags::default())
            .unwrap();
        stream.write(&[0i16; 480]);

        let mut params = Parameters::new();
        params.set(keys::ROUTING, OutputDevices::BT_SCO_HEADSET.bits());
        stream.set_parameters(&params);

        // The media PCM was closed by the forced standby and the SCO pair
        // was brought up.
        assert!(pcm.closed(0, PcmDirection::Out));
        assert_eq!(pcm.open_count(2, PcmDirection::Out), 1);
        assert_eq!(pcm.open_count(2, PcmDirection::In), 1);
    }

    #[test]
    fn test_routing_same_devices_is_noop() {
        let (device, path, _pcm) = test_device();
        let stream = device
            .open_output_stream(OutputDevices::SPEAKER, OutputFlags::default())
            .unwrap();
        stream.write(&[0i16; 480]);
        let updates = path.mixer_updates();

        let mut params = Parameters::new();
        params.set(keys::ROUTING, OutputDevices::SPEAKER.bits());
        stream.set_parameters(&params);
        assert_eq!(path.mixer_updates(), updates);
    }

    #[test]
    fn test_sup_channels_query() {
        let (device, _path, _pcm) = test_device();
        let stream = device
            .open_output_stream(OutputDevices::SPEAKER, OutputFlags::default())
            .unwrap();
        let query: Parameters = keys::SUP_CHANNELS.parse().unwrap();
        let reply = stream.get_parameters(&query);
        assert_eq!(reply.get(keys::SUP_CHANNELS), Some("stereo"));
    }

    #[test]
    fn test_fixed_properties() {
        let (device, _path, _pcm) = test_device();
        let stream = device
            .open_output_stream(OutputDevices::SPEAKER, OutputFlags { deep_buffer: true })
            .unwrap();
        assert_eq!(stream.sample_rate(), 48000);
        assert_eq!(stream.buffer_size(), 3840 * 4);
        assert_eq!(stream.latency_ms(), 160);
        assert!(stream.set_volume(0.5, 0.5).is_err());
        assert!(stream.set_sample_rate(44100).is_err());
    }

    #[test]
    fn test_drop_releases_slot() {
        let (device, _path, pcm) = test_device();
        let stream = device
            .open_output_stream(OutputDevices::SPEAKER, OutputFlags::default())
            .unwrap();
        stream.write(&[0i16; 480]);
        drop(stream);

        assert!(pcm.closed(0, PcmDirection::Out));
        assert!(device
            .open_output_stream(OutputDevices::SPEAKER, OutputFlags::default())
            .is_ok());
    }
}
