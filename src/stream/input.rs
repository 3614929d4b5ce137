//! Capture stream lifecycle and the capture pipeline.
//!
//! Capture always runs at the native hardware geometry. Frames flow from
//! the kernel PCM into a period-sized [`CaptureBuffer`], optionally through
//! a resampler, then through the startup volume ramp and the mute gate
//! before reaching the client.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::config::{self, PcmConfig, CAPTURE_START_RAMP_MS, PCM_CARD, PCM_DEVICE_CAPTURE};
use crate::device::{AudioDevice, DeviceState};
use crate::devices::{InputChannelMask, InputDevices, InputSource};
use crate::error::{BackendError, HalError};
use crate::hw::{EffectDescriptor, FrameProvider, IoHandle, PcmDirection, PcmStream, Resampler};
use crate::lock::{LockRank, OrderedMutex};
use crate::params::{keys, Parameters};

/// Period-sized staging buffer between the kernel PCM and the client,
/// consumed through the [`FrameProvider`] pull interface.
pub(crate) struct CaptureBuffer {
    pcm: Option<Box<dyn PcmStream>>,
    config: PcmConfig,
    channel_mask: InputChannelMask,
    buffer: Vec<i16>,
    /// Frames buffered but not yet released, always at the buffer's tail.
    frames_in: usize,
}

impl CaptureBuffer {
    pub(crate) fn new(config: PcmConfig, channel_mask: InputChannelMask) -> Self {
        Self {
            pcm: None,
            config,
            channel_mask,
            buffer: vec![0; config.period_size * config.channels as usize],
            frames_in: 0,
        }
    }

    pub(crate) fn config(&self) -> PcmConfig {
        self.config
    }

    /// Binds an open PCM and discards any stale buffered frames.
    fn attach(&mut self, pcm: Box<dyn PcmStream>) {
        self.pcm = Some(pcm);
        self.frames_in = 0;
    }

    /// Drops the PCM handle, closing it.
    fn detach(&mut self) {
        self.pcm = None;
    }
}

impl FrameProvider for CaptureBuffer {
    fn get_next_buffer(&mut self, max_frames: usize) -> Result<&[i16], BackendError> {
        let Some(pcm) = self.pcm.as_mut() else {
            return Err(BackendError::DeviceGone);
        };

        if self.frames_in == 0 {
            let hw_channels = self.config.channels as usize;
            pcm.read(&mut self.buffer[..self.config.period_size * hw_channels])?;
            self.frames_in = self.config.period_size;

            // Stereo to mono in place by keeping the left channel.
            if self.channel_mask == InputChannelMask::Mono {
                for i in 1..self.frames_in {
                    self.buffer[i] = self.buffer[i * 2];
                }
            }
        }

        let frames = max_frames.min(self.frames_in);
        let channels = self.channel_mask.channel_count();
        let offset = (self.config.period_size - self.frames_in) * channels;
        Ok(&self.buffer[offset..offset + frames * channels])
    }

    fn release_buffer(&mut self, frames: usize) {
        self.frames_in -= frames.min(self.frames_in);
    }
}

/// Startup gain ramp, fading capture in over the first few milliseconds so
/// the device-open transient is not audible in the recording.
struct Ramp {
    vol: u16,
    step: u16,
    frames: usize,
}

impl Ramp {
    fn idle() -> Self {
        Self {
            vol: 0,
            step: 0,
            frames: 0,
        }
    }

    /// Arms the ramp for a stream at `rate` Hz.
    fn start(&mut self, rate: u32) {
        let frames = (u64::from(CAPTURE_START_RAMP_MS) * u64::from(rate)).div_ceil(1000) as usize;
        self.frames = frames;
        self.step = ((1u32 << 16) / frames as u32).min(u32::from(u16::MAX)) as u16;
        self.vol = 0;
    }

    fn active(&self) -> bool {
        self.frames > 0
    }

    /// Scales up to `frames` frames in place, advancing the gain once per
    /// frame across all channels.
    fn apply(&mut self, buffer: &mut [i16], frames: usize, channels: usize) {
        let frames = frames.min(self.frames);
        for i in 0..frames {
            for ch in 0..channels {
                let index = i * channels + ch;
                buffer[index] = ((i32::from(buffer[index]) * i32::from(self.vol)) >> 16) as i16;
            }
            self.vol = self.vol.saturating_add(self.step);
        }
        self.frames -= frames;
    }
}

/// Fills `output` with `frames` frames, pulling from the capture buffer
/// directly or through the resampler.
fn read_frames(
    capture: &mut CaptureBuffer,
    resampler: &mut Option<Box<dyn Resampler>>,
    output: &mut [i16],
    frames: usize,
    channels: usize,
) -> Result<(), BackendError> {
    let mut frames_wr = 0;
    while frames_wr < frames {
        let mut frames_rd = frames - frames_wr;
        let offset = frames_wr * channels;

        if let Some(resampler) = resampler.as_mut() {
            resampler.resample_from_provider(capture, &mut output[offset..], &mut frames_rd)?;
        } else {
            let copied = {
                let chunk = capture.get_next_buffer(frames_rd)?;
                output[offset..offset + chunk.len()].copy_from_slice(chunk);
                chunk.len() / channels
            };
            capture.release_buffer(copied);
            frames_rd = copied;
        }

        if frames_rd == 0 {
            return Err(BackendError::failed("capture made no progress"));
        }
        frames_wr += frames_rd;
    }
    Ok(())
}

struct InState {
    standby: bool,
    source: InputSource,
    device: InputDevices,
    capture: CaptureBuffer,
    resampler: Option<Box<dyn Resampler>>,
    ramp: Ramp,
}

/// A capture stream.
pub struct InputStream {
    dev: Arc<AudioDevice>,
    io_handle: IoHandle,
    requested_rate: u32,
    channel_mask: InputChannelMask,
    state: OrderedMutex<InState>,
}

impl std::fmt::Debug for InputStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputStream")
            .field("io_handle", &self.io_handle)
            .field("requested_rate", &self.requested_rate)
            .field("channel_mask", &self.channel_mask)
            .finish_non_exhaustive()
    }
}

impl InputStream {
    pub(crate) fn new(
        dev: Arc<AudioDevice>,
        io_handle: IoHandle,
        devices: InputDevices,
        requested_rate: u32,
        channel_mask: InputChannelMask,
        capture: CaptureBuffer,
        resampler: Option<Box<dyn Resampler>>,
    ) -> Self {
        Self {
            dev,
            io_handle,
            requested_rate,
            channel_mask,
            state: OrderedMutex::new(
                LockRank::Stream,
                InState {
                    standby: true,
                    source: InputSource::Default,
                    device: devices,
                    capture,
                    resampler,
                    ramp: Ramp::idle(),
                },
            ),
        }
    }

    /// Client-visible sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.requested_rate
    }

    /// Channel layout of delivered frames.
    pub fn channel_mask(&self) -> InputChannelMask {
        self.channel_mask
    }

    /// Preferred read chunk size in bytes.
    pub fn buffer_size(&self) -> usize {
        config::input_buffer_size(self.requested_rate, self.channel_mask.channel_count())
    }

    /// Opens the capture PCM and publishes this stream's source and device
    /// as the device-wide capture state.
    ///
    /// Called with both locks held. In-call routing is owned by the mode
    /// switch, so route publication is skipped while a call is up.
    fn start_locked(&self, dev: &mut DeviceState, st: &mut InState) -> Result<(), HalError> {
        debug!(io_handle = %self.io_handle, "starting input stream");

        let pcm = dev
            .pcm
            .open(
                PCM_CARD,
                PCM_DEVICE_CAPTURE,
                PcmDirection::In,
                st.capture.config(),
            )
            .map_err(|error| HalError::PcmOpen {
                device: PCM_DEVICE_CAPTURE,
                reason: error.to_string(),
            })?;
        if !pcm.is_ready() {
            return Err(HalError::PcmOpen {
                device: PCM_DEVICE_CAPTURE,
                reason: "capture stream not ready".to_string(),
            });
        }
        st.capture.attach(pcm);

        if let Some(resampler) = st.resampler.as_mut() {
            resampler.reset();
        }

        if !dev.in_call {
            dev.input_source = st.source;
            dev.in_device = st.device;
            dev.voice_fx.set_active_io_handle(Some(self.io_handle));
            dev.select_devices();
        }

        if st.device.intersects(InputDevices::BT_SCO_HEADSET) {
            dev.start_bt_sco();
        }

        st.ramp.start(self.requested_rate);
        Ok(())
    }

    /// Reads one buffer of interleaved samples.
    ///
    /// Always reports the full request as read. When the stream cannot
    /// start or the driver read fails, the call sleeps for the buffer's
    /// duration before returning so the client keeps pacing in real time.
    /// While the mic is muted the delivered frames are zeroed.
    pub fn read(&self, buffer: &mut [i16]) -> usize {
        let channels = self.channel_mask.channel_count();
        let frames_rq = buffer.len() / channels;
        {
            let mut dev = self.dev.state.lock();
            let mut st = self.state.lock();

            let mut failed = false;
            if st.standby {
                match self.start_locked(&mut dev, &mut st) {
                    Ok(()) => st.standby = false,
                    Err(error) => {
                        error!(%error, "cannot start input stream");
                        failed = true;
                    }
                }
            }
            let mic_mute = dev.mic_mute;
            drop(dev);

            if !failed {
                let st = &mut *st;
                match read_frames(&mut st.capture, &mut st.resampler, buffer, frames_rq, channels)
                {
                    Ok(()) => {
                        if st.ramp.active() {
                            st.ramp.apply(buffer, frames_rq, channels);
                        }
                        if mic_mute {
                            buffer.fill(0);
                        }
                    }
                    Err(error) => {
                        warn!(%error, "capture read failed");
                        if st.ramp.active() {
                            st.ramp.apply(buffer, frames_rq, channels);
                        }
                        failed = true;
                    }
                }
            }

            if failed {
                // Throttle while still holding the stream lock so a
                // spinning client cannot flood the capture path.
                thread::sleep(Duration::from_micros(
                    frames_rq as u64 * 1_000_000 / u64::from(self.requested_rate),
                ));
            }
        }
        buffer.len()
    }

    /// Puts the stream into standby, closing the capture PCM and clearing
    /// the device-wide capture state.
    pub fn standby(&self) {
        let mut dev = self.dev.state.lock();
        let mut st = self.state.lock();
        self.do_standby(&mut dev, &mut st);
    }

    /// Standby body, called with both locks held. The DSP's active session
    /// is cleared even if the stream was already in standby.
    fn do_standby(&self, dev: &mut DeviceState, st: &mut InState) {
        if !st.standby {
            debug!(io_handle = %self.io_handle, "input standby");
            st.capture.detach();

            if st.device.intersects(InputDevices::BT_SCO_HEADSET) {
                dev.end_bt_sco();
            }

            dev.input_source = InputSource::Default;
            dev.in_device = InputDevices::NONE;
            dev.select_devices();
            st.standby = true;
        }

        dev.voice_fx.set_active_io_handle(None);
    }

    /// Applies stream parameters: `input_source` and `routing`.
    ///
    /// Changes on an active stream re-route immediately; on a standby
    /// stream they take effect at the next start. Moving onto or off the
    /// SCO microphone forces a standby so the SCO pair is cycled cleanly.
    pub fn set_parameters(&self, params: &Parameters) {
        let mut dev = self.dev.state.lock();
        let mut st = self.state.lock();
        let mut apply_now = false;

        if let Some(raw) = params.get_u32(keys::INPUT_SOURCE) {
            if let Some(source) = InputSource::from_raw(raw) {
                if st.source != source {
                    st.source = source;
                    apply_now = !st.standby;
                }
            }
        }

        if let Some(bits) = params.get_u32(keys::ROUTING) {
            let device = InputDevices::from_bits(bits);
            if !device.is_empty() && st.device != device {
                if device.intersects(InputDevices::BT_SCO_HEADSET)
                    != st.device.intersects(InputDevices::BT_SCO_HEADSET)
                {
                    self.do_standby(&mut dev, &mut st);
                }
                st.device = device;
                apply_now = !st.standby;
            }
        }

        if apply_now {
            dev.input_source = st.source;
            dev.in_device = st.device;
            dev.select_devices();
        }
    }

    /// Attaches a preprocessing effect to this stream's DSP session.
    pub fn add_effect(&self, effect: &EffectDescriptor) {
        let mut dev = self.dev.state.lock();
        let _st = self.state.lock();
        dev.voice_fx.add_effect(self.io_handle, effect);
    }

    /// Detaches a preprocessing effect from this stream's DSP session.
    pub fn remove_effect(&self, effect: &EffectDescriptor) {
        let mut dev = self.dev.state.lock();
        let _st = self.state.lock();
        dev.voice_fx.remove_effect(self.io_handle, effect);
    }
}

impl Drop for InputStream {
    fn drop(&mut self) {
        self.standby();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::pcm_config_capture;
    use crate::device::Hal;
    use crate::hw::mock::{MockPathBackend, MockPcmBackend, MockRadio, MockVoiceProcessor};
    use crate::hw::PcmBackend;
    use crate::resample::LinearResamplerFactory;

    fn test_device() -> (
        Arc<AudioDevice>,
        MockPathBackend,
        MockPcmBackend,
        MockVoiceProcessor,
    ) {
        let path = MockPathBackend::new();
        let pcm = MockPcmBackend::new();
        let voice_fx = MockVoiceProcessor::new();
        let device = AudioDevice::open(Hal {
            path: Box::new(path.clone()),
            pcm: Arc::new(pcm.clone()),
            voice_fx: Box::new(voice_fx.clone()),
            radio: Box::new(MockRadio::new()),
            resamplers: Arc::new(LinearResamplerFactory),
        });
        (device, path, pcm, voice_fx)
    }

    fn attach_capture(buffer: &mut CaptureBuffer, pcm: &MockPcmBackend) {
        let stream = pcm
            .open(PCM_CARD, PCM_DEVICE_CAPTURE, PcmDirection::In, buffer.config())
            .unwrap();
        buffer.attach(stream);
    }

    #[test]
    fn test_capture_buffer_serves_one_period() {
        let pcm = MockPcmBackend::new();
        let mut capture = CaptureBuffer::new(pcm_config_capture(), InputChannelMask::Stereo);
        attach_capture(&mut capture, &pcm);
        pcm.push_capture(vec![7; 480]);

        let chunk = capture.get_next_buffer(1000).unwrap();
        assert_eq!(chunk.len(), 240 * 2);
        assert_eq!(chunk[0], 7);
        capture.release_buffer(240);
    }

    #[test]
    fn test_capture_buffer_partial_release_resumes_at_offset() {
        let pcm = MockPcmBackend::new();
        let mut capture = CaptureBuffer::new(pcm_config_capture(), InputChannelMask::Stereo);
        attach_capture(&mut capture, &pcm);
        let samples: Vec<i16> = (0..480).collect();
        pcm.push_capture(samples);

        let chunk = capture.get_next_buffer(100).unwrap();
        assert_eq!(chunk.len(), 200);
        assert_eq!(chunk[0], 0);
        capture.release_buffer(100);

        let chunk = capture.get_next_buffer(1000).unwrap();
        assert_eq!(chunk.len(), 280);
        assert_eq!(chunk[0], 200);
    }

    #[test]
    fn test_capture_buffer_mono_downmix_keeps_left() {
        let pcm = MockPcmBackend::new();
        let mut capture = CaptureBuffer::new(pcm_config_capture(), InputChannelMask::Mono);
        attach_capture(&mut capture, &pcm);
        // Interleaved stereo: left channel 10,20,30..., right negated.
        let mut samples = Vec::new();
        for i in 0..240i16 {
            samples.push((i + 1) * 10);
            samples.push(-(i + 1) * 10);
        }
        pcm.push_capture(samples);

        let chunk = capture.get_next_buffer(4).unwrap();
        assert_eq!(chunk, &[10, 20, 30, 40]);
    }

    #[test]
    fn test_capture_buffer_detached_reports_device_gone() {
        let mut capture = CaptureBuffer::new(pcm_config_capture(), InputChannelMask::Stereo);
        assert_eq!(
            capture.get_next_buffer(16).unwrap_err(),
            BackendError::DeviceGone
        );
    }

    #[test]
    fn test_ramp_parameters_at_48k() {
        let mut ramp = Ramp::idle();
        ramp.start(48000);
        assert_eq!(ramp.frames, 384);
        assert_eq!(ramp.step, 170);
    }

    #[test]
    fn test_ramp_rounds_frame_count_up() {
        let mut ramp = Ramp::idle();
        ramp.start(44100);
        // 8ms at 44.1kHz is 352.8 frames.
        assert_eq!(ramp.frames, 353);
    }

    #[test]
    fn test_ramp_fades_in_and_expires() {
        let mut ramp = Ramp::idle();
        ramp.start(48000);

        let mut buffer = vec![10000i16; 200];
        ramp.apply(&mut buffer, 200, 1);
        assert_eq!(buffer[0], 0);
        assert!(buffer[100] > buffer[1]);
        assert!(buffer[199] < 10000);
        assert!(ramp.active());

        let mut buffer = vec![10000i16; 200];
        ramp.apply(&mut buffer, 200, 1);
        assert!(!ramp.active());
        // Only the remaining 184 ramp frames were scaled.
        assert_eq!(buffer[190], 10000);
    }

    #[test]
    fn test_ramp_stereo_advances_per_frame() {
        let mut ramp = Ramp::idle();
        ramp.start(48000);

        let mut buffer = vec![10000i16; 8];
        ramp.apply(&mut buffer, 4, 2);
        // Both channels of a frame share the same gain.
        assert_eq!(buffer[2], buffer[3]);
        assert!(buffer[4] > buffer[2]);
    }

    #[test]
    fn test_first_read_starts_capture_and_routes() {
        let (device, path, pcm, voice_fx) = test_device();
        let stream = device
            .open_input_stream(
                IoHandle(3),
                InputDevices::BUILTIN_MIC,
                48000,
                InputChannelMask::Stereo,
            )
            .unwrap();

        let mut params = Parameters::new();
        params.set(keys::INPUT_SOURCE, 1u32);
        stream.set_parameters(&params);

        let mut buffer = vec![0i16; 480];
        assert_eq!(stream.read(&mut buffer), 480);
        assert_eq!(pcm.open_count(PCM_DEVICE_CAPTURE, PcmDirection::In), 1);
        assert_eq!(path.applied_paths(), vec!["media-main-mic"]);
        assert_eq!(voice_fx.handles(), vec![Some(IoHandle(3))]);
    }

    #[test]
    fn test_read_zeroes_frames_while_muted() {
        let (device, _path, pcm, _voice_fx) = test_device();
        device.set_mic_mute(true);
        let stream = device
            .open_input_stream(
                IoHandle(3),
                InputDevices::BUILTIN_MIC,
                48000,
                InputChannelMask::Stereo,
            )
            .unwrap();
        pcm.push_capture(vec![1234; 480]);

        let mut buffer = vec![99i16; 480];
        stream.read(&mut buffer);
        assert!(buffer.iter().all(|&s| s == 0));
    }

    #[test]
    fn test_read_error_still_reports_full_count() {
        let (device, _path, pcm, _voice_fx) = test_device();
        let stream = device
            .open_input_stream(
                IoHandle(3),
                InputDevices::BUILTIN_MIC,
                48000,
                InputChannelMask::Stereo,
            )
            .unwrap();
        pcm.fail_next_read(BackendError::DeviceGone);

        // Small buffer keeps the throttle sleep short.
        let mut buffer = vec![0i16; 96];
        assert_eq!(stream.read(&mut buffer), 96);
    }

    #[test]
    fn test_resampled_read_fills_client_rate_buffer() {
        let (device, _path, _pcm, _voice_fx) = test_device();
        let stream = device
            .open_input_stream(
                IoHandle(3),
                InputDevices::BUILTIN_MIC,
                16000,
                InputChannelMask::Stereo,
            )
            .unwrap();

        // 10ms at 16kHz stereo; pulled from 48kHz silence underneath.
        let mut buffer = vec![0i16; 320];
        assert_eq!(stream.read(&mut buffer), 320);
        assert_eq!(stream.sample_rate(), 16000);
    }

    #[test]
    fn test_standby_clears_capture_state_and_session() {
        let (device, _path, pcm, voice_fx) = test_device();
        let stream = device
            .open_input_stream(
                IoHandle(5),
                InputDevices::BUILTIN_MIC,
                48000,
                InputChannelMask::Stereo,
            )
            .unwrap();
        let mut buffer = vec![0i16; 480];
        stream.read(&mut buffer);

        stream.standby();
        assert!(pcm.closed(PCM_DEVICE_CAPTURE, PcmDirection::In));
        assert_eq!(voice_fx.handles(), vec![Some(IoHandle(5)), None]);
        assert!(device.state.lock().in_device.is_empty());
    }

    #[test]
    fn test_set_parameters_reroutes_active_stream() {
        let (device, path, _pcm, _voice_fx) = test_device();
        let stream = device
            .open_input_stream(
                IoHandle(3),
                InputDevices::BUILTIN_MIC,
                48000,
                InputChannelMask::Stereo,
            )
            .unwrap();
        let mut buffer = vec![0i16; 480];
        stream.read(&mut buffer);

        let mut params = Parameters::new();
        params.set(keys::INPUT_SOURCE, 3u32);
        stream.set_parameters(&params);

        assert_eq!(path.applied_paths().last().unwrap(), "voice-rec-main-mic");
    }

    #[test]
    fn test_routing_to_sco_mic_forces_standby() {
        let (device, _path, pcm, _voice_fx) = test_device();
        let stream = device
            .open_input_stream(
                IoHandle(3),
                InputDevices::BUILTIN_MIC,
                48000,
                InputChannelMask::Stereo,
            )
            .unwrap();
        let mut buffer = vec![0i16; 480];
        stream.read(&mut buffer);

        let mut params = Parameters::new();
        params.set(keys::ROUTING, InputDevices::BT_SCO_HEADSET.bits());
        stream.set_parameters(&params);
        assert!(pcm.closed(PCM_DEVICE_CAPTURE, PcmDirection::In));

        // The next read reopens capture and brings the SCO pair up.
        stream.read(&mut buffer);
        assert_eq!(pcm.open_count(PCM_DEVICE_CAPTURE, PcmDirection::In), 2);
        assert_eq!(pcm.open_count(2, PcmDirection::Out), 1);
    }

    #[test]
    fn test_effects_use_stream_session() {
        let (device, _path, _pcm, voice_fx) = test_device();
        let stream = device
            .open_input_stream(
                IoHandle(9),
                InputDevices::BUILTIN_MIC,
                48000,
                InputChannelMask::Stereo,
            )
            .unwrap();
        let effect = EffectDescriptor {
            name: "aec".to_string(),
        };
        stream.add_effect(&effect);
        stream.remove_effect(&effect);

        assert_eq!(voice_fx.added_effects(), vec![(IoHandle(9), "aec".to_string())]);
        assert_eq!(
            voice_fx.removed_effects(),
            vec![(IoHandle(9), "aec".to_string())]
        );
    }
}
