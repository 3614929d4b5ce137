//! Recording mock backends for tests.
//!
//! Each mock is a cheaply cloneable handle onto shared state, so a test can
//! keep a clone for inspection after moving the other into the device. The
//! mocks record every call and let tests script failures per PCM device and
//! direction.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::PcmConfig;
use crate::error::BackendError;
use crate::routing::VoicePreset;

use super::{
    CallAudioPath, ClockSync, EffectDescriptor, IoHandle, MuteState, PathBackend, PcmBackend,
    PcmDirection, PcmStream, Radio, SoundType, TwoMicDevice, TwoMicState, VoiceProcessor,
    WbAmrCallback,
};

/// Mock mixer-path backend recording resets, applied paths, and commits.
#[derive(Debug, Clone, Default)]
pub struct MockPathBackend {
    inner: Arc<Mutex<PathInner>>,
}

#[derive(Debug, Default)]
struct PathInner {
    resets: u32,
    applied: Vec<String>,
    mixer_updates: u32,
}

impl MockPathBackend {
    /// Creates an idle mock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `reset` calls seen.
    pub fn resets(&self) -> u32 {
        self.inner.lock().resets
    }

    /// Every path name applied, in order, across resets.
    pub fn applied_paths(&self) -> Vec<String> {
        self.inner.lock().applied.clone()
    }

    /// Number of `update_mixer` calls seen.
    pub fn mixer_updates(&self) -> u32 {
        self.inner.lock().mixer_updates
    }
}

impl PathBackend for MockPathBackend {
    fn reset(&mut self) {
        self.inner.lock().resets += 1;
    }

    fn apply_path(&mut self, path: &str) {
        self.inner.lock().applied.push(path.to_string());
    }

    fn update_mixer(&mut self) {
        self.inner.lock().mixer_updates += 1;
    }
}

/// One `open` call seen by [`MockPcmBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRecord {
    /// Card index requested.
    pub card: u32,
    /// PCM device index requested.
    pub device: u32,
    /// Transfer direction requested.
    pub direction: PcmDirection,
    /// Geometry requested.
    pub config: PcmConfig,
}

#[derive(Debug, Default)]
struct PcmInner {
    opens: Vec<OpenRecord>,
    fail_open: Vec<(u32, PcmDirection)>,
    fail_ready: Vec<(u32, PcmDirection)>,
    fail_write: Vec<(u32, PcmDirection)>,
    read_queue: VecDeque<Result<Vec<i16>, BackendError>>,
    writes: Vec<(u32, usize)>,
    starts: Vec<(u32, PcmDirection)>,
    stops: Vec<(u32, PcmDirection)>,
    closes: Vec<(u32, PcmDirection)>,
}

/// Mock PCM backend with scriptable per-device failures and capture data.
#[derive(Debug, Clone, Default)]
pub struct MockPcmBackend {
    inner: Arc<Mutex<PcmInner>>,
}

impl MockPcmBackend {
    /// Creates a backend where every open succeeds and reads return silence.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `open` fail for the given device and direction.
    pub fn fail_open(&self, device: u32, direction: PcmDirection) {
        self.inner.lock().fail_open.push((device, direction));
    }

    /// Makes opened handles for the given device and direction report not
    /// ready.
    pub fn fail_ready(&self, device: u32, direction: PcmDirection) {
        self.inner.lock().fail_ready.push((device, direction));
    }

    /// Makes writes fail for the given device and direction.
    pub fn fail_write(&self, device: u32, direction: PcmDirection) {
        self.inner.lock().fail_write.push((device, direction));
    }

    /// Queues one capture read returning `samples` (zero-padded to the
    /// request). Unqueued reads return silence.
    pub fn push_capture(&self, samples: Vec<i16>) {
        self.inner.lock().read_queue.push_back(Ok(samples));
    }

    /// Queues one capture read failing with `error`.
    pub fn fail_next_read(&self, error: BackendError) {
        self.inner.lock().read_queue.push_back(Err(error));
    }

    /// Every `open` call seen, in order.
    pub fn opens(&self) -> Vec<OpenRecord> {
        self.inner.lock().opens.clone()
    }

    /// Number of opens for a device and direction.
    pub fn open_count(&self, device: u32, direction: PcmDirection) -> usize {
        self.inner
            .lock()
            .opens
            .iter()
            .filter(|o| o.device == device && o.direction == direction)
            .count()
    }

    /// Sample counts of every write, per device, in order.
    pub fn writes(&self) -> Vec<(u32, usize)> {
        self.inner.lock().writes.clone()
    }

    /// Returns `true` if a handle for the device and direction was dropped.
    pub fn closed(&self, device: u32, direction: PcmDirection) -> bool {
        self.inner.lock().closes.contains(&(device, direction))
    }

    /// Returns `true` if a handle for the device and direction was stopped.
    pub fn stopped(&self, device: u32, direction: PcmDirection) -> bool {
        self.inner.lock().stops.contains(&(device, direction))
    }
}

impl PcmBackend for MockPcmBackend {
    fn open(
        &self,
        card: u32,
        device: u32,
        direction: PcmDirection,
        config: PcmConfig,
    ) -> Result<Box<dyn PcmStream>, BackendError> {
        let mut inner = self.inner.lock();
        inner.opens.push(OpenRecord {
            card,
            device,
            direction,
            config,
        });
        if inner.fail_open.contains(&(device, direction)) {
            return Err(BackendError::failed("scripted open failure"));
        }
        let ready = !inner.fail_ready.contains(&(device, direction));
        drop(inner);
        Ok(Box::new(MockPcmStream {
            backend: Arc::clone(&self.inner),
            device,
            direction,
            ready,
        }))
    }
}

#[derive(Debug)]
struct MockPcmStream {
    backend: Arc<Mutex<PcmInner>>,
    device: u32,
    direction: PcmDirection,
    ready: bool,
}

impl PcmStream for MockPcmStream {
    fn is_ready(&self) -> bool {
        self.ready
    }

    fn start(&mut self) -> Result<(), BackendError> {
        self.backend
            .lock()
            .starts
            .push((self.device, self.direction));
        Ok(())
    }

    fn stop(&mut self) -> Result<(), BackendError> {
        self.backend
            .lock()
            .stops
            .push((self.device, self.direction));
        Ok(())
    }

    fn read(&mut self, buffer: &mut [i16]) -> Result<(), BackendError> {
        let step = self.backend.lock().read_queue.pop_front();
        match step {
            Some(Ok(samples)) => {
                buffer.fill(0);
                let n = samples.len().min(buffer.len());
                buffer[..n].copy_from_slice(&samples[..n]);
                Ok(())
            }
            Some(Err(error)) => Err(error),
            None => {
                buffer.fill(0);
                Ok(())
            }
        }
    }

    fn write(&mut self, buffer: &[i16]) -> Result<(), BackendError> {
        let mut inner = self.backend.lock();
        inner.writes.push((self.device, buffer.len()));
        if inner.fail_write.contains(&(self.device, self.direction)) {
            return Err(BackendError::failed("scripted write failure"));
        }
        Ok(())
    }
}

impl Drop for MockPcmStream {
    fn drop(&mut self) {
        self.backend
            .lock()
            .closes
            .push((self.device, self.direction));
    }
}

#[derive(Debug, Default)]
struct VoiceFxInner {
    presets: Vec<VoicePreset>,
    fail_presets: bool,
    handles: Vec<Option<IoHandle>>,
    added: Vec<(IoHandle, String)>,
    removed: Vec<(IoHandle, String)>,
    released: bool,
}

/// Mock voice-processing DSP.
#[derive(Debug, Clone, Default)]
pub struct MockVoiceProcessor {
    inner: Arc<Mutex<VoiceFxInner>>,
}

impl MockVoiceProcessor {
    /// Creates a DSP where every preset load succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent preset load fail.
    pub fn fail_presets(&self, fail: bool) {
        self.inner.lock().fail_presets = fail;
    }

    /// Every preset load attempted, in order.
    pub fn presets(&self) -> Vec<VoicePreset> {
        self.inner.lock().presets.clone()
    }

    /// Every active-handle change, in order.
    pub fn handles(&self) -> Vec<Option<IoHandle>> {
        self.inner.lock().handles.clone()
    }

    /// Effect names added per session.
    pub fn added_effects(&self) -> Vec<(IoHandle, String)> {
        self.inner.lock().added.clone()
    }

    /// Effect names removed per session.
    pub fn removed_effects(&self) -> Vec<(IoHandle, String)> {
        self.inner.lock().removed.clone()
    }
}

impl VoiceProcessor for MockVoiceProcessor {
    fn use_preset(&mut self, preset: VoicePreset) -> Result<(), BackendError> {
        let mut inner = self.inner.lock();
        inner.presets.push(preset);
        if inner.fail_presets {
            Err(BackendError::failed("scripted preset failure"))
        } else {
            Ok(())
        }
    }

    fn set_active_io_handle(&mut self, handle: Option<IoHandle>) {
        self.inner.lock().handles.push(handle);
    }

    fn add_effect(&mut self, handle: IoHandle, effect: &EffectDescriptor) {
        self.inner.lock().added.push((handle, effect.name.clone()));
    }

    fn remove_effect(&mut self, handle: IoHandle, effect: &EffectDescriptor) {
        self.inner
            .lock()
            .removed
            .push((handle, effect.name.clone()));
    }

    fn release(&mut self) {
        self.inner.lock().released = true;
    }
}

/// One call recorded by [`MockRadio`].
#[derive(Debug, Clone, PartialEq)]
pub enum RadioCall {
    /// `set_call_audio_path`.
    AudioPath(CallAudioPath),
    /// `set_call_volume`.
    Volume(SoundType, f32),
    /// `set_call_clock_sync`.
    ClockSync(ClockSync),
    /// `set_mute`.
    Mute(MuteState),
    /// `set_two_mic_control`.
    TwoMic(TwoMicDevice, TwoMicState),
}

#[derive(Default)]
struct RadioInner {
    calls: Vec<RadioCall>,
    wb_amr: Option<WbAmrCallback>,
}

/// Mock radio client recording calls and holding the wideband-AMR callback
/// so tests can fire it.
#[derive(Clone, Default)]
pub struct MockRadio {
    inner: Arc<Mutex<RadioInner>>,
}

impl MockRadio {
    /// Creates an idle mock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call recorded, in order.
    pub fn calls(&self) -> Vec<RadioCall> {
        self.inner.lock().calls.clone()
    }

    /// Fires the registered wideband-AMR callback, as the network would.
    ///
    /// # Panics
    ///
    /// Panics if no callback was registered.
    pub fn trigger_wb_amr(&self, enable: bool) {
        let callback = self
            .inner
            .lock()
            .wb_amr
            .take()
            .expect("wb-amr callback registered");
        callback(enable);
        self.inner.lock().wb_amr = Some(callback);
    }
}

impl Radio for MockRadio {
    fn set_call_audio_path(&mut self, path: CallAudioPath) {
        self.inner.lock().calls.push(RadioCall::AudioPath(path));
    }

    fn set_call_volume(&mut self, sound_type: SoundType, volume: f32) {
        self.inner
            .lock()
            .calls
            .push(RadioCall::Volume(sound_type, volume));
    }

    fn set_call_clock_sync(&mut self, sync: ClockSync) {
        self.inner.lock().calls.push(RadioCall::ClockSync(sync));
    }

    fn set_mute(&mut self, state: MuteState) {
        self.inner.lock().calls.push(RadioCall::Mute(state));
    }

    fn set_two_mic_control(&mut self, device: TwoMicDevice, state: TwoMicState) {
        self.inner
            .lock()
            .calls
            .push(RadioCall::TwoMic(device, state));
    }

    fn register_wb_amr_callback(&mut self, callback: WbAmrCallback) {
        self.inner.lock().wb_amr = Some(callback);
    }
}
